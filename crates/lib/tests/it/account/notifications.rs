use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use keepsake::{
    Account, AccountRegistry, Error,
    account::{AccountEvent, AccountState},
};

use crate::helpers::*;

#[tokio::test]
async fn events_follow_commit_order() {
    let registry = AccountRegistry::new();
    let a = Account::new("steam:a", "A");
    let b = Account::new("steam:b", "B");
    sign_in(&registry, &[&a], Some(&a)).await;

    let (_subscription, events) = record_events(&registry);
    let mut tx = registry.begin_transaction().await.unwrap();
    tx.add(&b).unwrap();
    tx.remove(&a).unwrap();
    tx.make_primary(Some(&b)).unwrap();
    tx.commit().await;
    registry.flush_notifications().await;

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 3);
    assert!(matches!(
        &events[0],
        AccountEvent::Changed { account, state: AccountState::SignedOut } if *account == a
    ));
    assert!(matches!(
        &events[1],
        AccountEvent::Changed { account, state: AccountState::SignedIn } if *account == b
    ));
    assert!(matches!(
        &events[2],
        AccountEvent::PrimaryChanged { previous: Some(previous), current: Some(current) }
            if *previous == a && *current == b
    ));
}

#[tokio::test]
async fn add_undone_in_the_same_transaction_is_silent() {
    let registry = AccountRegistry::new();
    let a = Account::new("steam:a", "A");
    let (_subscription, events) = record_events(&registry);

    let mut tx = registry.begin_transaction().await.unwrap();
    tx.add(&a).unwrap();
    tx.remove(&a).unwrap();
    tx.commit().await;
    registry.flush_notifications().await;

    assert!(events.lock().unwrap().is_empty());
    assert!(registry.signed_in().is_empty());
    // The account was handed to the registry and is retired all the same
    assert!(!a.is_signed_in());
}

#[tokio::test]
async fn failing_listeners_do_not_affect_others() {
    let registry = AccountRegistry::new();
    let failures = Arc::new(AtomicUsize::new(0));
    let counter = failures.clone();
    let _failing = registry.subscribe(move |_: &AccountEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(Error::Platform {
            reason: "listener broke".to_string(),
        })
    });
    let (_recording, events) = record_events(&registry);

    let a = Account::new("steam:a", "A");
    sign_in(&registry, &[&a], Some(&a)).await;
    registry.flush_notifications().await;

    assert_eq!(failures.load(Ordering::SeqCst), 2);
    assert_eq!(events.lock().unwrap().len(), 2);
    assert!(registry.contains(&a));
}

#[tokio::test]
async fn dropping_the_subscription_unsubscribes() {
    let registry = AccountRegistry::new();
    let (subscription, events) = record_events(&registry);
    assert_eq!(registry.listener_count(), 1);
    drop(subscription);
    assert_eq!(registry.listener_count(), 0);

    let a = Account::new("steam:a", "A");
    sign_in(&registry, &[&a], None).await;
    registry.flush_notifications().await;
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn no_events_without_changes() {
    let registry = AccountRegistry::new();
    let a = Account::new("steam:a", "A");
    sign_in(&registry, &[&a], Some(&a)).await;
    let (_subscription, events) = record_events(&registry);

    let mut tx = registry.begin_transaction().await.unwrap();
    tx.make_primary(Some(&a)).unwrap();
    tx.commit().await;
    registry.flush_notifications().await;

    assert!(events.lock().unwrap().is_empty());
}
