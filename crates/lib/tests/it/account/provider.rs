use std::sync::Arc;

use keepsake::{Account, AccountRegistry, memory::ScriptedProvider};

use crate::helpers::*;

fn registry_with_provider() -> (Arc<ScriptedProvider>, AccountRegistry) {
    let provider = Arc::new(ScriptedProvider::new());
    let registry = AccountRegistry::with_provider(provider.clone());
    (provider, registry)
}

#[tokio::test]
async fn establish_primary_signs_in_and_promotes() {
    let (provider, registry) = registry_with_provider();
    let a = Account::new("xbox:a", "A");
    provider.push_primary(&a);

    let established = registry.establish_primary().await.unwrap();
    assert_eq!(established, a);
    assert_eq!(registry.primary(), Some(a.clone()));
    assert_eq!(registry.signed_in().len(), 1);
}

#[tokio::test]
async fn establish_primary_accepts_an_already_signed_in_account() {
    let (provider, registry) = registry_with_provider();
    let a = Account::new("xbox:a", "A");
    let b = Account::new("xbox:b", "B");
    sign_in(&registry, &[&a, &b], Some(&a)).await;
    provider.push_primary(&b);

    registry.establish_primary().await.unwrap();
    assert_eq!(registry.primary(), Some(b));
    assert_eq!(registry.signed_in().len(), 2);
}

#[tokio::test]
async fn declined_and_transient_failures_propagate_unchanged() {
    let (provider, registry) = registry_with_provider();
    provider.push_primary_declined();
    provider.push_primary_transient("offline");

    let err = registry.establish_primary().await.unwrap_err();
    assert!(err.is_user_declined());
    assert!(!err.is_programmer_error());

    let err = registry.establish_primary().await.unwrap_err();
    assert!(err.is_transient());

    assert!(registry.signed_in().is_empty());
    assert_eq!(registry.signed_in().version(), 0);

    // Retrying is up to the caller
    let a = Account::new("xbox:a", "A");
    provider.push_primary(&a);
    registry.establish_primary().await.unwrap();
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn pick_account_adds_without_changing_primary() {
    let (provider, registry) = registry_with_provider();
    let a = Account::new("xbox:a", "A");
    let b = Account::new("xbox:b", "B");
    provider.push_primary(&a);
    provider.push_pick(&b);
    provider.push_pick_declined();

    registry.establish_primary().await.unwrap();
    registry.pick_account().await.unwrap();
    assert!(registry.pick_account().await.unwrap_err().is_user_declined());

    assert_eq!(registry.primary(), Some(a));
    assert!(registry.contains(&b));
}

#[tokio::test]
async fn missing_provider_is_reported() {
    let registry = AccountRegistry::new();
    let err = registry.establish_primary().await.unwrap_err();
    assert_eq!(err.module(), "account");
    assert!(!err.is_programmer_error());
}
