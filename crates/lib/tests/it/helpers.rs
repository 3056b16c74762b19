use std::{
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use keepsake::{
    Account, AccountRegistry, SavingSystem,
    account::{AccountEvent, Subscription},
    config::{AchievementConfig, SavingConfig},
    memory::MemoryStorage,
};

// Re-export tokio test macro for convenience
pub use tokio;

/// Achievement config with a short interval so the update loop runs quickly in tests.
pub fn fast_config() -> AchievementConfig {
    AchievementConfig::default().with_update_interval(Duration::from_millis(10))
}

/// Achievement config whose loop sends one batch and then sleeps for a minute.
pub fn slow_config() -> AchievementConfig {
    AchievementConfig::default()
        .with_update_interval(Duration::from_secs(60))
        .with_batch_size(1)
}

/// Sign the given accounts in with one transaction and optionally set the primary.
pub async fn sign_in(registry: &AccountRegistry, accounts: &[&Account], primary: Option<&Account>) {
    let mut tx = registry.begin_transaction().await.unwrap();
    for account in accounts {
        tx.add(account).unwrap();
    }
    if primary.is_some() {
        tx.make_primary(primary).unwrap();
    }
    tx.commit().await;
}

/// Collect every event the registry delivers.
pub fn record_events(registry: &AccountRegistry) -> (Subscription, Arc<Mutex<Vec<AccountEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let subscription = registry.subscribe(move |event: &AccountEvent| {
        sink.lock().unwrap().push(event.clone());
        Ok(())
    });
    (subscription, events)
}

pub fn local_saving() -> (Arc<MemoryStorage>, SavingSystem) {
    let storage = Arc::new(MemoryStorage::new());
    let saving = SavingSystem::local(storage.clone(), SavingConfig::default());
    (storage, saving)
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within timeout");
}

/// Run `future` with a timeout, panicking if it does not finish.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("operation did not finish within timeout")
}
