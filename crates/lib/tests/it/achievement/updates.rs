use std::{sync::Arc, time::Duration};

use keepsake::{
    AchievementSystem, FixedClock,
    achievement::AchievementDefinition,
    memory::MemoryAchievementBackend,
};

use crate::helpers::*;

fn definitions() -> Vec<AchievementDefinition> {
    vec![
        AchievementDefinition::progressive("x", 10).unwrap(),
        AchievementDefinition::progressive("y", 5).unwrap(),
        AchievementDefinition::single("z"),
    ]
}

#[tokio::test]
async fn coalesced_updates_send_the_maximum() {
    let backend = Arc::new(MemoryAchievementBackend::new());
    let system = AchievementSystem::new(backend.clone(), definitions(), slow_config()).unwrap();

    assert!(system.update_progress("x", 3).unwrap());
    assert!(!system.update_progress("x", 1).unwrap());
    assert!(system.update_progress("x", 7).unwrap());

    let progress = system.progress("x").unwrap();
    assert_eq!(progress.pending, Some(7));
    // The floor only moves once the platform accepted the value
    assert_eq!(progress.next_progress, 0);

    system.initialize().await.unwrap();
    wait_until(|| backend.updates_for("x") == vec![7]).await;
    wait_until(|| system.progress("x").unwrap().next_progress == 7).await;
    assert_eq!(system.pending_count(), 0);

    // Below the new floor
    assert!(!system.update_progress("x", 6).unwrap());
    system.shutdown().await;
}

#[tokio::test]
async fn reaching_the_target_unlocks() {
    let backend = Arc::new(MemoryAchievementBackend::new());
    let system = AchievementSystem::new(backend.clone(), definitions(), fast_config()).unwrap();
    system.initialize().await.unwrap();

    system.update_progress("y", 99).unwrap();
    system.update_progress("z", 1).unwrap();
    wait_until(|| system.progress("y").unwrap().unlocked).await;
    wait_until(|| system.progress("z").unwrap().unlocked).await;

    assert_eq!(backend.updates_for("y"), vec![5]);
    assert!(!system.update_progress("y", 5).unwrap());
    assert!(!system.update_progress("z", 1).unwrap());
    system.shutdown().await;
}

#[tokio::test]
async fn updates_are_rate_limited_in_batches() {
    let backend = Arc::new(MemoryAchievementBackend::new());
    let system = AchievementSystem::new(backend.clone(), definitions(), slow_config()).unwrap();
    system.update_progress("x", 1).unwrap();
    system.update_progress("y", 1).unwrap();
    system.update_progress("z", 1).unwrap();

    system.initialize().await.unwrap();
    // Batch size one, then a long sleep
    wait_until(|| backend.updates().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.updates().len(), 1);
    assert_eq!(system.pending_count(), 2);

    assert_eq!(system.flush(None).await.unwrap(), 2);
    let sent: Vec<String> = backend.updates().into_iter().map(|(id, _)| id).collect();
    assert_eq!(sent, vec!["x", "y", "z"]);
    system.shutdown().await;
}

#[tokio::test]
async fn queue_order_follows_first_report() {
    let backend = Arc::new(MemoryAchievementBackend::new());
    let clock = Arc::new(FixedClock::new(1_000));
    let system = AchievementSystem::with_clock(
        backend.clone(),
        definitions(),
        slow_config(),
        clock.clone(),
    )
    .unwrap();

    system.update_progress("z", 1).unwrap();
    clock.advance(100);
    system.update_progress("x", 2).unwrap();
    {
        // Equal stamps fall back to arrival order
        let _hold = clock.hold();
        system.update_progress("y", 1).unwrap();
        // Raising a queued value keeps its place
        system.update_progress("z", 1).unwrap();
        system.update_progress("x", 5).unwrap();
    }

    system.initialize().await.unwrap();
    wait_until(|| backend.updates().len() == 1).await;
    system.flush(None).await.unwrap();
    assert_eq!(
        backend.updates(),
        vec![
            ("z".to_string(), 1),
            ("x".to_string(), 5),
            ("y".to_string(), 1),
        ]
    );
    system.shutdown().await;
}

#[tokio::test]
async fn equal_stamps_keep_arrival_order() {
    let backend = Arc::new(MemoryAchievementBackend::new());
    let clock = Arc::new(FixedClock::new(0));
    let system = AchievementSystem::with_clock(
        backend.clone(),
        definitions(),
        slow_config(),
        clock.clone(),
    )
    .unwrap();

    let _hold = clock.hold();
    for id in ["y", "z", "x"] {
        system.update_progress(id, 1).unwrap();
    }
    assert_eq!(clock.get(), 0);

    system.initialize().await.unwrap();
    wait_until(|| backend.updates().len() == 1).await;
    system.flush(None).await.unwrap();
    let sent: Vec<String> = backend.updates().into_iter().map(|(id, _)| id).collect();
    assert_eq!(sent, vec!["y", "z", "x"]);
    system.shutdown().await;
}

#[tokio::test]
async fn failed_updates_are_dropped_until_reported_again() {
    let backend = Arc::new(MemoryAchievementBackend::new());
    let system = AchievementSystem::new(backend.clone(), definitions(), fast_config()).unwrap();
    system.initialize().await.unwrap();

    backend.fail_updates(1);
    system.update_progress("x", 3).unwrap();
    wait_until(|| system.pending_count() == 0).await;
    // Waits for the loop's batch to finish
    system.flush(None).await.unwrap();
    assert!(backend.updates().is_empty());
    assert_eq!(system.progress("x").unwrap().next_progress, 0);

    // A later report of the same value is sent again
    system.update_progress("x", 3).unwrap();
    wait_until(|| backend.updates_for("x") == vec![3]).await;
    system.shutdown().await;
}

#[tokio::test]
async fn rejected_achievements_become_invalid() {
    let backend = Arc::new(MemoryAchievementBackend::new());
    backend.reject("y");
    let system = AchievementSystem::new(backend.clone(), definitions(), fast_config()).unwrap();
    system.initialize().await.unwrap();

    system.update_progress("y", 2).unwrap();
    wait_until(|| system.progress("y").unwrap().invalid).await;
    assert!(!system.update_progress("y", 3).unwrap());
    system.shutdown().await;
}

#[tokio::test]
async fn backend_never_sees_concurrent_calls() {
    let backend = Arc::new(MemoryAchievementBackend::new());
    backend.set_latency(Duration::from_millis(2));
    let system = AchievementSystem::new(backend.clone(), definitions(), fast_config()).unwrap();
    system.initialize().await.unwrap();

    let mut tasks = Vec::new();
    for round in 1..=5u32 {
        let system = system.clone();
        tasks.push(tokio::spawn(async move {
            system.update_progress("x", round).unwrap();
            system.update_progress("y", round).unwrap();
            system.flush(Some(1)).await.unwrap();
        }));
    }
    for task in tasks {
        within(task).await.unwrap();
    }
    system.flush(None).await.unwrap();

    assert_eq!(backend.max_concurrent_calls(), 1);
    assert_eq!(system.progress("y").unwrap().next_progress, 5);
    system.shutdown().await;
}

#[tokio::test]
async fn unknown_achievements_are_rejected() {
    let backend = Arc::new(MemoryAchievementBackend::new());
    let system = AchievementSystem::new(backend, definitions(), slow_config()).unwrap();
    let err = system.update_progress("missing", 1).unwrap_err();
    assert!(err.is_not_found());
    assert!(err.is_programmer_error());
}
