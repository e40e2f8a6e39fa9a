mod common;

use common::*;
use parallax_core::{EngineConfig, EngineEvent, SessionManager};
use pretty_assertions::assert_eq;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn writers_of_the_same_file_never_overlap() {
    let (executor, stats) = ScriptedExecutor::new();
    let manager = SessionManager::new(fast_config(), executor).unwrap();
    let mut rx = manager.subscribe();

    let tasks = vec![
        task("left", Script::sleep_ms(100)).touches("src/shared.rs"),
        task("right", Script::sleep_ms(100)).touches("./src/shared.rs"),
    ];
    let id = manager.create_session(tasks, &[], 2).unwrap();
    let report = manager.run(&id).await.unwrap();

    assert!(report.all_completed());
    assert_eq!(stats.max_running(), 1);
    assert_eq!(report.lock_contention_events, 1);

    let events = drain(&mut rx, &id);
    assert_eq!(
        count(&events, |e| matches!(e, EngineEvent::LockWaiting { .. })),
        1
    );
    assert_eq!(
        count(&events, |e| matches!(e, EngineEvent::LockAcquired { .. })),
        2
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_share_a_file() {
    let (executor, stats) = ScriptedExecutor::new();
    let manager = SessionManager::new(fast_config(), executor).unwrap();
    let mut rx = manager.subscribe();

    let tasks = vec![
        task("r1", Script::sleep_ms(150)).reads("Cargo.lock"),
        task("r2", Script::sleep_ms(150)).reads("Cargo.lock"),
    ];
    let id = manager.create_session(tasks, &[], 2).unwrap();
    let report = manager.run(&id).await.unwrap();

    assert!(report.all_completed());
    assert_eq!(stats.max_running(), 2);
    assert_eq!(report.lock_contention_events, 0);
    let events = drain(&mut rx, &id);
    assert_eq!(
        count(&events, |e| matches!(e, EngineEvent::LockWaiting { .. })),
        0
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lock_timeout_requeues_without_spending_a_retry() {
    let (executor, stats) = ScriptedExecutor::new();
    let config = EngineConfig {
        lock_timeout_ms: 80,
        max_retries: 0,
        ..fast_config()
    };
    let manager = SessionManager::new(config, executor).unwrap();
    let mut rx = manager.subscribe();

    // `gate` delays the waiter until the holder owns the file.
    let tasks = vec![
        task("holder", Script::sleep_ms(400)).touches("db.sqlite"),
        task("gate", Script::sleep_ms(20)),
        task("waiter", Script::sleep_ms(10)).touches("db.sqlite"),
    ];
    let id = manager
        .create_session(tasks, &[edge("gate", "waiter")], 2)
        .unwrap();
    let report = manager.run(&id).await.unwrap();

    assert!(report.all_completed(), "{report:?}");
    assert_eq!(stats.conflicts(), 0);
    assert_eq!(stats.attempts_of("waiter"), 1);
    assert_eq!(report.outcome("waiter").unwrap().retry_count, 0);

    let events = drain(&mut rx, &id);
    let timeouts = count(&events, |e| {
        matches!(e, EngineEvent::LockTimeout { task_id, .. } if task_id == "waiter")
    });
    assert!(timeouts >= 1);
    assert_eq!(
        count(&events, |e| matches!(e, EngineEvent::TaskRetrying { .. })),
        0
    );
    // One initial TaskReady plus one per timeout.
    assert_eq!(count(&events, ready("waiter")), 1 + timeouts);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn multi_file_tasks_do_not_deadlock() {
    let (executor, stats) = ScriptedExecutor::new();
    let manager = SessionManager::new(fast_config(), executor).unwrap();

    // Declared in opposite orders; acquisition is sorted.
    let tasks = vec![
        task("ab", Script::sleep_ms(50)).touches("a.txt").touches("b.txt"),
        task("ba", Script::sleep_ms(50)).touches("b.txt").touches("a.txt"),
        task("b_only", Script::sleep_ms(50)).touches("b.txt"),
    ];
    let id = manager.create_session(tasks, &[], 3).unwrap();
    let report = tokio::time::timeout(std::time::Duration::from_secs(5), manager.run(&id))
        .await
        .expect("session deadlocked")
        .unwrap();

    assert!(report.all_completed());
    assert_eq!(stats.conflicts(), 0);
}
