//! Daemon Integration Tests
//!
//! Catalog scenarios end to end against the in-memory runtime.

use rallf_incubator::scheduler::container_name;
use rallf_incubator::{
    Config, Daemon, IncubatorError, InMemoryRuntime, RobotId, RuntimeKind, TaskId, TaskState,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

fn test_config(dir: &TempDir) -> Config {
    Config {
        snapshot_path: dir.path().join("daemon.json"),
        runtime: RuntimeKind::Memory,
        runtime_timeout: Duration::from_millis(200),
        ..Config::default()
    }
}

async fn start_daemon(dir: &TempDir, runtime: &Arc<InMemoryRuntime>) -> Daemon {
    Daemon::start(&test_config(dir), runtime.clone())
        .await
        .expect("Failed to start daemon")
}

#[tokio::test]
async fn test_teach_then_list() {
    let temp = TempDir::new().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let daemon = start_daemon(&temp, &runtime).await;
    let registry = daemon.registry();

    let robot = registry.create_robot();
    let task = assert_ok!(registry.teach_skill(&robot.id, "rallf/hello:latest").await);

    let skills = assert_ok!(registry.list_skills(&robot.id));
    assert_eq!(skills.len(), 1);
    assert_eq!(skills[0].id, task.id);
    assert_eq!(skills[0].image, "rallf/hello:latest");
    assert_eq!(skills[0].state, TaskState::Running);

    // The container joined the tasks network
    let (image, network) = runtime.container(&container_name(&task.id)).unwrap();
    assert_eq!(image, "rallf/hello:latest");
    assert_eq!(&network, registry.network());
}

#[tokio::test]
async fn test_delete_cascades_to_skills() {
    let temp = TempDir::new().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let daemon = start_daemon(&temp, &runtime).await;
    let registry = daemon.registry();

    let robot = registry.create_robot();
    registry.teach_skill(&robot.id, "a:1").await.unwrap();
    registry.teach_skill(&robot.id, "b:1").await.unwrap();
    assert_eq!(runtime.running_count(), 2);

    let removed = registry.delete_robot(&robot.id).await.unwrap();
    assert_eq!(removed.len(), 2);
    assert!(removed.iter().all(|t| t.state == TaskState::Removed));
    assert_eq!(runtime.running_count(), 0);
    assert_eq!(registry.robot_count(), 0);
    assert_eq!(registry.scheduler().tracked(), 0);
}

#[tokio::test]
async fn test_unknown_robot() {
    let temp = TempDir::new().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let daemon = start_daemon(&temp, &runtime).await;
    let registry = daemon.registry();
    let ghost = RobotId::from("ghost");

    assert!(matches!(
        registry.list_skills(&ghost),
        Err(IncubatorError::RobotNotFound(_))
    ));
    assert!(matches!(
        registry.teach_skill(&ghost, "a:1").await,
        Err(IncubatorError::RobotNotFound(_))
    ));
    assert!(matches!(
        registry.delete_robot(&ghost).await,
        Err(IncubatorError::RobotNotFound(_))
    ));
    assert!(matches!(
        registry.forget_skill(&ghost, &TaskId::from("t")).await,
        Err(IncubatorError::RobotNotFound(_))
    ));
    assert_eq!(runtime.calls.containers_started.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_forget_twice() {
    let temp = TempDir::new().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let daemon = start_daemon(&temp, &runtime).await;
    let registry = daemon.registry();

    let robot = registry.create_robot();
    let task = registry.teach_skill(&robot.id, "a:1").await.unwrap();

    let forgotten = assert_ok!(registry.forget_skill(&robot.id, &task.id).await);
    assert_eq!(forgotten.id, task.id);
    assert_eq!(runtime.running_count(), 0);

    let err = assert_err!(registry.forget_skill(&robot.id, &task.id).await);
    assert!(matches!(err, IncubatorError::SkillNotFound { .. }));
}

#[tokio::test]
async fn test_double_start_conflicts() {
    let temp = TempDir::new().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let daemon = start_daemon(&temp, &runtime).await;
    let registry = daemon.registry();

    let robot = registry.create_robot();
    let task = registry.teach_skill(&robot.id, "a:1").await.unwrap();

    let err = registry.start_skill(&robot.id, &task.id).await.unwrap_err();
    assert!(matches!(err, IncubatorError::AlreadyRunning(_)));
    assert_eq!(runtime.calls.containers_started.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_skill_belongs_to_one_robot() {
    let temp = TempDir::new().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let daemon = start_daemon(&temp, &runtime).await;
    let registry = daemon.registry();

    let first = registry.create_robot();
    let second = registry.create_robot();
    let task = registry.teach_skill(&first.id, "a:1").await.unwrap();

    let err = registry.forget_skill(&second.id, &task.id).await.unwrap_err();
    assert!(matches!(err, IncubatorError::SkillNotFound { .. }));
    assert_eq!(registry.list_skills(&first.id).unwrap().len(), 1);

    // Same image on another robot is a separate task
    let other = registry.teach_skill(&second.id, "a:1").await.unwrap();
    assert_ne!(other.id, task.id);
    assert_eq!(runtime.running_count(), 2);
}

#[tokio::test]
async fn test_export_load_roundtrip() {
    let temp = TempDir::new().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let daemon = start_daemon(&temp, &runtime).await;
    let registry = daemon.registry();

    let robot = registry.create_robot();
    registry.create_robot();
    registry.teach_skill(&robot.id, "a:1").await.unwrap();
    registry.teach_skill(&robot.id, "b:1").await.unwrap();

    let before = registry.export();
    registry.load(before.clone()).await.unwrap();
    let after = registry.export();

    assert_eq!(before, after);
    assert_eq!(registry.list_robots()[0].id, robot.id);
    assert_eq!(runtime.running_count(), 2);
}

#[tokio::test]
async fn test_restart_restores_catalog_and_reuses_network() {
    let temp = TempDir::new().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());

    let (robot, task) = {
        let daemon = start_daemon(&temp, &runtime).await;
        let robot = daemon.registry().create_robot();
        let task = daemon
            .registry()
            .teach_skill(&robot.id, "a:1")
            .await
            .unwrap();
        daemon.export().await.unwrap();
        (robot, task)
    };

    let daemon = start_daemon(&temp, &runtime).await;

    assert_eq!(runtime.network_count(), 1);
    assert_eq!(runtime.calls.networks_created.load(Ordering::SeqCst), 1);

    let skills = daemon.registry().list_skills(&robot.id).unwrap();
    assert_eq!(skills.len(), 1);
    assert_eq!(skills[0].id, task.id);
    assert_eq!(skills[0].state, TaskState::Running);

    // The adopted instance can be stopped by the new daemon
    daemon.registry().stop_skill(&robot.id, &task.id).await.unwrap();
    assert_eq!(runtime.running_count(), 0);
}

#[tokio::test]
async fn test_restart_after_crash_marks_stopped() {
    let temp = TempDir::new().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());

    let task = {
        let daemon = start_daemon(&temp, &runtime).await;
        let robot = daemon.registry().create_robot();
        let task = daemon
            .registry()
            .teach_skill(&robot.id, "a:1")
            .await
            .unwrap();
        daemon.export().await.unwrap();
        task
    };
    runtime.kill(&container_name(&task.id));

    let daemon = start_daemon(&temp, &runtime).await;
    let robots = daemon.registry().list_robots();
    let robot = &robots[0];
    assert_eq!(robot.skills[0].state, TaskState::Stopped);

    let restarted = daemon
        .registry()
        .start_skill(&robot.id, &task.id)
        .await
        .unwrap();
    assert_eq!(restarted.state, TaskState::Running);
    assert!(runtime.is_running(&container_name(&task.id)));
}

#[tokio::test]
async fn test_corrupt_snapshot_fails_startup() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("daemon.json"), "{ not json").unwrap();

    let runtime = Arc::new(InMemoryRuntime::new());
    let result = Daemon::start(&test_config(&temp), runtime).await;
    assert!(matches!(result, Err(IncubatorError::Json(_))));
}

#[tokio::test]
async fn test_unknown_task_id() {
    let temp = TempDir::new().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let daemon = start_daemon(&temp, &runtime).await;
    let robot = daemon.registry().create_robot();

    let err = daemon
        .registry()
        .stop_skill(&robot.id, &TaskId::from("nope"))
        .await
        .unwrap_err();
    assert!(matches!(err, IncubatorError::SkillNotFound { .. }));
}
