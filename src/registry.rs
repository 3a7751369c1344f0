//! Entity Registry
//!
//! Owns every [`Robot`] and [`Task`] record. Locking is two-level:
//!
//! - the catalog sits behind a `parking_lot::RwLock`, held only for in-memory
//!   reads and writes, never across an await
//! - each robot carries an async mutex that serializes operations on that
//!   robot, including the runtime calls they make
//!
//! Operations on different robots run concurrently; two `teach_skill` calls on
//! the same robot never interleave.

use futures_util::future::join_all;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::error::{IncubatorError, IncubatorResult};
use crate::model::{Robot, RobotId, RobotRecord, Snapshot, Task, TaskId, TaskState};
use crate::runtime::NetworkHandle;
use crate::scheduler::{container_name, Scheduler};

struct RobotEntry {
    robot: Robot,
    lock: Arc<AsyncMutex<()>>,
}

impl RobotEntry {
    fn new(robot: Robot) -> Self {
        Self {
            robot,
            lock: Arc::new(AsyncMutex::new(())),
        }
    }
}

#[derive(Default)]
struct Catalog {
    /// Creation order
    order: Vec<RobotId>,
    robots: HashMap<RobotId, RobotEntry>,
}

/// Catalog of robots and their skills
pub struct EntityRegistry {
    catalog: RwLock<Catalog>,
    scheduler: Arc<Scheduler>,
    network: NetworkHandle,
}

impl EntityRegistry {
    /// New empty registry scheduling skills onto `network`
    pub fn new(scheduler: Arc<Scheduler>, network: NetworkHandle) -> Self {
        Self {
            catalog: RwLock::new(Catalog::default()),
            scheduler,
            network,
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn network(&self) -> &NetworkHandle {
        &self.network
    }

    // ------------------------------------------------------------------
    // Robots
    // ------------------------------------------------------------------

    /// Register a new robot with no skills
    pub fn create_robot(&self) -> Robot {
        let mut catalog = self.catalog.write();

        let mut robot = Robot::new();
        while catalog.robots.contains_key(&robot.id) {
            robot = Robot::new();
        }

        catalog.order.push(robot.id.clone());
        catalog.robots.insert(robot.id.clone(), RobotEntry::new(robot.clone()));
        info!("Created robot {}", robot.id);
        robot
    }

    /// Stop every running skill of `id`, then drop the robot
    ///
    /// Returns the removed tasks. If the runtime fails to stop one of them the
    /// robot is kept; tasks that did stop are marked stopped.
    pub async fn delete_robot(&self, id: &RobotId) -> IncubatorResult<Vec<Task>> {
        let lock = self.robot_lock(id)?;
        let _guard = lock.lock().await;

        let (running, idle): (Vec<TaskId>, Vec<TaskId>) = self.with_robot(id, |robot| {
            Ok(robot
                .skills
                .iter()
                .map(|t| t.id.clone())
                .partition(|t| self.scheduler.is_running(t)))
        })?;

        let results = join_all(running.iter().map(|task| self.scheduler.stop(task))).await;

        let mut failure = None;
        for (task, result) in running.iter().zip(results) {
            match result {
                Ok(()) | Err(IncubatorError::NotRunning(_)) => {
                    self.set_state(id, task, TaskState::Stopped);
                }
                Err(e) => {
                    warn!("Robot {}: task {} did not stop: {}", id, task, e);
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        // Pending or stopped tasks may still own a container that came up late
        join_all(idle.iter().map(|task| self.scheduler.reap(task))).await;

        let entry = {
            let mut catalog = self.catalog.write();
            catalog.order.retain(|r| r != id);
            let entry = catalog.robots.remove(id);
            entry
        };
        let entry = entry.ok_or_else(|| IncubatorError::RobotNotFound(id.to_string()))?;

        let removed: Vec<Task> = entry
            .robot
            .skills
            .into_iter()
            .map(|mut t| {
                self.scheduler.release(&t.id);
                t.state = TaskState::Removed;
                t
            })
            .collect();

        info!("Deleted robot {} ({} skills removed)", id, removed.len());
        Ok(removed)
    }

    /// Snapshot copy of all robots in creation order
    pub fn list_robots(&self) -> Vec<Robot> {
        let catalog = self.catalog.read();
        catalog
            .order
            .iter()
            .filter_map(|id| catalog.robots.get(id))
            .map(|entry| entry.robot.clone())
            .collect()
    }

    pub fn get_robot(&self, id: &RobotId) -> IncubatorResult<Robot> {
        self.with_robot(id, |robot| Ok(robot.clone()))
    }

    pub fn robot_count(&self) -> usize {
        self.catalog.read().robots.len()
    }

    // ------------------------------------------------------------------
    // Skills
    // ------------------------------------------------------------------

    /// Snapshot copy of a robot's skills in teaching order
    pub fn list_skills(&self, id: &RobotId) -> IncubatorResult<Vec<Task>> {
        self.with_robot(id, |robot| Ok(robot.skills.clone()))
    }

    /// Teach `image` to robot `id` and start it on the tasks network
    ///
    /// Re-teaching an image the robot already knows fails with
    /// `SkillAlreadyLearned`. On a start timeout the task stays pending in the
    /// skill list; any other start failure rolls the task back.
    pub async fn teach_skill(&self, id: &RobotId, image: &str) -> IncubatorResult<Task> {
        let image = image.trim();
        if image.is_empty() {
            return Err(IncubatorError::InvalidRequest("image must not be empty".to_string()));
        }
        if image.starts_with('-') {
            return Err(IncubatorError::InvalidRequest(format!(
                "image must not start with '-': {}",
                image
            )));
        }

        let lock = self.robot_lock(id)?;
        let _guard = lock.lock().await;

        let mut task = self.with_robot_mut(id, |robot| {
            if robot.knows_image(image) {
                return Err(IncubatorError::SkillAlreadyLearned {
                    robot: id.to_string(),
                    image: image.to_string(),
                });
            }
            let task = Task::new(id, image);
            robot.skills.push(task.clone());
            Ok(task)
        })?;

        debug!("Robot {} learning {} as task {}", id, image, task.id);

        match self.scheduler.start(&task, &self.network).await {
            Ok(_) => {
                self.set_state(id, &task.id, TaskState::Running);
                task.state = TaskState::Running;
                info!("Robot {} learned {} ({})", id, image, task.id);
                Ok(task)
            }
            Err(e @ IncubatorError::RuntimeTimeout { .. }) => {
                warn!("Robot {}: task {} left pending after timeout", id, task.id);
                Err(e)
            }
            Err(e) => {
                self.remove_task(id, &task.id);
                Err(e)
            }
        }
    }

    /// Remove `task` from robot `id` and stop its instance
    ///
    /// A task without a live instance is still removed, and `NotRunning` is
    /// reported; any leftover container under its name is removed. Runtime
    /// failures leave the task in place.
    pub async fn forget_skill(&self, id: &RobotId, task: &TaskId) -> IncubatorResult<Task> {
        let lock = self.robot_lock(id)?;
        let _guard = lock.lock().await;

        self.find_task(id, task)?;

        match self.scheduler.stop(task).await {
            Ok(()) => {
                let removed = self.remove_task(id, task);
                info!("Robot {} forgot task {}", id, task);
                removed.ok_or_else(|| IncubatorError::SkillNotFound {
                    robot: id.to_string(),
                    task: task.to_string(),
                })
            }
            Err(e @ IncubatorError::NotRunning(_)) => {
                self.scheduler.reap(task).await;
                self.remove_task(id, task);
                info!("Robot {} forgot task {} (no live instance)", id, task);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Explicitly (re)start a pending or stopped skill
    pub async fn start_skill(&self, id: &RobotId, task: &TaskId) -> IncubatorResult<Task> {
        let lock = self.robot_lock(id)?;
        let _guard = lock.lock().await;

        let mut current = self.find_task(id, task)?;
        if !current.state.can_start() {
            return Err(IncubatorError::AlreadyRunning(task.to_string()));
        }

        self.scheduler.start(&current, &self.network).await?;
        self.set_state(id, task, TaskState::Running);
        current.state = TaskState::Running;
        info!("Robot {} restarted task {}", id, task);
        Ok(current)
    }

    /// Stop a skill without forgetting it
    pub async fn stop_skill(&self, id: &RobotId, task: &TaskId) -> IncubatorResult<Task> {
        let lock = self.robot_lock(id)?;
        let _guard = lock.lock().await;

        let mut current = self.find_task(id, task)?;
        match self.scheduler.stop(task).await {
            Ok(()) => {
                self.set_state(id, task, TaskState::Stopped);
                current.state = TaskState::Stopped;
                Ok(current)
            }
            Err(e @ IncubatorError::NotRunning(_)) => {
                if current.state == TaskState::Running {
                    self.set_state(id, task, TaskState::Stopped);
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Serialize the catalog
    pub fn export(&self) -> Snapshot {
        let catalog = self.catalog.read();
        Snapshot {
            robots: catalog
                .order
                .iter()
                .filter_map(|id| catalog.robots.get(id))
                .map(|entry| RobotRecord::from(&entry.robot))
                .collect(),
        }
    }

    /// Replace the catalog with `snapshot`, reconciling against the runtime
    ///
    /// A task whose container is alive is adopted as running; every other
    /// task, including those the runtime could not be asked about, is loaded
    /// as stopped.
    pub async fn load(&self, snapshot: Snapshot) -> IncubatorResult<()> {
        validate_snapshot(&snapshot)?;

        let task_ids: Vec<TaskId> = snapshot
            .robots
            .iter()
            .flat_map(|r| r.skills.iter().map(|t| t.id.clone()))
            .collect();

        let runtime = self.scheduler.runtime().clone();
        let inspections = join_all(task_ids.iter().map(|task| {
            let runtime = runtime.clone();
            let name = container_name(task);
            async move { runtime.inspect_container(&name).await }
        }))
        .await;

        self.scheduler.clear();

        let mut live = HashSet::new();
        for (task, inspection) in task_ids.iter().zip(inspections) {
            match inspection {
                Ok(Some(info)) if info.running => {
                    self.scheduler.adopt(task, info.handle);
                    live.insert(task.clone());
                }
                Ok(_) => {}
                Err(e) => warn!("Could not reconcile task {}: {}", task, e),
            }
        }

        let mut catalog = Catalog::default();
        for record in snapshot.robots {
            let skills = record
                .skills
                .into_iter()
                .map(|t| Task {
                    state: if live.contains(&t.id) {
                        TaskState::Running
                    } else {
                        TaskState::Stopped
                    },
                    id: t.id,
                    image: t.image,
                    robot: Some(record.id.clone()),
                })
                .collect();

            catalog.order.push(record.id.clone());
            catalog.robots.insert(
                record.id.clone(),
                RobotEntry::new(Robot {
                    id: record.id,
                    skills,
                }),
            );
        }

        let robots = catalog.robots.len();
        *self.catalog.write() = catalog;
        info!(
            "Loaded {} robots, {} of {} skills running",
            robots,
            live.len(),
            task_ids.len()
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn robot_lock(&self, id: &RobotId) -> IncubatorResult<Arc<AsyncMutex<()>>> {
        self.catalog
            .read()
            .robots
            .get(id)
            .map(|entry| entry.lock.clone())
            .ok_or_else(|| IncubatorError::RobotNotFound(id.to_string()))
    }

    fn with_robot<R>(&self, id: &RobotId, f: impl FnOnce(&Robot) -> IncubatorResult<R>) -> IncubatorResult<R> {
        let catalog = self.catalog.read();
        let entry = catalog
            .robots
            .get(id)
            .ok_or_else(|| IncubatorError::RobotNotFound(id.to_string()))?;
        f(&entry.robot)
    }

    fn with_robot_mut<R>(
        &self,
        id: &RobotId,
        f: impl FnOnce(&mut Robot) -> IncubatorResult<R>,
    ) -> IncubatorResult<R> {
        let mut catalog = self.catalog.write();
        let entry = catalog
            .robots
            .get_mut(id)
            .ok_or_else(|| IncubatorError::RobotNotFound(id.to_string()))?;
        f(&mut entry.robot)
    }

    fn find_task(&self, id: &RobotId, task: &TaskId) -> IncubatorResult<Task> {
        self.with_robot(id, |robot| {
            robot
                .skills
                .iter()
                .find(|t| &t.id == task)
                .cloned()
                .ok_or_else(|| IncubatorError::SkillNotFound {
                    robot: id.to_string(),
                    task: task.to_string(),
                })
        })
    }

    fn set_state(&self, id: &RobotId, task: &TaskId, state: TaskState) {
        let _ = self.with_robot_mut(id, |robot| {
            if let Some(t) = robot.skills.iter_mut().find(|t| &t.id == task) {
                t.state = state;
            }
            Ok(())
        });
    }

    fn remove_task(&self, id: &RobotId, task: &TaskId) -> Option<Task> {
        self.with_robot_mut(id, |robot| {
            Ok(robot.position_of(task).map(|idx| {
                let mut removed = robot.skills.remove(idx);
                removed.state = TaskState::Stopped;
                removed
            }))
        })
        .ok()
        .flatten()
    }
}

/// Reject snapshots that would break registry invariants
fn validate_snapshot(snapshot: &Snapshot) -> IncubatorResult<()> {
    let mut robots = HashSet::new();
    let mut tasks = HashSet::new();

    for robot in &snapshot.robots {
        if !robots.insert(&robot.id) {
            return Err(IncubatorError::InvalidRequest(format!(
                "duplicate robot id {} in snapshot",
                robot.id
            )));
        }
        let mut images = HashSet::new();
        for task in &robot.skills {
            if !tasks.insert(&task.id) {
                return Err(IncubatorError::InvalidRequest(format!(
                    "duplicate task id {} in snapshot",
                    task.id
                )));
            }
            if !images.insert(task.image.as_str()) {
                return Err(IncubatorError::InvalidRequest(format!(
                    "robot {} lists image {} twice",
                    robot.id, task.image
                )));
            }
        }
    }
    Ok(())
}
