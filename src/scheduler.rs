//! Task Scheduler
//!
//! Maps task ids onto runtime instances. The scheduler never stores task
//! records, only the runtime slot of each task it has started:
//!
//! ```text
//! (none) --start--> Starting --ok--> Running --stop--> Stopping --ok--> (none)
//!                      └─err/timeout─> (none)           └─err/timeout─> Running
//! ```
//!
//! Slots are reserved under a short lock; runtime calls happen outside it and
//! are bounded by a deadline. There is no automatic restart. Container names
//! are derived from task ids, so a container that came up after its start
//! timed out is found and adopted by the next start.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{IncubatorError, IncubatorResult};
use crate::model::{RobotId, Task, TaskId};
use crate::runtime::{ContainerRuntime, ContainerSpec, InstanceHandle, NetworkHandle, RuntimeError};

/// Prefix of every skill container name
pub const CONTAINER_PREFIX: &str = "rallf_task_";

/// Deterministic container name for a task
pub fn container_name(task: &TaskId) -> String {
    format!("{}{}", CONTAINER_PREFIX, task)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Starting,
    Running(InstanceHandle),
    Stopping(InstanceHandle),
}

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Deadline for a single runtime start/stop call
    pub runtime_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            runtime_timeout: Duration::from_secs(30),
        }
    }
}

/// Task -> running instance mapping
pub struct Scheduler {
    runtime: Arc<dyn ContainerRuntime>,
    slots: Mutex<HashMap<TaskId, Slot>>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: SchedulerConfig) -> Self {
        Self {
            runtime,
            slots: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Launch an instance of `task.image` on `network`
    ///
    /// Fails with `AlreadyRunning` if the task already has a slot. A live
    /// container already holding the task's name is adopted instead of
    /// launched again; a dead one is removed first. On timeout the slot is
    /// released and the caller keeps the task pending.
    pub async fn start(&self, task: &Task, network: &NetworkHandle) -> IncubatorResult<InstanceHandle> {
        {
            let mut slots = self.slots.lock();
            if slots.contains_key(&task.id) {
                return Err(IncubatorError::AlreadyRunning(task.id.to_string()));
            }
            slots.insert(task.id.clone(), Slot::Starting);
        }

        let spec = self.container_spec(task, network);
        debug!("Starting {} from {} on {}", spec.name, spec.image, network);

        let limit = self.config.runtime_timeout;
        let outcome = tokio::time::timeout(limit, self.launch(&spec)).await;

        let mut slots = self.slots.lock();
        match outcome {
            Ok(Ok(handle)) => {
                slots.insert(task.id.clone(), Slot::Running(handle.clone()));
                info!("Task {} running as {}", task.id, handle);
                Ok(handle)
            }
            Ok(Err(e)) => {
                slots.remove(&task.id);
                warn!("Task {} failed to start: {}", task.id, e);
                Err(e.into())
            }
            Err(_) => {
                slots.remove(&task.id);
                warn!("Task {} start timed out after {:?}", task.id, limit);
                Err(IncubatorError::RuntimeTimeout {
                    operation: "start",
                    after: limit,
                })
            }
        }
    }

    async fn launch(&self, spec: &ContainerSpec) -> Result<InstanceHandle, RuntimeError> {
        match self.runtime.start_container(spec).await {
            Err(RuntimeError::NameConflict(_)) => match self.runtime.inspect_container(&spec.name).await? {
                Some(existing) if existing.running => {
                    info!("Adopting live container {} ({})", spec.name, existing.handle);
                    Ok(existing.handle)
                }
                Some(stale) => {
                    debug!("Removing stale container {} ({})", spec.name, stale.handle);
                    self.runtime.stop_container(&stale.handle).await?;
                    self.runtime.start_container(spec).await
                }
                None => self.runtime.start_container(spec).await,
            },
            other => other,
        }
    }

    /// Stop and remove the running instance of `task`
    ///
    /// Fails with `NotRunning` unless the task has a running slot. On
    /// timeout the task keeps its running slot.
    pub async fn stop(&self, task: &TaskId) -> IncubatorResult<()> {
        let handle = {
            let mut slots = self.slots.lock();
            match slots.get(task) {
                Some(Slot::Running(handle)) => {
                    let handle = handle.clone();
                    slots.insert(task.clone(), Slot::Stopping(handle.clone()));
                    handle
                }
                _ => return Err(IncubatorError::NotRunning(task.to_string())),
            }
        };

        debug!("Stopping task {} ({})", task, handle);

        let limit = self.config.runtime_timeout;
        let outcome = tokio::time::timeout(limit, self.runtime.stop_container(&handle)).await;

        let mut slots = self.slots.lock();
        match outcome {
            Ok(Ok(())) => {
                slots.remove(task);
                info!("Task {} stopped", task);
                Ok(())
            }
            Ok(Err(e)) => {
                slots.insert(task.clone(), Slot::Running(handle));
                warn!("Task {} failed to stop: {}", task, e);
                Err(e.into())
            }
            Err(_) => {
                slots.insert(task.clone(), Slot::Running(handle));
                warn!("Task {} stop timed out after {:?}", task, limit);
                Err(IncubatorError::RuntimeTimeout {
                    operation: "stop",
                    after: limit,
                })
            }
        }
    }

    /// Remove the container named after an untracked `task`, if one exists
    ///
    /// Best effort: failures are logged, never returned. Tasks with a slot
    /// are left alone.
    pub async fn reap(&self, task: &TaskId) {
        let tracked = self.slots.lock().contains_key(task);
        if tracked {
            return;
        }

        let name = container_name(task);
        let outcome = tokio::time::timeout(self.config.runtime_timeout, async {
            match self.runtime.inspect_container(&name).await? {
                Some(found) => self.runtime.stop_container(&found.handle).await.map(|_| true),
                None => Ok::<_, RuntimeError>(false),
            }
        })
        .await;

        match outcome {
            Ok(Ok(true)) => info!("Removed leftover container {}", name),
            Ok(Ok(false)) => {}
            Ok(Err(e)) => warn!("Could not remove leftover container {}: {}", name, e),
            Err(_) => warn!("Removing leftover container {} timed out", name),
        }
    }

    /// Track an instance found alive on the runtime (reconciliation)
    pub fn adopt(&self, task: &TaskId, handle: InstanceHandle) {
        debug!("Adopting {} for task {}", handle, task);
        self.slots.lock().insert(task.clone(), Slot::Running(handle));
    }

    /// Forget any slot for `task` without touching the runtime
    pub fn release(&self, task: &TaskId) {
        self.slots.lock().remove(task);
    }

    /// Drop every slot (used before a catalog reload)
    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    pub fn is_running(&self, task: &TaskId) -> bool {
        matches!(self.slots.lock().get(task), Some(Slot::Running(_)))
    }

    pub fn handle_of(&self, task: &TaskId) -> Option<InstanceHandle> {
        match self.slots.lock().get(task) {
            Some(Slot::Running(h)) | Some(Slot::Stopping(h)) => Some(h.clone()),
            _ => None,
        }
    }

    /// Number of tasks with a live or transitioning instance
    pub fn tracked(&self) -> usize {
        self.slots.lock().len()
    }

    fn container_spec(&self, task: &Task, network: &NetworkHandle) -> ContainerSpec {
        let mut labels = BTreeMap::new();
        labels.insert("rallf.task".to_string(), task.id.to_string());
        if let Some(robot) = task.robot.as_ref().map(RobotId::to_string) {
            labels.insert("rallf.robot".to_string(), robot);
        }

        ContainerSpec {
            name: container_name(&task.id),
            image: task.image.clone(),
            network: network.clone(),
            labels,
            auto_remove: true,
        }
    }
}
