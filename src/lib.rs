//! Rallf Incubator
//!
//! Control-plane daemon for a fleet of robots and their containerized skills.
//!
//! # Architecture
//!
//! ```text
//! rallf CLI ──► JSON-RPC/HTTP ──► ControlPlane ──► Daemon
//!                  (:4000)                          │
//!                                                   ├── EntityRegistry (robots + skills)
//!                                                   ├── Scheduler (task -> container)
//!                                                   └── NetworkManager (rallf_tasks_network)
//!                                                              │
//!                                                   ContainerRuntime (docker CLI / in-memory)
//! ```

pub mod client;
pub mod config;
pub mod daemon;
pub mod error;
pub mod model;
pub mod network;
pub mod registry;
pub mod rpc;
pub mod runtime;
pub mod scheduler;
pub mod server;

pub use client::{IncubatorControl, RpcClient};
pub use config::{Config, RuntimeKind, TASKS_NETWORK_NAME};
pub use daemon::Daemon;
pub use error::{ErrorCategory, IncubatorError, IncubatorResult};
pub use model::{Robot, RobotId, Snapshot, Task, TaskId, TaskState};
pub use network::{Network, NetworkManager};
pub use registry::EntityRegistry;
pub use rpc::{Call, ControlPlane, Method, RpcRequest, RpcResponse};
pub use runtime::{ContainerRuntime, DockerCli, InMemoryRuntime, RuntimeError};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use server::RpcServer;
