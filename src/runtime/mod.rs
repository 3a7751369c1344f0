//! Container Runtime Abstraction
//!
//! The incubator never talks to a container engine directly. Everything goes
//! through [`ContainerRuntime`], which has two implementations:
//!
//! - [`DockerCli`]: shells out to the `docker` binary
//! - [`InMemoryRuntime`]: in-process fake used by tests and `INCUBATOR_RUNTIME=memory`

pub mod docker;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub use docker::DockerCli;
pub use memory::InMemoryRuntime;

/// Errors reported by a container runtime
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("{0}")]
    Unavailable(String),

    #[error("name already in use: {0}")]
    NameConflict(String),

    #[error("no such object: {0}")]
    NotFound(String),

    #[error("{0}")]
    Failed(String),
}

/// Opaque reference to a runtime network
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkHandle(pub String);

/// Opaque reference to a running container
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceHandle(pub String);

impl fmt::Display for NetworkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the runtime reports about an existing network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub handle: NetworkHandle,
    pub name: String,
    pub driver: String,
    pub scope: String,
}

impl NetworkInfo {
    /// Only local bridge networks can host skill containers
    pub fn is_compatible(&self) -> bool {
        self.driver == "bridge" && self.scope == "local"
    }
}

/// What the runtime reports about an existing container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub handle: InstanceHandle,
    pub name: String,
    pub running: bool,
}

/// Everything needed to launch one skill container
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub network: NetworkHandle,
    pub labels: BTreeMap<String, String>,
    /// Remove the container as soon as it exits
    pub auto_remove: bool,
}

/// Capability to manage networks and containers
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Short name for logs ("docker", "memory")
    fn name(&self) -> &'static str;

    /// Check that the runtime is reachable
    async fn ping(&self) -> Result<(), RuntimeError>;

    /// Look up a network by name
    async fn inspect_network(&self, name: &str) -> Result<Option<NetworkInfo>, RuntimeError>;

    /// Create a local bridge network
    async fn create_network(&self, name: &str) -> Result<NetworkHandle, RuntimeError>;

    /// Launch a detached container
    async fn start_container(&self, spec: &ContainerSpec) -> Result<InstanceHandle, RuntimeError>;

    /// Look up a container by name or id
    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>, RuntimeError>;

    /// Stop a container and make sure it is removed
    async fn stop_container(&self, handle: &InstanceHandle) -> Result<(), RuntimeError>;
}
