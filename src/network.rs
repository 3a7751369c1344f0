//! Tasks Network Management
//!
//! Create-or-get for the isolated network every skill container joins.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{IncubatorError, IncubatorResult};
use crate::runtime::{ContainerRuntime, NetworkHandle, RuntimeError};

/// The network record owned by the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    pub name: String,
    pub handle: NetworkHandle,
}

/// Ensures named networks exist on the runtime
pub struct NetworkManager {
    runtime: Arc<dyn ContainerRuntime>,
    network: Mutex<Option<Network>>,
}

impl NetworkManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            network: Mutex::new(None),
        }
    }

    /// Return the handle of network `name`, creating it if needed
    ///
    /// Calls are serialized, so concurrent callers trigger at most one
    /// creation. An existing network that is not a local bridge fails with
    /// `NetworkConflict`.
    pub async fn ensure(&self, name: &str) -> IncubatorResult<NetworkHandle> {
        let mut slot = self.network.lock().await;

        if let Some(ref network) = *slot {
            if network.name == name {
                debug!("Network {} already ensured ({})", name, network.handle);
                return Ok(network.handle.clone());
            }
        }

        let handle = match self.runtime.inspect_network(name).await? {
            Some(existing) if existing.is_compatible() => {
                info!("Reusing network {} ({})", name, existing.handle);
                existing.handle
            }
            Some(existing) => {
                warn!(
                    "Network {} exists with driver={} scope={}",
                    name, existing.driver, existing.scope
                );
                return Err(IncubatorError::NetworkConflict(format!(
                    "{} exists but is a {}/{} network, expected bridge/local",
                    name, existing.driver, existing.scope
                )));
            }
            None => match self.runtime.create_network(name).await {
                Ok(handle) => {
                    info!("Created network {} ({})", name, handle);
                    handle
                }
                Err(RuntimeError::NameConflict(msg)) => {
                    return Err(IncubatorError::NetworkConflict(msg));
                }
                Err(e) => return Err(e.into()),
            },
        };

        *slot = Some(Network {
            name: name.to_string(),
            handle: handle.clone(),
        });
        Ok(handle)
    }

    /// The ensured network, if any
    pub async fn current(&self) -> Option<Network> {
        self.network.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::InMemoryRuntime;
    use std::sync::atomic::Ordering;

    const NAME: &str = "rallf_tasks_network";

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let runtime = Arc::new(InMemoryRuntime::new());
        let manager = NetworkManager::new(runtime.clone());

        let first = manager.ensure(NAME).await.unwrap();
        let second = manager.ensure(NAME).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(runtime.calls.networks_created.load(Ordering::SeqCst), 1);
        assert_eq!(manager.current().await.unwrap().name, NAME);
    }

    #[tokio::test]
    async fn test_reuses_existing_network() {
        let runtime = Arc::new(InMemoryRuntime::new());
        let existing = runtime.insert_network(NAME, "bridge", "local");

        // a fresh manager stands in for a restarted daemon
        let manager = NetworkManager::new(runtime.clone());
        let handle = manager.ensure(NAME).await.unwrap();

        assert_eq!(handle, existing);
        assert_eq!(runtime.calls.networks_created.load(Ordering::SeqCst), 0);
        assert_eq!(runtime.network_count(), 1);
    }

    #[tokio::test]
    async fn test_incompatible_network_conflicts() {
        let runtime = Arc::new(InMemoryRuntime::new());
        runtime.insert_network(NAME, "overlay", "swarm");

        let manager = NetworkManager::new(runtime);
        let err = manager.ensure(NAME).await.unwrap_err();
        assert!(matches!(err, IncubatorError::NetworkConflict(_)));
    }

    #[tokio::test]
    async fn test_unavailable_runtime() {
        let runtime = Arc::new(InMemoryRuntime::new());
        runtime.set_unavailable(true);

        let manager = NetworkManager::new(runtime);
        let err = manager.ensure(NAME).await.unwrap_err();
        assert!(matches!(err, IncubatorError::RuntimeUnavailable(_)));
        assert!(manager.current().await.is_none());
    }
}
