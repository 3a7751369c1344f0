//! In-memory container runtime
//!
//! Keeps networks and containers in a map. Used by the test suite and by
//! `INCUBATOR_RUNTIME=memory` to run the daemon without a container engine.
//! Faults can be injected to exercise the unavailable/timeout paths.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use super::{
    ContainerInfo, ContainerRuntime, ContainerSpec, InstanceHandle, NetworkHandle, NetworkInfo,
    RuntimeError,
};

#[derive(Debug, Clone)]
struct FakeContainer {
    handle: InstanceHandle,
    image: String,
    network: NetworkHandle,
    running: bool,
    auto_remove: bool,
}

#[derive(Debug, Default)]
struct State {
    networks: HashMap<String, NetworkInfo>,
    containers: HashMap<String, FakeContainer>,
}

/// Call counters, handy for idempotency assertions
#[derive(Debug, Default)]
pub struct RuntimeCalls {
    pub networks_created: AtomicU64,
    pub containers_started: AtomicU64,
    pub containers_stopped: AtomicU64,
}

/// In-process [`ContainerRuntime`]
#[derive(Debug, Default)]
pub struct InMemoryRuntime {
    state: Mutex<State>,
    next_id: AtomicU64,
    unavailable: AtomicBool,
    /// Artificial latency in milliseconds for start/stop
    latency_ms: AtomicU64,
    pub calls: RuntimeCalls,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable engine
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every start/stop by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Register a pre-existing network, as if created by someone else
    pub fn insert_network(&self, name: &str, driver: &str, scope: &str) -> NetworkHandle {
        let handle = NetworkHandle(self.fresh_id("net"));
        self.state.lock().networks.insert(
            name.to_string(),
            NetworkInfo {
                handle: handle.clone(),
                name: name.to_string(),
                driver: driver.to_string(),
                scope: scope.to_string(),
            },
        );
        handle
    }

    /// Simulate a container that crashed and was auto-removed
    pub fn kill(&self, name: &str) {
        let mut state = self.state.lock();
        let remove = match state.containers.get_mut(name) {
            Some(c) => {
                c.running = false;
                c.auto_remove
            }
            None => false,
        };
        if remove {
            state.containers.remove(name);
        }
    }

    /// Number of containers currently running
    pub fn running_count(&self) -> usize {
        self.state.lock().containers.values().filter(|c| c.running).count()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.state
            .lock()
            .containers
            .get(name)
            .map(|c| c.running)
            .unwrap_or(false)
    }

    /// Image and network of a known container
    pub fn container(&self, name: &str) -> Option<(String, NetworkHandle)> {
        self.state
            .lock()
            .containers
            .get(name)
            .map(|c| (c.image.clone(), c.network.clone()))
    }

    pub fn network_count(&self) -> usize {
        self.state.lock().networks.len()
    }

    fn fresh_id(&self, prefix: &str) -> String {
        format!("{}-{:06}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn check_available(&self) -> Result<(), RuntimeError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RuntimeError::Unavailable(
                "in-memory runtime is marked unavailable".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    async fn simulate_latency(&self) {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), RuntimeError> {
        self.check_available()
    }

    async fn inspect_network(&self, name: &str) -> Result<Option<NetworkInfo>, RuntimeError> {
        self.check_available()?;
        Ok(self.state.lock().networks.get(name).cloned())
    }

    async fn create_network(&self, name: &str) -> Result<NetworkHandle, RuntimeError> {
        self.check_available()?;
        let mut state = self.state.lock();
        if state.networks.contains_key(name) {
            return Err(RuntimeError::NameConflict(name.to_string()));
        }
        let handle = NetworkHandle(self.fresh_id("net"));
        state.networks.insert(
            name.to_string(),
            NetworkInfo {
                handle: handle.clone(),
                name: name.to_string(),
                driver: "bridge".to_string(),
                scope: "local".to_string(),
            },
        );
        self.calls.networks_created.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    async fn start_container(&self, spec: &ContainerSpec) -> Result<InstanceHandle, RuntimeError> {
        self.check_available()?;
        self.simulate_latency().await;

        let mut state = self.state.lock();
        if !state.networks.values().any(|n| n.handle == spec.network) {
            return Err(RuntimeError::NotFound(format!("network {}", spec.network)));
        }
        if state.containers.contains_key(&spec.name) {
            return Err(RuntimeError::NameConflict(spec.name.clone()));
        }

        let handle = InstanceHandle(self.fresh_id("ctr"));
        state.containers.insert(
            spec.name.clone(),
            FakeContainer {
                handle: handle.clone(),
                image: spec.image.clone(),
                network: spec.network.clone(),
                running: true,
                auto_remove: spec.auto_remove,
            },
        );
        self.calls.containers_started.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>, RuntimeError> {
        self.check_available()?;
        let state = self.state.lock();
        let found = state
            .containers
            .iter()
            .find(|(n, c)| n.as_str() == name || c.handle.0 == name)
            .map(|(n, c)| ContainerInfo {
                handle: c.handle.clone(),
                name: n.clone(),
                running: c.running,
            });
        Ok(found)
    }

    async fn stop_container(&self, handle: &InstanceHandle) -> Result<(), RuntimeError> {
        self.check_available()?;
        self.simulate_latency().await;

        let mut state = self.state.lock();
        state.containers.retain(|_, c| &c.handle != handle);
        self.calls.containers_stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
