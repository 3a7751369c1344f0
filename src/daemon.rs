//! Incubator Daemon
//!
//! One explicit instance, built once at process start, owning the network
//! manager, the scheduler and the entity registry.
//!
//! Startup order:
//! 1. ping the container runtime
//! 2. ensure the tasks network
//! 3. load the catalog snapshot (or the packaged template) and reconcile it

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{Config, RuntimeKind};
use crate::error::{IncubatorError, IncubatorResult};
use crate::model::Snapshot;
use crate::network::NetworkManager;
use crate::registry::EntityRegistry;
use crate::runtime::{ContainerRuntime, DockerCli, InMemoryRuntime};
use crate::scheduler::{Scheduler, SchedulerConfig};

/// Catalog used when no snapshot exists yet
pub const DEFAULT_SNAPSHOT: &str = include_str!("../config/daemon.json.dist");

/// The running daemon
pub struct Daemon {
    network: NetworkManager,
    registry: EntityRegistry,
    snapshot_path: PathBuf,
    persist_lock: Mutex<()>,
}

impl Daemon {
    /// Pick the runtime named by the configuration
    pub fn runtime_from_config(config: &Config) -> Arc<dyn ContainerRuntime> {
        match config.runtime {
            RuntimeKind::Docker => Arc::new(DockerCli::new(config.docker.clone())),
            RuntimeKind::Memory => {
                warn!("Using in-memory container runtime; skills will not really run");
                Arc::new(InMemoryRuntime::new())
            }
        }
    }

    /// Bring the daemon up on `runtime`
    pub async fn start(config: &Config, runtime: Arc<dyn ContainerRuntime>) -> IncubatorResult<Self> {
        info!("Connecting to {} runtime", runtime.name());
        runtime.ping().await?;

        let network = NetworkManager::new(runtime.clone());
        let handle = network.ensure(&config.network_name).await?;

        let scheduler = Arc::new(Scheduler::new(
            runtime,
            SchedulerConfig {
                runtime_timeout: config.runtime_timeout,
            },
        ));
        let registry = EntityRegistry::new(scheduler, handle);

        let snapshot = read_snapshot(&config.snapshot_path).await?;
        registry.load(snapshot).await?;

        Ok(Self {
            network,
            registry,
            snapshot_path: config.snapshot_path.clone(),
            persist_lock: Mutex::new(()),
        })
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn network(&self) -> &NetworkManager {
        &self.network
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Snapshot the catalog and write it to disk
    ///
    /// The snapshot is taken under the catalog lock, so it never observes a
    /// half-applied mutation. Writes are serialized and atomic.
    pub async fn export(&self) -> IncubatorResult<Snapshot> {
        let _guard = self.persist_lock.lock().await;

        let snapshot = self.registry.export();
        write_snapshot(&self.snapshot_path, &snapshot).await?;

        info!(
            "Exported {} robots to {}",
            snapshot.robots.len(),
            self.snapshot_path.display()
        );
        Ok(snapshot)
    }

    /// Stubbed sign-in: any non-empty credentials get an opaque token
    pub fn login(&self, username: &str, password: &str) -> IncubatorResult<String> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(IncubatorError::AuthFailed(
                "username and password are required".to_string(),
            ));
        }

        let mut hasher = Sha256::new();
        hasher.update(username.as_bytes());
        hasher.update(b":");
        hasher.update(uuid::Uuid::new_v4().as_bytes());
        let token = hex::encode(hasher.finalize());

        debug!("Issued session token for {}", username);
        Ok(token)
    }
}

/// Read the snapshot at `path`, falling back to the packaged template
pub async fn read_snapshot(path: &Path) -> IncubatorResult<Snapshot> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => {
            let snapshot = Snapshot::from_json(&raw)?;
            info!(
                "Read {} robots ({} skills) from {}",
                snapshot.robots.len(),
                snapshot.task_count(),
                path.display()
            );
            Ok(snapshot)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("{} not found, starting from default catalog", path.display());
            Ok(Snapshot::from_json(DEFAULT_SNAPSHOT)?)
        }
        Err(e) => Err(e.into()),
    }
}

/// Write `snapshot` to `path` through a temp file and rename
pub async fn write_snapshot(path: &Path, snapshot: &Snapshot) -> IncubatorResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, snapshot.to_json_pretty()?).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
