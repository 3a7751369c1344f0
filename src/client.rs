//! Incubator Client
//!
//! What the `rallf` CLI needs: a JSON-RPC client for the control plane and
//! the operational commands that start or stop the incubator container
//! itself. Detecting an already running incubator is done here, not in the
//! daemon.

use reqwest::Client;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info};

use crate::runtime::docker::{DockerCli, DockerConfig};
use crate::runtime::{ContainerRuntime, RuntimeError};

/// Default control plane URL
pub const DEFAULT_URL: &str = "http://localhost:4000";

/// Incubator image and container name
pub const INCUBATOR_IMAGE: &str = "rallf/incubator:latest";
pub const INCUBATOR_CONTAINER: &str = "incubator";

/// Volume holding `/config/daemon.json`
pub const CONFIG_VOLUME: &str = "rallf_config";

/// Default docker endpoint
pub const DEFAULT_DOCKER_ENDPOINT: &str = "unix:///var/run/docker.sock";

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{message}")]
    Rpc { code: i32, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Response id {got} does not match request id {expected}")]
    IdMismatch { expected: u64, got: Value },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Incubator is already running")]
    AlreadyRunning,

    #[error("Incubator is not running")]
    NotRunning,

    #[error("Docker error: {0}")]
    Docker(#[from] RuntimeError),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// JSON-RPC client for the control plane
#[derive(Debug)]
pub struct RpcClient {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Call `method` and return its result
    pub async fn call(&self, method: &str, params: Value) -> ClientResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });

        debug!("→ {}", payload);
        let response: Value = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!("← {}", response);

        if response.get("id") != Some(&json!(id)) {
            return Err(ClientError::IdMismatch {
                expected: id,
                got: response.get("id").cloned().unwrap_or(Value::Null),
            });
        }

        if let Some(err) = response.get("error") {
            return Err(ClientError::Rpc {
                code: err.get("code").and_then(Value::as_i64).unwrap_or(0) as i32,
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }

        response
            .get("result")
            .cloned()
            .ok_or_else(|| ClientError::Malformed("neither result nor error".to_string()))
    }
}

/// Options for `rallf incubator start`
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Restart with the docker engine instead of being removed on exit
    pub persistent: bool,
    /// Mount this source tree read-only at `/incubator` and enable debug
    pub dev_source: Option<PathBuf>,
}

/// Starts and stops the incubator container
pub struct IncubatorControl {
    docker: DockerCli,
    endpoint: String,
}

impl IncubatorControl {
    pub fn new(endpoint: Option<String>) -> Self {
        let endpoint = endpoint.unwrap_or_else(|| DEFAULT_DOCKER_ENDPOINT.to_string());
        let docker = DockerCli::new(DockerConfig {
            binary: "docker".to_string(),
            endpoint: Some(endpoint.clone()),
        });
        Self { docker, endpoint }
    }

    /// Whether the incubator container is up
    pub async fn is_running(&self) -> ClientResult<bool> {
        Ok(self
            .docker
            .inspect_container(INCUBATOR_CONTAINER)
            .await?
            .map(|c| c.running)
            .unwrap_or(false))
    }

    /// Fail with `NotRunning` unless the incubator is up
    pub async fn require_running(&self) -> ClientResult<()> {
        if self.is_running().await? {
            Ok(())
        } else {
            Err(ClientError::NotRunning)
        }
    }

    pub async fn start(&self, options: &StartOptions) -> ClientResult<()> {
        if self.docker.inspect_container(INCUBATOR_CONTAINER).await?.is_some() {
            return Err(ClientError::AlreadyRunning);
        }

        self.docker
            .docker(&["volume", "create", "--driver", "local", CONFIG_VOLUME])
            .await?;

        let args = incubator_run_args(&self.endpoint, options);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let id = self.docker.docker(&args).await?;

        info!("Incubator started ({})", id);
        Ok(())
    }

    pub async fn stop(&self) -> ClientResult<()> {
        self.require_running().await?;
        self.docker.docker(&["kill", INCUBATOR_CONTAINER]).await?;
        info!("Incubator stopped");
        Ok(())
    }
}

/// `docker run` arguments for the incubator container
fn incubator_run_args(endpoint: &str, options: &StartOptions) -> Vec<String> {
    let socket = endpoint.strip_prefix("unix://").unwrap_or("/var/run/docker.sock");

    let mut args: Vec<String> = vec![
        "run".into(),
        "--detach".into(),
        "--name".into(),
        INCUBATOR_CONTAINER.into(),
        "--volume".into(),
        format!("{}:/config:rw", CONFIG_VOLUME),
        "--volume".into(),
        format!("{}:/var/run/docker.sock:rw", socket),
        "--publish".into(),
        "4000:4000".into(),
    ];

    if options.persistent {
        args.push("--restart".into());
        args.push("unless-stopped".into());
    } else {
        args.push("--rm".into());
    }

    if let Some(ref source) = options.dev_source {
        args.push("--volume".into());
        args.push(format!("{}:/incubator:ro", source.display()));
        args.push("--env".into());
        args.push("DEBUG=yes".into());
    }

    args.push(INCUBATOR_IMAGE.into());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_default() {
        let args = incubator_run_args(DEFAULT_DOCKER_ENDPOINT, &StartOptions::default());
        assert!(args.contains(&"rallf_config:/config:rw".to_string()));
        assert!(args.contains(&"/var/run/docker.sock:/var/run/docker.sock:rw".to_string()));
        assert!(args.contains(&"4000:4000".to_string()));
        assert!(args.contains(&"--rm".to_string()));
        assert_eq!(args.last().unwrap(), INCUBATOR_IMAGE);
    }

    #[test]
    fn test_run_args_dev_and_persistent() {
        let options = StartOptions {
            persistent: true,
            dev_source: Some(PathBuf::from("/src/incubator")),
        };
        let args = incubator_run_args("unix:///tmp/docker.sock", &options);

        assert!(args.contains(&"/tmp/docker.sock:/var/run/docker.sock:rw".to_string()));
        assert!(args.contains(&"/src/incubator:/incubator:ro".to_string()));
        assert!(args.contains(&"DEBUG=yes".to_string()));
        assert!(args.contains(&"unless-stopped".to_string()));
        assert!(!args.contains(&"--rm".to_string()));
    }

    #[test]
    fn test_rpc_error_displays_message() {
        let err = ClientError::Rpc {
            code: -32001,
            message: "delete_robot: Robot not found: r1".to_string(),
        };
        assert_eq!(err.to_string(), "delete_robot: Robot not found: r1");
    }
}
