//! Docker runtime backed by the `docker` CLI
//!
//! Every operation is a single `docker` invocation. The endpoint is passed
//! through `DOCKER_HOST`, so the daemon can drive a mounted socket or a
//! remote engine alike.

use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{
    ContainerInfo, ContainerRuntime, ContainerSpec, InstanceHandle, NetworkHandle, NetworkInfo,
    RuntimeError,
};

/// Docker CLI configuration
#[derive(Debug, Clone)]
pub struct DockerConfig {
    /// Path or name of the docker binary
    pub binary: String,
    /// Engine endpoint, e.g. `unix:///var/run/docker.sock`
    pub endpoint: Option<String>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            endpoint: None,
        }
    }
}

/// Container runtime driving the docker CLI
#[derive(Debug, Clone)]
pub struct DockerCli {
    config: DockerConfig,
}

#[derive(Debug, Deserialize)]
struct NetworkInspect {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Driver", default)]
    driver: String,
    #[serde(rename = "Scope", default)]
    scope: String,
}

#[derive(Debug, Deserialize)]
struct ContainerInspect {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "State")]
    state: ContainerState,
}

#[derive(Debug, Deserialize)]
struct ContainerState {
    #[serde(rename = "Running", default)]
    running: bool,
}

impl DockerCli {
    pub fn new(config: DockerConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(DockerConfig::default())
    }

    /// Run `docker <args>` and return trimmed stdout
    pub async fn docker(&self, args: &[&str]) -> Result<String, RuntimeError> {
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref endpoint) = self.config.endpoint {
            cmd.env("DOCKER_HOST", endpoint);
        }

        debug!("docker {}", args.join(" "));

        let output = cmd.output().await.map_err(|e| {
            RuntimeError::Unavailable(format!("failed to run {}: {}", self.config.binary, e))
        })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(classify_failure(&stderr))
    }
}

/// Map docker CLI stderr onto a runtime error
fn classify_failure(stderr: &str) -> RuntimeError {
    let lower = stderr.to_lowercase();

    if lower.contains("cannot connect to the docker daemon")
        || lower.contains("error during connect")
        || lower.contains("is the docker daemon running")
    {
        RuntimeError::Unavailable(stderr.to_string())
    } else if lower.contains("is already in use") || lower.contains("already exists") {
        RuntimeError::NameConflict(stderr.to_string())
    } else if lower.contains("no such") || lower.contains("not found") {
        RuntimeError::NotFound(stderr.to_string())
    } else {
        RuntimeError::Failed(stderr.to_string())
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker(&["version", "--format", "{{.Server.Version}}"])
            .await
            .map(|version| debug!("Docker engine {}", version))
    }

    async fn inspect_network(&self, name: &str) -> Result<Option<NetworkInfo>, RuntimeError> {
        match self
            .docker(&["network", "inspect", "--format", "{{json .}}", name])
            .await
        {
            Ok(raw) => {
                let parsed: NetworkInspect = serde_json::from_str(&raw)
                    .map_err(|e| RuntimeError::Failed(format!("unexpected network inspect output: {}", e)))?;
                Ok(Some(NetworkInfo {
                    handle: NetworkHandle(parsed.id),
                    name: parsed.name,
                    driver: parsed.driver,
                    scope: parsed.scope,
                }))
            }
            Err(RuntimeError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_network(&self, name: &str) -> Result<NetworkHandle, RuntimeError> {
        let id = self
            .docker(&[
                "network",
                "create",
                "--driver",
                "bridge",
                "--label",
                "rallf.managed=true",
                name,
            ])
            .await?;
        Ok(NetworkHandle(id))
    }

    async fn start_container(&self, spec: &ContainerSpec) -> Result<InstanceHandle, RuntimeError> {
        let labels: Vec<String> = spec
            .labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let mut args: Vec<&str> = vec![
            "run",
            "--detach",
            "--name",
            spec.name.as_str(),
            "--network",
            spec.network.0.as_str(),
        ];
        if spec.auto_remove {
            args.push("--rm");
        }
        for label in &labels {
            args.push("--label");
            args.push(label.as_str());
        }
        args.push(spec.image.as_str());

        let id = self.docker(&args).await?;
        Ok(InstanceHandle(id))
    }

    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>, RuntimeError> {
        match self
            .docker(&["container", "inspect", "--format", "{{json .}}", name])
            .await
        {
            Ok(raw) => {
                let parsed: ContainerInspect = serde_json::from_str(&raw)
                    .map_err(|e| RuntimeError::Failed(format!("unexpected container inspect output: {}", e)))?;
                Ok(Some(ContainerInfo {
                    handle: InstanceHandle(parsed.id),
                    name: parsed.name.trim_start_matches('/').to_string(),
                    running: parsed.state.running,
                }))
            }
            Err(RuntimeError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn stop_container(&self, handle: &InstanceHandle) -> Result<(), RuntimeError> {
        match self.docker(&["stop", handle.0.as_str()]).await {
            Ok(_) | Err(RuntimeError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        // --rm containers vanish on stop; anything left behind is removed here
        match self.docker(&["rm", "--force", handle.0.as_str()]).await {
            Ok(_) | Err(RuntimeError::NotFound(_)) => Ok(()),
            Err(RuntimeError::Failed(msg)) if msg.contains("already in progress") => Ok(()),
            Err(e) => {
                warn!("Container {} stopped but not removed: {}", handle, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_unavailable() {
        let err = classify_failure(
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock. Is the docker daemon running?",
        );
        assert!(matches!(err, RuntimeError::Unavailable(_)));
    }

    #[test]
    fn test_classify_name_conflict() {
        let err = classify_failure(
            "docker: Error response from daemon: Conflict. The container name \"/rallf_task_1\" is already in use by container \"abc\".",
        );
        assert!(matches!(err, RuntimeError::NameConflict(_)));
    }

    #[test]
    fn test_classify_not_found() {
        assert!(matches!(
            classify_failure("Error: No such network: rallf_tasks_network"),
            RuntimeError::NotFound(_)
        ));
        assert!(matches!(
            classify_failure("Error response from daemon: network rallf_tasks_network not found"),
            RuntimeError::NotFound(_)
        ));
    }

    #[test]
    fn test_classify_other() {
        assert!(matches!(
            classify_failure("invalid reference format"),
            RuntimeError::Failed(_)
        ));
    }

    #[test]
    fn test_parse_network_inspect() {
        let raw = r#"{"Name":"rallf_tasks_network","Id":"f00","Scope":"local","Driver":"bridge","Labels":{}}"#;
        let parsed: NetworkInspect = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.id, "f00");
        assert_eq!(parsed.name, "rallf_tasks_network");
        assert_eq!(parsed.driver, "bridge");
        assert_eq!(parsed.scope, "local");
    }

    #[test]
    fn test_parse_container_inspect() {
        let raw = r#"{"Id":"abc","Name":"/rallf_task_1","State":{"Status":"running","Running":true}}"#;
        let parsed: ContainerInspect = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.id, "abc");
        assert!(parsed.state.running);
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let cli = DockerCli::new(DockerConfig {
            binary: "/nonexistent/docker-binary".to_string(),
            endpoint: None,
        });
        let err = cli.ping().await.unwrap_err();
        assert!(matches!(err, RuntimeError::Unavailable(_)));
    }
}
