//! Configuration management

use anyhow::{bail, Context, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::runtime::docker::DockerConfig;

/// Name of the isolated network every skill container joins
pub const TASKS_NETWORK_NAME: &str = "rallf_tasks_network";

/// Port the control plane listens on
pub const DEFAULT_RPC_PORT: u16 = 4000;

/// Which container runtime backs the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    Docker,
    Memory,
}

impl RuntimeKind {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "memory" | "mem" => Ok(Self::Memory),
            other => bail!("unknown INCUBATOR_RUNTIME '{}' (expected docker or memory)", other),
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address for the RPC server
    pub bind_addr: IpAddr,

    /// RPC port
    pub port: u16,

    /// Catalog snapshot path (missing file = packaged template)
    pub snapshot_path: PathBuf,

    /// Name of the tasks network
    pub network_name: String,

    /// Container runtime backend
    pub runtime: RuntimeKind,

    /// Docker CLI settings (docker runtime only)
    pub docker: DockerConfig,

    /// Deadline for each runtime start/stop call
    pub runtime_timeout: Duration,

    /// Log HTTP requests
    pub log_requests: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_RPC_PORT,
            snapshot_path: PathBuf::from("/config/daemon.json"),
            network_name: TASKS_NETWORK_NAME.to_string(),
            runtime: RuntimeKind::Docker,
            docker: DockerConfig::default(),
            runtime_timeout: Duration::from_secs(30),
            log_requests: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("INCUBATOR_BIND_ADDR") {
            config.bind_addr = addr
                .parse()
                .with_context(|| format!("invalid INCUBATOR_BIND_ADDR '{}'", addr))?;
        }

        if let Ok(port) = std::env::var("INCUBATOR_PORT") {
            config.port = port
                .parse()
                .with_context(|| format!("invalid INCUBATOR_PORT '{}'", port))?;
        }

        if let Ok(path) = std::env::var("INCUBATOR_CONFIG") {
            config.snapshot_path = PathBuf::from(path);
        }

        if let Ok(name) = std::env::var("INCUBATOR_NETWORK") {
            config.network_name = name;
        }

        if let Ok(kind) = std::env::var("INCUBATOR_RUNTIME") {
            config.runtime = RuntimeKind::parse(&kind)?;
        }

        if let Ok(binary) = std::env::var("INCUBATOR_DOCKER_BIN") {
            config.docker.binary = binary;
        }

        config.docker.endpoint = std::env::var("DOCKER_HOST").ok();

        if let Ok(secs) = std::env::var("INCUBATOR_RUNTIME_TIMEOUT") {
            config.runtime_timeout = parse_runtime_timeout(&secs)?;
        }

        if let Ok(val) = std::env::var("INCUBATOR_LOG_REQUESTS") {
            config.log_requests = val == "true" || val == "1";
        }

        Ok(config)
    }

    /// Socket address for the RPC server
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

/// Runtime deadline in whole seconds; zero would time out every call
fn parse_runtime_timeout(raw: &str) -> Result<Duration> {
    let secs: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("invalid INCUBATOR_RUNTIME_TIMEOUT '{}'", raw))?;
    if secs == 0 {
        bail!("INCUBATOR_RUNTIME_TIMEOUT must be at least 1 second");
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 4000);
        assert_eq!(config.network_name, "rallf_tasks_network");
        assert_eq!(config.runtime, RuntimeKind::Docker);
        assert_eq!(config.socket_addr().port(), 4000);
    }

    #[test]
    fn test_runtime_kind_parse() {
        assert_eq!(RuntimeKind::parse("Docker").unwrap(), RuntimeKind::Docker);
        assert_eq!(RuntimeKind::parse("memory").unwrap(), RuntimeKind::Memory);
        assert!(RuntimeKind::parse("podman").is_err());
    }

    #[test]
    fn test_runtime_timeout_parse() {
        assert_eq!(parse_runtime_timeout("45").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_runtime_timeout(" 5 ").unwrap(), Duration::from_secs(5));

        let err = parse_runtime_timeout("soon").unwrap_err();
        assert!(err.to_string().contains("INCUBATOR_RUNTIME_TIMEOUT"));
        assert!(parse_runtime_timeout("0").is_err());
        assert!(parse_runtime_timeout("-3").is_err());
    }
}
