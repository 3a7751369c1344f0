//! Control Plane HTTP Server
//!
//! Axum-based server: JSON-RPC on `POST /`, health probes, graceful shutdown.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, Method, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::rpc::{ControlPlane, RpcResponse};

/// State shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub control: ControlPlane,
    /// Server start time for uptime calculation
    pub start_time: Instant,
    pub version: &'static str,
}

impl AppState {
    pub fn new(control: ControlPlane) -> Self {
        Self {
            control,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub robots: usize,
    pub running_skills: usize,
    /// Timestamp (ISO 8601)
    pub timestamp: String,
}

/// RPC server
pub struct RpcServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    log_requests: bool,
}

impl RpcServer {
    pub fn new(addr: SocketAddr, control: ControlPlane, log_requests: bool) -> Self {
        Self {
            addr,
            state: Arc::new(AppState::new(control)),
            log_requests,
        }
    }

    /// Build the router with all routes and middleware
    pub fn build_router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE]);

        let mut router = Router::new()
            .route("/", post(rpc_handler))
            .route("/health", get(health_check))
            .route("/healthz", get(liveness))
            .with_state(self.state.clone())
            .layer(cors);

        if self.log_requests {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Serve until a shutdown signal arrives, then export the catalog
    pub async fn run(self) -> anyhow::Result<()> {
        let router = self.build_router();

        info!("Control plane listening on http://{}", self.addr);
        let listener = tokio::net::TcpListener::bind(self.addr).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Server stopped, exporting catalog");
        if let Err(e) = self.state.control.daemon().export().await {
            error!("Failed to export catalog on shutdown: {}", e);
        }
        Ok(())
    }
}

/// `POST /` - one JSON-RPC request in, one response out
async fn rpc_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Json<RpcResponse> {
    Json(state.control.handle_raw(&body).await)
}

/// Health check handler
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let daemon = state.control.daemon();
    Json(HealthResponse {
        status: "ok",
        version: state.version,
        uptime_secs: state.uptime_secs(),
        robots: daemon.registry().robot_count(),
        running_skills: daemon.registry().scheduler().tracked(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Liveness probe
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
