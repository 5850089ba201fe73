//! HTTP transport for the control protocol.
//!
//! One POST endpoint carries every tool request; a health route reports
//! liveness. The protocol semantics live in `protocol::dispatch`; this
//! layer only moves envelopes.

use crate::{
    config::ApiConfig,
    constants::{SERVICE_NAME, SERVICE_VERSION},
    coordinator::Coordinator,
    protocol::{self, ToolRequest, ToolResponse},
    MarcusError, Result,
};
use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

const ROUTE_RPC: &str = "/rpc";
const ROUTE_HEALTH: &str = "/health";

#[derive(Clone)]
pub struct ApiServer {
    config: ApiConfig,
    state: AppState,
}

#[derive(Clone)]
struct AppState {
    coordinator: Arc<Coordinator>,
    started_at: Instant,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    project_id: String,
    uptime_secs: u64,
}

impl ApiServer {
    pub fn new(config: ApiConfig, coordinator: Arc<Coordinator>) -> Self {
        Self {
            config,
            state: AppState {
                coordinator,
                started_at: Instant::now(),
            },
        }
    }

    pub fn build_router(&self) -> Router {
        Router::new()
            .route(ROUTE_RPC, post(rpc_handler))
            .route(ROUTE_HEALTH, get(health_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) -> Result<()> {
        let app = self.build_router();

        let listener =
            tokio::net::TcpListener::bind(format!("{}:{}", self.config.host, self.config.port))
                .await
                .map_err(|e| MarcusError::Internal(e.into()))?;

        info!(
            "control protocol listening on {}",
            listener.local_addr().map_err(MarcusError::Io)?
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| MarcusError::Internal(e.into()))?;

        Ok(())
    }
}

async fn rpc_handler(
    State(state): State<AppState>,
    Json(request): Json<ToolRequest>,
) -> Json<ToolResponse> {
    Json(protocol::dispatch(&state.coordinator, request).await)
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        version: SERVICE_VERSION,
        project_id: state.coordinator.project_id().to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}
