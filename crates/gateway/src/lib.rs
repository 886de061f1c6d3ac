//! HTTP gateway for reactloop.
//!
//! Exposes the agent over HTTP: the streaming chat envelope, a plain JSON
//! run endpoint, the tool catalog, and an explicit catalog refresh.
//!
//! Built on Axum for high performance async HTTP.

pub mod chat;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use reactloop_agent::ReactAgent;
use reactloop_config::AppConfig;
use reactloop_core::discovery::ToolDiscovery;
use reactloop_core::error::Error;
use reactloop_core::run::RunRequest;
use reactloop_core::tool::{ToolRegistry, ToolSpec};
use reactloop_tools::{MultiServerDiscovery, build_registry};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

/// Everything needed to serve runs: the agent and, when discovery servers
/// are configured, the discovery client behind its remote tools.
pub struct Runtime {
    pub agent: ReactAgent,
    pub discovery: Option<Arc<dyn ToolDiscovery>>,
}

/// Build provider, discovery client, tool registry and agent from config.
pub async fn bootstrap(config: &AppConfig) -> reactloop_core::Result<Runtime> {
    config.validate()?;
    let provider = reactloop_providers::build_from_config(&config.provider)?;

    let discovery: Option<Arc<dyn ToolDiscovery>> = if config.discovery.servers.is_empty() {
        None
    } else {
        Some(Arc::new(MultiServerDiscovery::from_config(&config.discovery)?))
    };

    let registry = build_registry(config, discovery.clone()).await;
    let agent = ReactAgent::from_config(config, provider, Arc::new(registry));
    Ok(Runtime { agent, discovery })
}

/// Shared application state for the gateway.
///
/// The agent sits behind a lock only so a refresh can swap in a new
/// registry; handlers clone the `Arc` and release the lock before running.
pub struct GatewayState {
    pub config: AppConfig,
    agent: RwLock<Arc<ReactAgent>>,
    discovery: Option<Arc<dyn ToolDiscovery>>,
}

impl GatewayState {
    pub fn new(config: AppConfig, runtime: Runtime) -> Self {
        Self {
            config,
            agent: RwLock::new(Arc::new(runtime.agent)),
            discovery: runtime.discovery,
        }
    }

    pub async fn agent(&self) -> Arc<ReactAgent> {
        self.agent.read().await.clone()
    }

    /// Re-run discovery and swap in the new registry. Runs already in
    /// flight keep the registry they started with.
    pub async fn refresh_tools(&self) -> Arc<ToolRegistry> {
        let registry = Arc::new(build_registry(&self.config, self.discovery.clone()).await);
        let mut agent = self.agent.write().await;
        *agent = Arc::new(agent.with_tools(registry.clone()));
        registry
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/chat", post(chat::chat_handler))
        .route("/v1/run", post(run_handler))
        .route("/v1/tools", get(tools_handler))
        .route("/v1/tools/refresh", post(refresh_handler))
        // Base64 images travel inline
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let runtime = bootstrap(&config).await?;
    info!(
        model = %runtime.agent.model(),
        tools = ?runtime.agent.tools().names(),
        "Agent ready"
    );

    let state = Arc::new(GatewayState::new(config, runtime));
    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

async fn run_handler(State(state): State<SharedState>, Json(request): Json<RunRequest>) -> Response {
    let agent = state.agent().await;
    match agent.run(request).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => {
            let status = match &e {
                Error::Usage(_) => StatusCode::BAD_REQUEST,
                _ => {
                    error!(error = %e, "Run failed");
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            (status, Json(ErrorResponse { error: e.to_string() })).into_response()
        }
    }
}

#[derive(Serialize)]
struct ToolsResponse {
    tools: Vec<ToolSpec>,
}

async fn tools_handler(State(state): State<SharedState>) -> Json<ToolsResponse> {
    Json(ToolsResponse {
        tools: state.agent().await.tools().specs(),
    })
}

async fn refresh_handler(State(state): State<SharedState>) -> Json<ToolsResponse> {
    let registry = state.refresh_tools().await;
    info!(tools = registry.len(), "Tool catalog refreshed");
    Json(ToolsResponse {
        tools: registry.specs(),
    })
}
