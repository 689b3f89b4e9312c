//! ---
//! anvil_section: "05-networking-external-interfaces"
//! anvil_subsection: "module"
//! anvil_type: "source"
//! anvil_scope: "code"
//! anvil_description: "Local HTTP API surface for control plane integrations."
//! anvil_version: "v0.1.0-alpha"
//! anvil_owner: "tbd"
//! ---
//! The agent's local HTTP API.
//!
//! The control plane learns the advertise URL from heartbeats and drives the
//! machine through this surface: status inspection, hardware inventory, and
//! command submission/retrieval. The server only talks to the
//! [`StatusProvider`] and [`CommandExecutor`] seams so suites can exercise
//! it without a full agent.

use std::net::SocketAddr;
use std::sync::Arc;

use anvil_hardware::HardwareInventory;
use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

/// Agent status returned by the `/status` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSnapshot {
    /// Active command mode, `NONE` until the first command arrives.
    pub mode: String,
    /// Agent build version string.
    pub version: String,
    /// When the agent started serving, if it has.
    pub started_at: Option<DateTime<Utc>>,
    /// Seconds since `started_at`.
    pub uptime_seconds: u64,
}

/// Command payload accepted by `POST /v1/commands`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandSubmission {
    /// Command name of the form `<mode>.<name>`.
    pub name: String,
    #[serde(default)]
    /// Structured parameters forwarded to the mode implementation.
    pub params: Value,
}

/// Externally visible view of a command result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandView {
    pub id: Uuid,
    pub name: String,
    pub params: Value,
    pub submitted_at: DateTime<Utc>,
    pub done: bool,
    /// Set once `done`; `None` while the command is still running.
    pub success: Option<bool>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Errors surfaced by the [`CommandExecutor`].
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("unknown mode '{0}'")]
    UnknownMode(String),
    #[error("agent is already in {active} mode, cannot run {requested} commands")]
    ModeMismatch { active: String, requested: String },
    #[error("agent is busy executing a prior command")]
    Busy,
    #[error("command execution failed: {0}")]
    ExecutionFailed(String),
}

impl CommandError {
    fn status_code(&self) -> StatusCode {
        match self {
            CommandError::InvalidCommand(_)
            | CommandError::InvalidParameters(_)
            | CommandError::UnknownMode(_) => StatusCode::BAD_REQUEST,
            CommandError::ModeMismatch { .. } | CommandError::Busy => StatusCode::CONFLICT,
            CommandError::ExecutionFailed(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Provides snapshots for the status and hardware endpoints.
pub trait StatusProvider: Send + Sync + 'static {
    fn status(&self) -> StatusSnapshot;

    fn hardware(&self) -> anyhow::Result<HardwareInventory>;
}

/// Accepts and tracks agent commands.
#[async_trait]
pub trait CommandExecutor: Send + Sync + 'static {
    /// Submit a command for execution.
    async fn submit(&self, submission: CommandSubmission) -> Result<CommandView, CommandError>;

    /// All known results, in submission order.
    fn list(&self) -> Vec<CommandView>;

    /// Look up a single result.
    fn get(&self, id: Uuid) -> Option<CommandView>;
}

/// Shared state injected into the axum handlers.
struct ApiState {
    provider: Arc<dyn StatusProvider>,
    executor: Arc<dyn CommandExecutor>,
}

/// Builder used to configure and spawn the agent API server.
#[derive(Clone)]
pub struct ApiServerBuilder {
    listen: SocketAddr,
    provider: Arc<dyn StatusProvider>,
    executor: Arc<dyn CommandExecutor>,
}

impl ApiServerBuilder {
    /// Construct a new builder from mandatory components.
    pub fn new(
        listen: SocketAddr,
        provider: Arc<dyn StatusProvider>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            listen,
            provider,
            executor,
        }
    }

    /// Spawn the API server and return a handle that can be awaited for shutdown.
    pub async fn spawn(self) -> anyhow::Result<ApiServerHandle> {
        let listener = TcpListener::bind(self.listen).await?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "agent api listening");

        let state = ApiState {
            provider: self.provider,
            executor: self.executor,
        };
        let router = Router::new()
            .route("/status", get(get_status))
            .route("/v1/hardware", get(get_hardware))
            .route("/v1/commands", get(list_commands).post(post_command))
            .route("/v1/commands/:id", get(get_command))
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::new(state));

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });
        let task = tokio::spawn(async move {
            if let Err(err) = server.await {
                warn!(error = %err, "agent api server exited with error");
            }
        });

        Ok(ApiServerHandle {
            address: local_addr,
            task,
            shutdown: shutdown_tx,
        })
    }
}

/// Handle returned from [`ApiServerBuilder::spawn`].
pub struct ApiServerHandle {
    address: SocketAddr,
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl ApiServerHandle {
    /// Retrieve the socket address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Request graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(()) => Ok(()),
            Err(join) => Err(anyhow::anyhow!(join)),
        }
    }
}

async fn get_status(State(state): State<Arc<ApiState>>) -> Json<StatusSnapshot> {
    Json(state.provider.status())
}

async fn get_hardware(State(state): State<Arc<ApiState>>) -> Response {
    match state.provider.hardware() {
        Ok(inventory) => (StatusCode::OK, Json(inventory)).into_response(),
        Err(err) => {
            warn!(error = %err, "hardware inventory failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

async fn list_commands(State(state): State<Arc<ApiState>>) -> Json<Vec<CommandView>> {
    Json(state.executor.list())
}

async fn post_command(
    State(state): State<Arc<ApiState>>,
    Json(submission): Json<CommandSubmission>,
) -> Response {
    match state.executor.submit(submission).await {
        Ok(view) => (StatusCode::ACCEPTED, Json(view)).into_response(),
        Err(err) => (
            err.status_code(),
            Json(serde_json::json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}

async fn get_command(State(state): State<Arc<ApiState>>, Path(id): Path<Uuid>) -> Response {
    match state.executor.get(id) {
        Some(view) => (StatusCode::OK, Json(view)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("no command result {id}") })),
        )
            .into_response(),
    }
}
