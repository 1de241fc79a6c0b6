//! HTTP surface for console sessions.
//!
//! One route creates a console for a named workload and returns the channel
//! secrets; one route is the per-channel websocket handshake; one route is a
//! read-only status view for whoever is tracking the session.

use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{any, get, post};
use axum::{Json, Router};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::console::{ConsoleSession, SessionState};
use crate::errors::{ConsoleError, ConsoleResult};
use crate::workload::Workload;

struct ConsoleEntry {
    session: Arc<ConsoleSession>,
    workload_name: String,
    /// `None` while the orchestrator is still running.
    result: RwLock<Option<Result<(), String>>>,
}

#[derive(Clone)]
pub struct AppState {
    workloads: Arc<HashMap<String, Arc<dyn Workload>>>,
    consoles: Arc<RwLock<HashMap<Uuid, Arc<ConsoleEntry>>>>,
}

impl AppState {
    pub fn new<I>(workloads: I) -> Self
    where
        I: IntoIterator<Item = (String, Arc<dyn Workload>)>,
    {
        Self {
            workloads: Arc::new(workloads.into_iter().collect()),
            consoles: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn entry(&self, id: Uuid) -> ConsoleResult<Arc<ConsoleEntry>> {
        self.consoles
            .read()
            .get(&id)
            .cloned()
            .ok_or(ConsoleError::NotFound)
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/workloads/{name}/console", post(create_console))
        .route("/consoles/{id}", get(get_console))
        .route("/consoles/{id}/connect", any(connect_console))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Requested initial terminal geometry. 0 (or absent) means "do not resize".
#[derive(Debug, Default, Deserialize)]
pub struct CreateConsoleRequest {
    #[serde(default)]
    pub width: u16,
    #[serde(default)]
    pub height: u16,
}

#[derive(Debug, Serialize)]
pub struct CreateConsoleResponse {
    pub id: Uuid,
    /// `{"fds": {"control": <secret>, "0": <secret>}}` — the only way a
    /// client learns which secret unlocks which channel.
    pub metadata: serde_json::Value,
}

async fn create_console(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Option<Json<CreateConsoleRequest>>,
) -> ConsoleResult<(StatusCode, Json<CreateConsoleResponse>)> {
    let workload = state
        .workloads
        .get(&name)
        .cloned()
        .ok_or(ConsoleError::NotFound)?;
    if !workload.is_running().await {
        return Err(ConsoleError::NotRunning);
    }
    if workload.is_frozen().await {
        return Err(ConsoleError::Frozen);
    }

    let request = body.map(|Json(request)| request).unwrap_or_default();
    let session = Arc::new(ConsoleSession::new(workload, request.width, request.height));
    let response = CreateConsoleResponse {
        id: session.id,
        metadata: session.metadata(),
    };

    let entry = Arc::new(ConsoleEntry {
        session: Arc::clone(&session),
        workload_name: name.clone(),
        result: RwLock::new(None),
    });
    state.consoles.write().insert(session.id, Arc::clone(&entry));

    info!(session = %session.id, workload = %name, "console session created");
    tokio::spawn(async move {
        let outcome = entry.session.run().await;
        *entry.result.write() = Some(outcome.map_err(|err| err.to_string()));
    });

    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    secret: Option<String>,
}

async fn connect_console(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> ConsoleResult<Response> {
    let entry = state.entry(id)?;
    entry.session.connect(params.secret.as_deref(), ws)
}

#[derive(Debug, Serialize)]
pub struct ConsoleStatus {
    pub id: Uuid,
    pub workload: String,
    pub state: SessionState,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn get_console(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ConsoleResult<Json<ConsoleStatus>> {
    let entry = state.entry(id)?;
    let result = entry.result.read().clone();
    Ok(Json(ConsoleStatus {
        id,
        workload: entry.workload_name.clone(),
        state: entry.session.state(),
        done: result.is_some(),
        error: result.and_then(Result::err),
    }))
}
