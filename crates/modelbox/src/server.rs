//! HTTP surface over the model manager.
//!
//! Every handler goes through one `tokio::sync::Mutex`, which is exactly
//! the external mutual-exclusion scope the manager documents: lifecycle
//! mutations are serialized across all models, and a reply that has to
//! lazily start an instance is serialized with them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::catalog::RuntimeKind;
use crate::config::Config;
use crate::error::EngineError;
use crate::model_runtime::ModelManager;
use crate::state::PersistedState;

pub struct AppState {
    pub manager: Mutex<ModelManager>,
    pub state_path: PathBuf,
}

pub async fn run_server(config: Config, manager: ModelManager) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        manager: Mutex::new(manager),
        state_path: config.state_path.clone(),
    });

    let app = build_router(state.clone());

    let bind_addr = format!("{}:{}", config.api_host, config.api_port);
    info!("🚀 modelbox API listening on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("shutting down, stopping managed runtimes");
    state.manager.lock().await.shutdown().await;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::timeout::TimeoutLayer;
    use tower_http::trace::TraceLayer;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/models", get(list_models))
        .route("/models/:id/load", post(load_model))
        .route("/models/:id/unload", post(unload_model))
        .route("/chat", post(chat))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(600)))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ModelSummary {
    id: String,
    name: String,
    runtime: RuntimeKind,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    model_id: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    reply: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

async fn list_models(State(state): State<Arc<AppState>>) -> Json<Vec<ModelSummary>> {
    let manager = state.manager.lock().await;
    let mut models: Vec<ModelSummary> = manager
        .catalog()
        .specs()
        .map(|spec| ModelSummary {
            id: spec.id.clone(),
            name: spec.name.clone(),
            runtime: spec.runtime,
            status: manager.status(&spec.id).as_str().to_string(),
            error: manager.last_error(&spec.id).map(str::to_owned),
        })
        .collect();
    models.sort_by(|a, b| a.id.cmp(&b.id));
    Json(models)
}

async fn load_model(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<String>,
) -> Result<StatusCode, ApiError> {
    let mut manager = state.manager.lock().await;
    manager.load(&id).await.map_err(error_response)?;
    persist_loaded(&state, &manager);
    Ok(StatusCode::NO_CONTENT)
}

async fn unload_model(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<String>,
) -> StatusCode {
    let mut manager = state.manager.lock().await;
    manager.unload(&id).await;
    persist_loaded(&state, &manager);
    StatusCode::NO_CONTENT
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let mut manager = state.manager.lock().await;
    let reply = manager
        .reply(&request.model_id, &request.message)
        .await
        .map_err(error_response)?;
    Ok(Json(ChatResponse { reply }))
}

/// Persistence is triggered here, not inside the core.
fn persist_loaded(state: &AppState, manager: &ModelManager) {
    let persisted = PersistedState {
        loaded_models: manager.loaded_ids(),
    };
    if let Err(e) = persisted.save(&state.state_path) {
        warn!("failed to persist loaded-model state: {}", e);
    }
}

/// Error kinds map to statuses by pattern match; the message text is
/// passed through for the UI.
fn error_response(err: EngineError) -> ApiError {
    let status = match &err {
        EngineError::UnknownModel(_) => StatusCode::NOT_FOUND,
        EngineError::CatalogNotSet | EngineError::ArtifactNotConfigured(_) => {
            StatusCode::BAD_REQUEST
        }
        EngineError::NotLoaded(_) => StatusCode::CONFLICT,
        EngineError::RemoteDisabled(_) => StatusCode::FORBIDDEN,
        EngineError::Runtime(_) => StatusCode::BAD_GATEWAY,
        EngineError::Spawn { .. } | EngineError::PortAllocation(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(ErrorBody { error: err.to_string() }))
}
