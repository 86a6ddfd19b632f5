use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::admin::AdminState;
use crate::server::{Mode, ProxyStatus};

/// JSON error body with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModeBody {
    pub mode: String,
}

#[derive(Debug, Serialize)]
pub struct ModeChange {
    pub mode: Mode,
    pub changed: bool,
}

#[derive(Debug, Serialize)]
pub struct SourcesView {
    pub active: String,
    pub sources: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SourcesUpdate {
    pub sources: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CacheQuery {
    #[serde(default)]
    pub full: bool,
}

#[derive(Debug, Serialize)]
pub struct CacheEntryView {
    pub key: String,
    pub generation: u64,
    pub checksum: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DumpRequest {
    pub path: PathBuf,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<ProxyStatus> {
    Json(state.proxy.status())
}

pub async fn get_mode(State(state): State<AdminState>) -> Json<ModeBody> {
    Json(ModeBody {
        mode: state.proxy.get_mode().to_string(),
    })
}

pub async fn put_mode(
    State(state): State<AdminState>,
    Json(body): Json<ModeBody>,
) -> Result<Json<ModeChange>, ApiError> {
    let changed = state
        .proxy
        .set_mode_by_name(&body.mode)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(Json(ModeChange {
        mode: state.proxy.get_mode(),
        changed,
    }))
}

pub async fn get_sources(State(state): State<AdminState>) -> Json<SourcesView> {
    Json(SourcesView {
        active: state.proxy.get_active_source_connection(),
        sources: state.proxy.get_source_connections(),
    })
}

pub async fn put_sources(
    State(state): State<AdminState>,
    Json(body): Json<SourcesUpdate>,
) -> Result<Json<SourcesView>, ApiError> {
    state
        .proxy
        .update_source_connections(&body.sources)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(get_sources(State(state)).await)
}

pub async fn get_cache(
    State(state): State<AdminState>,
    Query(query): Query<CacheQuery>,
) -> Json<Vec<CacheEntryView>> {
    let entries = state
        .proxy
        .cache()
        .snapshot()
        .into_iter()
        .map(|config| CacheEntryView {
            key: config.key.to_string(),
            generation: config.generation,
            checksum: config.checksum,
            payload: query.full.then_some(config.payload),
        })
        .collect();
    Json(entries)
}

pub async fn post_invalidate(State(state): State<AdminState>) -> Json<serde_json::Value> {
    let cache = state.proxy.cache();
    let cleared = cache.len();
    cache.clear();
    tracing::info!(cleared, "Config cache invalidated");
    Json(serde_json::json!({ "cleared": cleared }))
}

pub async fn post_dump(
    State(state): State<AdminState>,
    Json(body): Json<DumpRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let cache = state.proxy.cache().clone();
    let path = body.path.clone();
    let entries = tokio::task::spawn_blocking(move || cache.dump_to_file(&path))
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(Json(serde_json::json!({
        "path": body.path,
        "entries": entries,
    })))
}
