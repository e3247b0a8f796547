use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, patch, post},
    Json, Router,
};
use bytes::Bytes;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dto::{CommitRequest, CorrectRequest, SearchQuery};
use super::job::{ItemPatch, JobView};
use crate::{
    error::reject,
    nutrition::{FoodItem, MealLog},
    state::AppState,
    storage::ext_from_mime,
};

// --- public routers ---

pub fn capture_routes() -> Router<AppState> {
    Router::new()
        .route("/analysis", post(capture).get(current).delete(dismiss))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
}

pub fn draft_routes() -> Router<AppState> {
    Router::new()
        .route("/analysis/cancel", post(cancel))
        .route("/analysis/retry", post(retry))
        .route("/analysis/correct", post(correct))
        .route("/analysis/items", post(add_item))
        .route("/analysis/items/:index", patch(edit_item).delete(remove_item))
        .route("/analysis/commit", post(commit))
        .route("/foods/search", get(search))
}

// --- handlers ---

/// POST /analysis with the raw image as body. Replaces any unresolved job.
#[instrument(skip(state, body), fields(bytes = body.len()))]
pub async fn capture(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<JobView>), (StatusCode, String)> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    if !content_type.starts_with("image/") {
        return Err((
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Content-Type must be image/*".into(),
        ));
    }

    let id = Uuid::new_v4().to_string();
    let key = format!("captures/{}.{}", id, ext_from_mime(&content_type).unwrap_or("bin"));
    if !body.is_empty() {
        state
            .storage
            .put_object(&key, body.clone(), &content_type)
            .await
            .with_context(|| format!("put_object {}", key))
            .map_err(reject)?;
    }

    let capture = state
        .analysis
        .capture(id, key, body)
        .await
        .map_err(reject)?;
    if let Some(old) = &capture.replaced {
        if let Err(e) = state.storage.delete_object(old).await {
            warn!(key = %old, error = %e, "replaced capture image left behind");
        }
    }

    let provider = state.settings.get().await.ai_provider;
    let view = state
        .analysis
        .analyze(capture, provider)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[instrument(skip(state))]
pub async fn current(State(state): State<AppState>) -> Result<Json<JobView>, (StatusCode, String)> {
    state
        .analysis
        .current()
        .await
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "no active analysis job".into()))
}

/// DELETE /analysis discards the job and its captured image.
#[instrument(skip(state))]
pub async fn dismiss(State(state): State<AppState>) -> Result<StatusCode, (StatusCode, String)> {
    let Some(key) = state.analysis.dismiss().await else {
        return Err((StatusCode::NOT_FOUND, "no active analysis job".into()));
    };
    if let Err(e) = state.storage.delete_object(&key).await {
        warn!(%key, error = %e, "captured image left behind");
    }
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn cancel(State(state): State<AppState>) -> Result<Json<JobView>, (StatusCode, String)> {
    state.analysis.cancel().await.map(Json).map_err(reject)
}

#[instrument(skip(state))]
pub async fn retry(State(state): State<AppState>) -> Result<Json<JobView>, (StatusCode, String)> {
    let provider = state.settings.get().await.ai_provider;
    state.analysis.retry(provider).await.map(Json).map_err(reject)
}

#[instrument(skip(state, body))]
pub async fn correct(
    State(state): State<AppState>,
    Json(body): Json<CorrectRequest>,
) -> Result<Json<JobView>, (StatusCode, String)> {
    let instruction = body.instruction.trim();
    if instruction.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "instruction is required".into()));
    }
    let provider = state.settings.get().await.ai_provider;
    state
        .analysis
        .correct(instruction, provider)
        .await
        .map(Json)
        .map_err(reject)
}

/// POST /analysis/items with an optional item body; no body adds a blank item.
#[instrument(skip(state, item))]
pub async fn add_item(
    State(state): State<AppState>,
    item: Option<Json<FoodItem>>,
) -> Result<Json<JobView>, (StatusCode, String)> {
    state
        .analysis
        .add_item(item.map(|Json(i)| i))
        .await
        .map(Json)
        .map_err(reject)
}

#[instrument(skip(state, patch))]
pub async fn edit_item(
    State(state): State<AppState>,
    Path(index): Path<usize>,
    Json(patch): Json<ItemPatch>,
) -> Result<Json<JobView>, (StatusCode, String)> {
    state
        .analysis
        .edit_item(index, patch)
        .await
        .map(Json)
        .map_err(reject)
}

#[instrument(skip(state))]
pub async fn remove_item(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Result<Json<JobView>, (StatusCode, String)> {
    state.analysis.remove_item(index).await.map(Json).map_err(reject)
}

#[instrument(skip(state, body))]
pub async fn commit(
    State(state): State<AppState>,
    Json(body): Json<CommitRequest>,
) -> Result<(StatusCode, Json<MealLog>), (StatusCode, String)> {
    let log = state
        .analysis
        .commit(&state.logs, body.meal_type, body.note)
        .await
        .map_err(reject)?;
    info!(id = %log.id, meal_type = ?log.meal_type, "meal logged");
    Ok((StatusCode::CREATED, Json(log)))
}

#[instrument(skip(state))]
pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<FoodItem>>, (StatusCode, String)> {
    let provider = state.settings.get().await.ai_provider;
    state
        .analysis
        .search(&query.q, provider)
        .await
        .map(Json)
        .map_err(reject)
}
