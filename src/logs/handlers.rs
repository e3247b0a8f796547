use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
    routing::{delete, get, post},
    Json, Router,
};
use time::{macros::format_description, Date, OffsetDateTime};
use tracing::{error, instrument};

use super::dto::{DaySummary, SummaryQuery, SyncStatusResponse};
use super::undo::UndoEntry;
use crate::{
    error::reject,
    nutrition::{Macros, MealLog},
    state::AppState,
};

const PRESIGN_TTL_SECS: u64 = 10 * 60;

// --- public routers ---

pub fn log_routes() -> Router<AppState> {
    Router::new()
        .route("/logs", get(list_logs))
        .route("/logs/summary", get(day_summary))
        .route("/logs/undo", get(pending_undo))
        .route("/logs/undo/:id", delete(dismiss_undo))
        .route("/logs/:id", get(get_log).put(update_log).delete(delete_log))
        .route("/logs/:id/restore", post(restore_log))
        .route("/logs/:id/image", get(get_presigned_image)) // redirect to the captured image
}

pub fn sync_routes() -> Router<AppState> {
    Router::new().route("/sync/status", get(sync_status))
}

// --- handlers ---

#[instrument(skip(state))]
pub async fn list_logs(State(state): State<AppState>) -> Json<Vec<MealLog>> {
    Json(state.logs.logs().await)
}

#[instrument(skip(state))]
pub async fn get_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MealLog>, (StatusCode, String)> {
    state
        .logs
        .get(&id)
        .await
        .map(Json)
        .ok_or((StatusCode::NOT_FOUND, "Meal log not found".into()))
}

/// PUT /logs/:id replaces the log. Totals are recomputed from the items.
#[instrument(skip(state, log))]
pub async fn update_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(log): Json<MealLog>,
) -> Result<Json<MealLog>, (StatusCode, String)> {
    if log.id != id {
        return Err((StatusCode::BAD_REQUEST, "id in body does not match path".into()));
    }
    state
        .logs
        .update(log.with_recomputed_totals())
        .await
        .map(Json)
        .map_err(reject)
}

/// DELETE /logs/:id returns the undo entry, restorable until `expiresAt`.
#[instrument(skip(state))]
pub async fn delete_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UndoEntry>, (StatusCode, String)> {
    state.logs.delete(&id).await.map(Json).map_err(reject)
}

#[instrument(skip(state))]
pub async fn restore_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MealLog>, (StatusCode, String)> {
    match state.logs.restore(&id).await.map_err(reject)? {
        Some(log) => Ok(Json(log)),
        None => Err((StatusCode::GONE, "Nothing to restore".into())),
    }
}

#[instrument(skip(state))]
pub async fn pending_undo(State(state): State<AppState>) -> Json<Option<UndoEntry>> {
    Json(state.logs.pending_undo())
}

#[instrument(skip(state))]
pub async fn dismiss_undo(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    if state.logs.dismiss_undo(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, "No pending undo for this log".into()))
    }
}

#[instrument(skip(state))]
pub async fn day_summary(
    State(state): State<AppState>,
    Query(q): Query<SummaryQuery>,
) -> Result<Json<DaySummary>, (StatusCode, String)> {
    let day = match q.date.as_deref() {
        Some(s) => Date::parse(s, format_description!("[year]-[month]-[day]"))
            .map_err(|_| (StatusCode::BAD_REQUEST, "date must be YYYY-MM-DD".into()))?,
        None => OffsetDateTime::now_utc().date(),
    };

    let totals = state.logs.totals_for_day(day).await;
    let goals = state.settings.get().await.daily_goals;
    let date = day
        .format(format_description!("[year]-[month]-[day]"))
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(DaySummary {
        date,
        totals,
        goals,
        remaining: Macros::new(
            goals.calories - totals.calories,
            goals.protein - totals.protein,
            goals.carbs - totals.carbs,
            goals.fat - totals.fat,
        ),
    }))
}

/// Redirects to a presigned url of the log's captured image.
#[instrument(skip(state))]
pub async fn get_presigned_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Some(log) = state.logs.get(&id).await else {
        return (StatusCode::NOT_FOUND, "Meal log not found").into_response();
    };

    match state.storage.presign_get(&log.image_ref, PRESIGN_TTL_SECS).await {
        Ok(url) => Redirect::temporary(&url).into_response(),
        Err(e) => {
            error!(error = %e, %id, key = %log.image_ref, "presign failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "presign failed").into_response()
        }
    }
}

#[instrument(skip(state))]
pub async fn sync_status(State(state): State<AppState>) -> Json<SyncStatusResponse> {
    let status = state.logs.sync_status();
    Json(SyncStatusResponse {
        remote_enabled: status.is_some(),
        user_id: state.logs.identity().await,
        source: state.logs.source().await,
        pending: status.as_ref().map_or(0, |s| s.pending),
        last_failure: status.and_then(|s| s.last_failure),
    })
}
