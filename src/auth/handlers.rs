use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use tracing::{info, instrument};

use crate::{
    auth::{dto::SessionResponse, jwt::AuthUser},
    error::reject,
    state::AppState,
};

pub fn session_routes() -> Router<AppState> {
    Router::new().route("/session", post(sign_in).delete(sign_out))
}

/// POST /session: switches the stores to the bearer token's user. Logs come
/// from the remote store when reachable; local-only logs are migrated first.
#[instrument(skip(state))]
pub async fn sign_in(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<SessionResponse>, (StatusCode, String)> {
    let logs = state.logs.load(Some(user_id)).await.map_err(reject)?;
    let settings = state.settings.load(Some(user_id)).await;

    info!(%user_id, source = ?logs.source, count = logs.count, migrated = ?logs.migrated, "session opened");
    Ok(Json(SessionResponse {
        user_id: Some(user_id),
        logs,
        settings,
    }))
}

/// DELETE /session: back to local-only mode.
#[instrument(skip(state))]
pub async fn sign_out(
    State(state): State<AppState>,
) -> Result<Json<SessionResponse>, (StatusCode, String)> {
    let previous = state.logs.identity().await;
    let logs = state.logs.load(None).await.map_err(reject)?;
    let settings = state.settings.load(None).await;

    info!(user_id = ?previous, "session closed");
    Ok(Json(SessionResponse {
        user_id: None,
        logs,
        settings,
    }))
}
