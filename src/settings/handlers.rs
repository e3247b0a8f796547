use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use tracing::{error, instrument};

use super::UserSettings;
use crate::state::AppState;

pub fn settings_routes() -> Router<AppState> {
    Router::new().route("/settings", get(get_settings).put(put_settings))
}

#[instrument(skip(state))]
pub async fn get_settings(State(state): State<AppState>) -> Json<UserSettings> {
    Json(state.settings.get().await)
}

#[instrument(skip(state, body))]
pub async fn put_settings(
    State(state): State<AppState>,
    Json(body): Json<UserSettings>,
) -> Result<Json<UserSettings>, (StatusCode, String)> {
    match state.settings.save(body).await {
        Ok(saved) => Ok(Json(saved)),
        Err(e) => {
            error!(error = %e, "saving settings failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}
