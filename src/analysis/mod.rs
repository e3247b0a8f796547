mod client;
mod dto;
pub mod handlers;
mod job;
mod session;

use crate::state::AppState;
use axum::Router;

pub use client::{AiProvider, AnalyzerClient, HttpAnalyzer};
pub use session::AnalysisSession;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::capture_routes())
        .merge(handlers::draft_routes())
}
