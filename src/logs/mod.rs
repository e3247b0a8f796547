mod dto;
pub mod handlers;
mod local;
mod migration;
mod remote;
mod repo;
mod store;
mod sync;
mod undo;

use crate::state::AppState;
use axum::Router;

pub use local::{settings_key, FileLocalStore, LocalStore};
pub use remote::RemoteStore;
pub use repo::PgRemoteStore;
pub use store::{LoadReport, LogStore};
pub use sync::{RemoteOp, SyncQueue};

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::log_routes())
        .merge(handlers::sync_routes())
}
