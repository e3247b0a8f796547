//! Error reasons surfaced by the analysis and log pipelines.
//!
//! Callers decide user messaging; nothing here is meant to be shown raw.

use axum::http::StatusCode;
use thiserror::Error;

/// Failures of the local durable store.
#[derive(Error, Debug)]
pub enum LocalStoreError {
    #[error("local store io: {0}")]
    Io(#[from] std::io::Error),

    #[error("local store encoding: {0}")]
    Json(#[from] serde_json::Error),
}

/// Remote store failures. Always non-fatal for the caller.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("remote database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("remote unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the analysis state machine and its collaborator.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("No food items detected")]
    NoItems,

    #[error("draft has no items to commit")]
    EmptyDraft,

    #[error("invalid or empty image")]
    InvalidImage,

    #[error("analyzer timed out")]
    Timeout,

    #[error("analyzer failed: {0}")]
    Analyzer(String),

    #[error("analysis cancelled")]
    Cancelled,

    #[error("another analyzer call is still in flight")]
    Busy,

    #[error("not allowed while the job is {0}")]
    InvalidState(&'static str),

    #[error("no active analysis job")]
    NoJob,

    #[error("item index {0} is out of range")]
    InvalidIndex(usize),

    #[error("job was replaced or dismissed")]
    Stale,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// LogStore failures. `Invariant` is a programming error, not user input.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Local(#[from] LocalStoreError),

    #[error("meal log {0} not found")]
    NotFound(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("a newer session load replaced this one")]
    Superseded,
}

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("migration incomplete after {migrated} logs; {failed_id} failed: {source}")]
    Incomplete {
        migrated: usize,
        failed_id: String,
        #[source]
        source: SyncError,
    },

    #[error(transparent)]
    Local(#[from] LocalStoreError),
}

impl AnalysisError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NoItems | Self::Analyzer(_) | Self::Timeout => StatusCode::BAD_GATEWAY,
            Self::InvalidImage | Self::InvalidIndex(_) => StatusCode::BAD_REQUEST,
            Self::Busy | Self::InvalidState(_) | Self::Stale | Self::Cancelled => {
                StatusCode::CONFLICT
            }
            Self::NoJob => StatusCode::NOT_FOUND,
            Self::EmptyDraft => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Store(e) => e.status(),
        }
    }
}

impl StoreError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Invariant(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Superseded => StatusCode::CONFLICT,
            Self::Local(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Maps a pipeline error to the `(StatusCode, String)` rejection handlers return.
pub fn reject<E>(e: E) -> (StatusCode, String)
where
    E: Into<Rejection>,
{
    let Rejection(status, msg) = e.into();
    (status, msg)
}

pub struct Rejection(StatusCode, String);

impl From<AnalysisError> for Rejection {
    fn from(e: AnalysisError) -> Self {
        Rejection(e.status(), e.to_string())
    }
}

impl From<StoreError> for Rejection {
    fn from(e: StoreError) -> Self {
        Rejection(e.status(), e.to_string())
    }
}

impl From<anyhow::Error> for Rejection {
    fn from(e: anyhow::Error) -> Self {
        Rejection(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}
