use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::store::LogSource;
use super::sync::SyncNotice;
use crate::nutrition::Macros;

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    /// `YYYY-MM-DD`, UTC. Defaults to today.
    pub date: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySummary {
    pub date: String,
    pub totals: Macros,
    pub goals: Macros,
    pub remaining: Macros,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusResponse {
    pub remote_enabled: bool,
    pub user_id: Option<Uuid>,
    pub source: LogSource,
    pub pending: usize,
    pub last_failure: Option<SyncNotice>,
}
