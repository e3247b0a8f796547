use serde::Serialize;
use uuid::Uuid;

use crate::logs::LoadReport;
use crate::settings::UserSettings;

/// Returned when a session opens or closes.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub user_id: Option<Uuid>,
    pub logs: LoadReport,
    pub settings: UserSettings,
}
