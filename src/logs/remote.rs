use async_trait::async_trait;
use uuid::Uuid;

use crate::error::SyncError;
use crate::nutrition::MealLog;
use crate::settings::UserSettings;

/// Multi-device store addressed by user identity. Every call may fail or be slow.
///
/// `upsert_log` must be idempotent by `log.id`: writing the same log twice
/// leaves exactly one record.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Newest first.
    async fn fetch_logs(&self, user_id: Uuid) -> Result<Vec<MealLog>, SyncError>;
    async fn upsert_log(&self, user_id: Uuid, log: &MealLog) -> Result<(), SyncError>;
    async fn delete_log(&self, user_id: Uuid, log_id: &str) -> Result<(), SyncError>;

    async fn fetch_settings(&self, user_id: Uuid) -> Result<Option<UserSettings>, SyncError>;
    async fn save_settings(&self, user_id: Uuid, settings: &UserSettings) -> Result<(), SyncError>;
}
