use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::local::{self, LocalStore, LOGS_KEY};
use super::remote::RemoteStore;
use crate::error::{LocalStoreError, MigrationError};

/// Marks a migration that started for `user_id` but has not cleared local data yet.
const MIGRATION_KEY: &str = "migration";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub migrated: usize,
}

#[derive(Debug, Deserialize)]
struct PendingMigration {
    user_id: Uuid,
}

/// The identity an interrupted migration was moving the anonymous logs to.
/// Those logs belong to that identity until the run finishes.
pub fn pending_owner(local: &dyn LocalStore) -> Option<Uuid> {
    match local.get(MIGRATION_KEY) {
        Ok(Some(v)) => serde_json::from_value::<PendingMigration>(v)
            .ok()
            .map(|p| p.user_id),
        _ => None,
    }
}

/// Copies every anonymous local log to the remote store, one at a time, then clears the
/// local logs. Local data is only cleared after every write succeeded; a
/// partial run leaves it in place so the next run can finish the job. Remote
/// writes are id-keyed upserts, so re-sending an already-migrated log is safe.
pub async fn migrate_local_logs(
    local: &dyn LocalStore,
    remote: &dyn RemoteStore,
    user_id: Uuid,
) -> Result<MigrationReport, MigrationError> {
    let logs = local::read_logs(local, LOGS_KEY)?;
    if logs.is_empty() {
        clear_marker(local)?;
        return Ok(MigrationReport { migrated: 0 });
    }

    local.set(MIGRATION_KEY, &json!({ "user_id": user_id }))?;
    info!(%user_id, count = logs.len(), "migrating local logs to remote");

    for (migrated, log) in logs.iter().enumerate() {
        if let Err(source) = remote.upsert_log(user_id, log).await {
            warn!(%user_id, migrated, id = %log.id, error = %source, "migration interrupted");
            return Err(MigrationError::Incomplete {
                migrated,
                failed_id: log.id.clone(),
                source,
            });
        }
    }

    local.remove(LOGS_KEY)?;
    clear_marker(local)?;
    info!(%user_id, migrated = logs.len(), "migration complete; local logs cleared");
    Ok(MigrationReport {
        migrated: logs.len(),
    })
}

fn clear_marker(local: &dyn LocalStore) -> Result<(), LocalStoreError> {
    local.remove(MIGRATION_KEY)
}
