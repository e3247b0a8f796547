use async_trait::async_trait;
use sqlx::{types::Json, PgPool};
use tracing::debug;
use uuid::Uuid;

use super::remote::RemoteStore;
use crate::error::SyncError;
use crate::nutrition::MealLog;
use crate::settings::UserSettings;

/// Remote store backed by Postgres. Logs are kept whole as JSONB next to the
/// columns used for ownership and ordering.
#[derive(Clone)]
pub struct PgRemoteStore {
    db: PgPool,
}

impl PgRemoteStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RemoteStore for PgRemoteStore {
    async fn fetch_logs(&self, user_id: Uuid) -> Result<Vec<MealLog>, SyncError> {
        let rows = sqlx::query_as::<_, (Json<MealLog>,)>(
            r#"
            SELECT body
            FROM meal_logs
            WHERE user_id = $1
            ORDER BY logged_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(|(Json(log),)| log).collect())
    }

    async fn upsert_log(&self, user_id: Uuid, log: &MealLog) -> Result<(), SyncError> {
        let res = sqlx::query(
            r#"
            INSERT INTO meal_logs (id, user_id, logged_at, body)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
               SET logged_at = EXCLUDED.logged_at,
                   body = EXCLUDED.body,
                   updated_at = now()
             WHERE meal_logs.user_id = EXCLUDED.user_id
            "#,
        )
        .bind(&log.id)
        .bind(user_id)
        .bind(log.timestamp)
        .bind(Json(log))
        .execute(&self.db)
        .await?;

        if res.rows_affected() == 0 {
            return Err(SyncError::Unavailable(format!(
                "log {} belongs to another user",
                log.id
            )));
        }
        debug!(%user_id, id = %log.id, "remote log upserted");
        Ok(())
    }

    async fn delete_log(&self, user_id: Uuid, log_id: &str) -> Result<(), SyncError> {
        sqlx::query(
            r#"
            DELETE FROM meal_logs
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(log_id)
        .bind(user_id)
        .execute(&self.db)
        .await?;
        debug!(%user_id, id = %log_id, "remote log deleted");
        Ok(())
    }

    async fn fetch_settings(&self, user_id: Uuid) -> Result<Option<UserSettings>, SyncError> {
        let row = sqlx::query_as::<_, (Json<UserSettings>,)>(
            r#"
            SELECT settings
            FROM user_settings
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(|(Json(s),)| s))
    }

    async fn save_settings(&self, user_id: Uuid, settings: &UserSettings) -> Result<(), SyncError> {
        sqlx::query(
            r#"
            INSERT INTO user_settings (user_id, settings)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE
               SET settings = EXCLUDED.settings,
                   updated_at = now()
            "#,
        )
        .bind(user_id)
        .bind(Json(settings))
        .execute(&self.db)
        .await?;
        Ok(())
    }
}
