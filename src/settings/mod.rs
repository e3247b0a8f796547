pub mod handlers;

use std::sync::Arc;

use axum::Router;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::AiProvider;
use crate::error::LocalStoreError;
use crate::logs::{settings_key, LocalStore, RemoteOp, SyncQueue};
use crate::nutrition::Macros;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    handlers::settings_routes()
}

/// Per-user preferences. Every field has a default so older blobs still read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSettings {
    pub daily_goals: Macros,
    pub ai_provider: AiProvider,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            daily_goals: Macros::new(2000.0, 150.0, 200.0, 65.0),
            ai_provider: AiProvider::default(),
        }
    }
}

struct Current {
    identity: Option<Uuid>,
    settings: UserSettings,
    generation: u64,
}

/// Settings record kept in both stores with the same write policy as logs.
pub struct SettingsService {
    local: Arc<dyn LocalStore>,
    remote: Option<SyncQueue>,
    current: RwLock<Current>,
}

impl SettingsService {
    pub fn new(local: Arc<dyn LocalStore>, remote: Option<SyncQueue>) -> Self {
        Self {
            local,
            remote,
            current: RwLock::new(Current {
                identity: None,
                settings: UserSettings::default(),
                generation: 0,
            }),
        }
    }

    /// Switches to `identity`'s settings: the remote record when reachable,
    /// that identity's local copy otherwise. The remote fetch runs unlocked;
    /// if another load starts meanwhile, the newer one wins.
    pub async fn load(&self, identity: Option<Uuid>) -> UserSettings {
        let generation = {
            let mut current = self.current.write().await;
            current.generation += 1;
            current.generation
        };

        let from_remote = match (identity, &self.remote) {
            (Some(user_id), Some(remote)) => match remote.store().fetch_settings(user_id).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(%user_id, error = %e, "remote settings unavailable; using local");
                    None
                }
            },
            _ => None,
        };
        let settings = match from_remote {
            Some(s) => s,
            None => self.read_local(identity),
        };

        let mut current = self.current.write().await;
        if current.generation != generation {
            debug!(generation, "settings load overtaken by a newer one");
            return current.settings.clone();
        }
        current.identity = identity;
        current.settings = settings.clone();
        settings
    }

    pub async fn get(&self) -> UserSettings {
        self.current.read().await.settings.clone()
    }

    pub async fn save(&self, settings: UserSettings) -> Result<UserSettings, LocalStoreError> {
        let mut current = self.current.write().await;
        let settings = UserSettings {
            daily_goals: settings.daily_goals.clamped(),
            ..settings
        };
        self.local
            .set(&settings_key(current.identity), &serde_json::to_value(&settings)?)?;
        current.settings = settings.clone();

        if let (Some(user_id), Some(remote)) = (current.identity, &self.remote) {
            remote.enqueue(user_id, RemoteOp::SaveSettings(settings.clone()));
        }
        info!(provider = ?settings.ai_provider, "settings saved");
        Ok(settings)
    }

    fn read_local(&self, identity: Option<Uuid>) -> UserSettings {
        match self.local.get(&settings_key(identity)) {
            Ok(Some(v)) => serde_json::from_value(v).unwrap_or_else(|e| {
                warn!(error = %e, "local settings unreadable; using defaults");
                UserSettings::default()
            }),
            Ok(None) => UserSettings::default(),
            Err(e) => {
                warn!(error = %e, "local settings unreadable; using defaults");
                UserSettings::default()
            }
        }
    }
}
