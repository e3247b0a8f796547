use std::sync::Arc;

use tracing::warn;

use crate::analysis::{AnalysisSession, AnalyzerClient, HttpAnalyzer};
use crate::config::AppConfig;
use crate::db;
use crate::logs::{FileLocalStore, LocalStore, LogStore, PgRemoteStore, SyncQueue};
use crate::settings::SettingsService;
use crate::storage::{Storage, StorageClient};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn StorageClient>,
    pub logs: Arc<LogStore>,
    pub settings: Arc<SettingsService>,
    pub analysis: Arc<AnalysisSession>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let local = Arc::new(FileLocalStore::open(&config.data_dir)?) as Arc<dyn LocalStore>;

        let remote = match &config.database_url {
            Some(url) => {
                let db = db::connect(url).await?;
                Some(SyncQueue::new(Arc::new(PgRemoteStore::new(db))))
            }
            None => {
                warn!("DATABASE_URL not set; sessions stay local-only");
                None
            }
        };

        let storage = Arc::new(Storage::from_config(&config).await?) as Arc<dyn StorageClient>;
        let analyzer = Arc::new(HttpAnalyzer::new(
            &config.analyzer.url,
            config.analyzer.api_key.clone(),
        )?) as Arc<dyn AnalyzerClient>;

        let state = Self::from_parts(config, storage, local, remote, analyzer);

        // local-only until a session is opened
        state.logs.load(None).await?;
        state.settings.load(None).await;
        Ok(state)
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        storage: Arc<dyn StorageClient>,
        local: Arc<dyn LocalStore>,
        remote: Option<SyncQueue>,
        analyzer: Arc<dyn AnalyzerClient>,
    ) -> Self {
        Self {
            logs: Arc::new(LogStore::new(local.clone(), remote.clone(), config.undo_window)),
            settings: Arc::new(SettingsService::new(local, remote)),
            analysis: Arc::new(AnalysisSession::new(analyzer, config.analyzer.timeout)),
            storage,
            config,
        }
    }

    /// State wired to in-memory collaborators, in local-only mode.
    #[cfg(test)]
    pub fn fake() -> (Self, crate::testing::Fakes) {
        use crate::logs::RemoteStore;
        use crate::testing::{test_config, Fakes};

        let fakes = Fakes::default();
        let state = Self::from_parts(
            Arc::new(test_config()),
            fakes.storage.clone() as Arc<dyn StorageClient>,
            fakes.local.clone() as Arc<dyn LocalStore>,
            Some(SyncQueue::new(fakes.remote.clone() as Arc<dyn RemoteStore>)),
            fakes.analyzer.clone() as Arc<dyn AnalyzerClient>,
        );
        (state, fakes)
    }
}
