//! In-memory collaborators for tests.

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::analysis::{AiProvider, AnalyzerClient};
use crate::auth::claims::{Claims, TokenKind};
use crate::config::{AnalyzerConfig, AppConfig, JwtConfig};
use crate::error::{LocalStoreError, SyncError};
use crate::logs::{LocalStore, RemoteStore};
use crate::nutrition::{FoodItem, Macros, MealLog, MealType};
use crate::settings::UserSettings;
use crate::storage::StorageClient;

pub fn meal_log(id: &str, timestamp: i64) -> MealLog {
    let items = vec![FoodItem::new("Soup", "300ml", Macros::new(180.0, 8.0, 20.0, 6.0))];
    MealLog {
        id: id.to_string(),
        timestamp,
        image_ref: format!("captures/{id}.jpg"),
        items,
        total_macros: Macros::new(180.0, 8.0, 20.0, 6.0),
        meal_type: MealType::Lunch,
        note: None,
    }
}

pub fn banana() -> FoodItem {
    FoodItem::new("Banana", "1 medium", Macros::new(89.0, 1.1, 23.0, 0.3))
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: None,
        jwt: JwtConfig {
            secret: "test-secret".into(),
            issuer: "test-issuer".into(),
            audience: "test-aud".into(),
        },
        analyzer: AnalyzerConfig {
            url: "http://analyzer.invalid".into(),
            api_key: None,
            timeout: Duration::from_secs(30),
        },
        minio_endpoint: "fake".into(),
        minio_bucket: "fake".into(),
        minio_access_key: "fake".into(),
        minio_secret_key: "fake".into(),
        data_dir: PathBuf::from("unused"),
        undo_window: Duration::from_secs(5),
        host: "127.0.0.1".into(),
        port: 0,
    }
}

/// Signs a token the way the identity provider would. Negative `ttl_secs`
/// gives an already expired token.
pub fn token(cfg: &JwtConfig, user_id: Uuid, kind: TokenKind, ttl_secs: i64) -> String {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let claims = Claims {
        sub: user_id,
        iat: now as usize,
        exp: (now + ttl_secs) as usize,
        iss: cfg.issuer.clone(),
        aud: cfg.audience.clone(),
        kind,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(cfg.secret.as_bytes()),
    )
    .expect("sign test token")
}

/// Handles on the collaborators behind `AppState::fake()`.
#[derive(Default)]
pub struct Fakes {
    pub local: Arc<MemoryLocalStore>,
    pub remote: Arc<MemoryRemoteStore>,
    pub analyzer: Arc<ScriptedAnalyzer>,
    pub storage: Arc<FakeStorage>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
pub struct MemoryLocalStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemoryLocalStore {
    fn get(&self, key: &str) -> Result<Option<Value>, LocalStoreError> {
        let entries = lock(&self.entries);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), LocalStoreError> {
        let mut entries = lock(&self.entries);
        entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), LocalStoreError> {
        let mut entries = lock(&self.entries);
        entries.remove(key);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryRemoteStore {
    logs: Mutex<HashMap<Uuid, BTreeMap<String, MealLog>>>,
    settings: Mutex<HashMap<Uuid, UserSettings>>,
    journal: Mutex<Vec<String>>,
    offline: AtomicBool,
    writes_left: Mutex<Option<usize>>,
    upsert_delay: Mutex<Duration>,
    fetch_delay: Mutex<Duration>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Lets `n` more log writes succeed, then fails the rest.
    pub fn fail_writes_after(&self, n: usize) {
        *lock(&self.writes_left) = Some(n);
    }

    pub fn heal(&self) {
        self.set_offline(false);
        *lock(&self.writes_left) = None;
    }

    pub fn set_upsert_delay(&self, delay: Duration) {
        *lock(&self.upsert_delay) = delay;
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *lock(&self.fetch_delay) = delay;
    }

    pub fn seed(&self, user_id: Uuid, logs: Vec<MealLog>) {
        let mut all = lock(&self.logs);
        let entry = all.entry(user_id).or_default();
        for log in logs {
            entry.insert(log.id.clone(), log);
        }
    }

    pub fn logs_for(&self, user_id: Uuid) -> Vec<MealLog> {
        let mut logs: Vec<_> = lock(&self.logs)
            .get(&user_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        logs
    }

    pub fn settings_for(&self, user_id: Uuid) -> Option<UserSettings> {
        lock(&self.settings).get(&user_id).cloned()
    }

    pub fn journal(&self) -> Vec<String> {
        lock(&self.journal).clone()
    }

    fn check_online(&self) -> Result<(), SyncError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::Unavailable("offline".into()));
        }
        Ok(())
    }

    fn take_write(&self) -> Result<(), SyncError> {
        self.check_online()?;
        let mut left = lock(&self.writes_left);
        match left.as_mut() {
            Some(0) => Err(SyncError::Unavailable("write budget exhausted".into())),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn fetch_logs(&self, user_id: Uuid) -> Result<Vec<MealLog>, SyncError> {
        let delay = *lock(&self.fetch_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.check_online()?;
        Ok(self.logs_for(user_id))
    }

    async fn upsert_log(&self, user_id: Uuid, log: &MealLog) -> Result<(), SyncError> {
        let delay = *lock(&self.upsert_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.take_write()?;
        lock(&self.logs)
            .entry(user_id)
            .or_default()
            .insert(log.id.clone(), log.clone());
        lock(&self.journal).push(format!("upsert:{}", log.id));
        Ok(())
    }

    async fn delete_log(&self, user_id: Uuid, log_id: &str) -> Result<(), SyncError> {
        self.take_write()?;
        if let Some(logs) = lock(&self.logs).get_mut(&user_id) {
            logs.remove(log_id);
        }
        lock(&self.journal).push(format!("delete:{log_id}"));
        Ok(())
    }

    async fn fetch_settings(&self, user_id: Uuid) -> Result<Option<UserSettings>, SyncError> {
        self.check_online()?;
        Ok(self.settings_for(user_id))
    }

    async fn save_settings(&self, user_id: Uuid, settings: &UserSettings) -> Result<(), SyncError> {
        self.check_online()?;
        lock(&self.settings).insert(user_id, settings.clone());
        Ok(())
    }
}

/// Analyzer that replays queued responses, optionally after a delay.
#[derive(Default)]
pub struct ScriptedAnalyzer {
    analyze: Mutex<VecDeque<anyhow::Result<Vec<FoodItem>>>>,
    correct: Mutex<VecDeque<anyhow::Result<Vec<FoodItem>>>>,
    search: Mutex<Vec<FoodItem>>,
    delay: Mutex<Duration>,
    instructions: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_analyze(&self, result: anyhow::Result<Vec<FoodItem>>) {
        lock(&self.analyze).push_back(result);
    }

    pub fn push_correct(&self, result: anyhow::Result<Vec<FoodItem>>) {
        lock(&self.correct).push_back(result);
    }

    pub fn set_search(&self, items: Vec<FoodItem>) {
        *lock(&self.search) = items;
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    pub fn instructions(&self) -> Vec<String> {
        lock(&self.instructions).clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl AnalyzerClient for ScriptedAnalyzer {
    async fn analyze(&self, _image: &[u8], _provider: AiProvider) -> anyhow::Result<Vec<FoodItem>> {
        self.wait().await;
        lock(&self.analyze)
            .pop_front()
            .unwrap_or_else(|| Err(anyhow::anyhow!("no scripted analyze response")))
    }

    async fn correct(
        &self,
        _image: &[u8],
        _items: &[FoodItem],
        instruction: &str,
        _provider: AiProvider,
    ) -> anyhow::Result<Vec<FoodItem>> {
        lock(&self.instructions).push(instruction.to_string());
        self.wait().await;
        lock(&self.correct)
            .pop_front()
            .unwrap_or_else(|| Err(anyhow::anyhow!("no scripted correct response")))
    }

    async fn search(&self, query: &str, _provider: AiProvider) -> anyhow::Result<Vec<FoodItem>> {
        self.wait().await;
        let q = query.to_lowercase();
        Ok(lock(&self.search)
            .iter()
            .filter(|i| i.name.to_lowercase().contains(&q))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashSet<String>>,
}

impl FakeStorage {
    pub fn contains(&self, key: &str) -> bool {
        lock(&self.objects).contains(key)
    }
}

#[async_trait]
impl StorageClient for FakeStorage {
    async fn put_object(&self, key: &str, _body: Bytes, _content_type: &str) -> anyhow::Result<()> {
        lock(&self.objects).insert(key.to_string());
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        lock(&self.objects).remove(key);
        Ok(())
    }

    async fn presign_get(&self, key: &str, _seconds: u64) -> anyhow::Result<String> {
        Ok(format!("https://fake.local/{}", key))
    }
}
