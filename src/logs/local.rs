use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde_json::Value;
use tracing::{debug, warn};

use uuid::Uuid;

use crate::error::LocalStoreError;
use crate::nutrition::MealLog;

/// Logs written while nobody is signed in. The only source migration reads.
pub const LOGS_KEY: &str = "logs";
const SETTINGS_KEY: &str = "settings";

/// Each signed-in identity gets its own cache next to the anonymous one, so a
/// session never sees or migrates another identity's data.
pub fn logs_key(identity: Option<Uuid>) -> String {
    scoped(LOGS_KEY, identity)
}

pub fn settings_key(identity: Option<Uuid>) -> String {
    scoped(SETTINGS_KEY, identity)
}

fn scoped(base: &str, identity: Option<Uuid>) -> String {
    match identity {
        Some(user_id) => format!("{base}-{user_id}"),
        None => base.to_string(),
    }
}

/// Device-local key → JSON blob store. Writes are synchronous: when `set`
/// returns Ok the value is durable.
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, LocalStoreError>;
    fn set(&self, key: &str, value: &Value) -> Result<(), LocalStoreError>;
    fn remove(&self, key: &str) -> Result<(), LocalStoreError>;
}

/// One `<key>.json` file per key under `dir`.
pub struct FileLocalStore {
    dir: PathBuf,
}

impl FileLocalStore {
    pub fn open(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).with_context(|| format!("create data dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl LocalStore for FileLocalStore {
    fn get(&self, key: &str) -> Result<Option<Value>, LocalStoreError> {
        match fs::read(self.path(key)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), LocalStoreError> {
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(value)?)?;
        fs::rename(&tmp, &path)?;
        debug!(key, "local store written");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), LocalStoreError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Reads the log array stored under `key`. A corrupt blob reads as empty
/// rather than blocking startup.
pub fn read_logs(store: &dyn LocalStore, key: &str) -> Result<Vec<MealLog>, LocalStoreError> {
    let value = match store.get(key) {
        Ok(Some(v)) => v,
        Ok(None) => return Ok(Vec::new()),
        Err(LocalStoreError::Json(e)) => {
            warn!(key, error = %e, "local logs unreadable; treating as empty");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };

    match serde_json::from_value::<Vec<MealLog>>(value) {
        Ok(logs) => Ok(logs),
        Err(e) => {
            warn!(key, error = %e, "local logs have unexpected shape; treating as empty");
            Ok(Vec::new())
        }
    }
}

pub fn write_logs(store: &dyn LocalStore, key: &str, logs: &[MealLog]) -> Result<(), LocalStoreError> {
    store.set(key, &serde_json::to_value(logs)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nutrition::{FoodItem, Macros, MealType};
    use crate::testing::MemoryLocalStore;

    fn sample() -> MealLog {
        MealLog {
            id: "log-1".into(),
            timestamp: 1_700_000_000_000,
            image_ref: "captures/log-1.jpg".into(),
            items: vec![FoodItem::new("Apple", "1 medium", Macros::new(95.0, 0.5, 25.0, 0.3))],
            total_macros: Macros::new(95.0, 0.5, 25.0, 0.3),
            meal_type: MealType::Snack,
            note: Some("desk".into()),
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mealsync-{name}-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = temp_dir("persist");
        {
            let store = FileLocalStore::open(&dir).unwrap();
            write_logs(&store, LOGS_KEY, &[sample()]).unwrap();
        }
        let store = FileLocalStore::open(&dir).unwrap();
        assert_eq!(read_logs(&store, LOGS_KEY).unwrap(), vec![sample()]);

        store.remove(LOGS_KEY).unwrap();
        assert!(read_logs(&store, LOGS_KEY).unwrap().is_empty());
        // removing twice is fine
        store.remove(LOGS_KEY).unwrap();
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn corrupt_file_reads_as_empty() {
        let dir = temp_dir("corrupt");
        fs::write(dir.join("logs.json"), b"{not json").unwrap();
        let store = FileLocalStore::open(&dir).unwrap();
        assert!(read_logs(&store, LOGS_KEY).unwrap().is_empty());
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn wrong_shape_reads_as_empty() {
        let store = MemoryLocalStore::new();
        store.set(LOGS_KEY, &serde_json::json!({"logs": 3})).unwrap();
        assert!(read_logs(&store, LOGS_KEY).unwrap().is_empty());
    }

    #[test]
    fn identities_get_separate_keys() {
        let store = MemoryLocalStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        write_logs(&store, &logs_key(Some(a)), &[sample()]).unwrap();

        assert_eq!(read_logs(&store, &logs_key(Some(a))).unwrap(), vec![sample()]);
        assert!(read_logs(&store, &logs_key(Some(b))).unwrap().is_empty());
        assert!(read_logs(&store, &logs_key(None)).unwrap().is_empty());
        assert_eq!(settings_key(None), "settings");
        assert_ne!(settings_key(Some(a)), settings_key(Some(b)));
    }
}
