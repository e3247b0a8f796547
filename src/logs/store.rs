use std::{sync::Arc, time::Duration};

use serde::Serialize;
use time::Date;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::local::{self, LocalStore, LOGS_KEY};
use super::migration::{self, MigrationReport};
use super::sync::{RemoteOp, SyncQueue, SyncStatus};
use super::undo::{UndoEntry, UndoLedger};
use crate::error::StoreError;
use crate::nutrition::{self, Macros, MealLog};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
    pub source: LogSource,
    pub count: usize,
    pub migrated: Option<usize>,
}

struct Loaded {
    identity: Option<Uuid>,
    source: LogSource,
    /// Local key this session reads and writes.
    key: String,
    /// Newest first, unique ids.
    logs: Vec<MealLog>,
    /// Bumped by every `load`; only the newest one may swap its result in.
    generation: u64,
    pending: Option<PendingLoad>,
}

/// Writes made while a load is in flight, replayed onto its result.
struct PendingLoad {
    generation: u64,
    identity: Option<Uuid>,
    edits: Vec<Edit>,
}

enum Edit {
    Upsert(MealLog),
    Remove(String),
}

impl Edit {
    fn apply(self, logs: &mut Vec<MealLog>) {
        match self {
            Edit::Upsert(log) => {
                logs.retain(|l| l.id != log.id);
                insert_sorted(logs, log);
            }
            Edit::Remove(id) => logs.retain(|l| l.id != id),
        }
    }
}

struct Fetched {
    source: LogSource,
    key: String,
    logs: Vec<MealLog>,
    migrated: Option<usize>,
}

impl Fetched {
    fn local(key: String, logs: Vec<MealLog>) -> Self {
        Self {
            source: LogSource::Local,
            key,
            logs,
            migrated: None,
        }
    }
}

/// Canonical meal-log collection for the active identity.
///
/// Writes are optimistic: the in-memory list and the local store are updated
/// before the call returns, the remote write is queued and never rolls
/// anything back when it fails.
pub struct LogStore {
    local: Arc<dyn LocalStore>,
    remote: Option<SyncQueue>,
    undo: UndoLedger,
    state: RwLock<Loaded>,
}

impl LogStore {
    pub fn new(local: Arc<dyn LocalStore>, remote: Option<SyncQueue>, undo_window: Duration) -> Self {
        Self {
            local,
            remote,
            undo: UndoLedger::new(undo_window),
            state: RwLock::new(Loaded {
                identity: None,
                source: LogSource::Local,
                key: local::logs_key(None),
                logs: Vec::new(),
                generation: 0,
                pending: None,
            }),
        }
    }

    /// Replaces the in-memory collection with the one authoritative source for
    /// `identity`: remote when reachable (migrating anonymous logs into an
    /// empty remote first), the identity's local cache otherwise.
    ///
    /// Remote calls run without holding the collection, so reads and writes of
    /// the current session carry on meanwhile. A load overtaken by a newer one
    /// fails with `Superseded` and changes nothing.
    #[instrument(skip(self))]
    pub async fn load(&self, identity: Option<Uuid>) -> Result<LoadReport, StoreError> {
        let generation = {
            let mut state = self.state.write().await;
            let generation = state.generation + 1;
            state.generation = generation;
            state.pending = Some(PendingLoad {
                generation,
                identity,
                edits: Vec::new(),
            });
            generation
        };

        let fetched = self.fetch(identity).await;

        let mut state = self.state.write().await;
        let edits = match state.pending.take() {
            Some(p) if p.generation == generation => p.edits,
            newer => {
                state.pending = newer;
                debug!(generation, "load overtaken by a newer one");
                return Err(StoreError::Superseded);
            }
        };
        let Fetched {
            source,
            key,
            logs,
            migrated,
        } = fetched?;

        let replayed = !edits.is_empty();
        let mut logs = canonical(logs);
        for edit in edits {
            edit.apply(&mut logs);
        }
        if identity.is_some() || replayed {
            local::write_logs(self.local.as_ref(), &key, &logs)?;
        }

        let report = LoadReport {
            source,
            count: logs.len(),
            migrated,
        };
        state.identity = identity;
        state.source = source;
        state.key = key;
        state.logs = logs;
        self.undo.clear();
        info!(source = ?report.source, count = report.count, migrated = ?report.migrated, "logs loaded");
        Ok(report)
    }

    async fn fetch(&self, identity: Option<Uuid>) -> Result<Fetched, StoreError> {
        let store = self.local.as_ref();
        let Some(user_id) = identity else {
            return Ok(Fetched::local(LOGS_KEY.to_string(), local::read_logs(store, LOGS_KEY)?));
        };
        let cache_key = local::logs_key(identity);

        let Some(remote) = &self.remote else {
            warn!(%user_id, "no remote store configured; using local cache");
            let cached = local::read_logs(store, &cache_key)?;
            return Ok(Fetched::local(cache_key, cached));
        };

        let owner = migration::pending_owner(store);
        let remote_logs = match remote.store().fetch_logs(user_id).await {
            Ok(logs) => logs,
            Err(e) if owner == Some(user_id) => {
                warn!(%user_id, error = %e, "remote fetch failed; continuing on unmigrated logs");
                return Ok(Fetched::local(LOGS_KEY.to_string(), local::read_logs(store, LOGS_KEY)?));
            }
            Err(e) => {
                warn!(%user_id, error = %e, "remote fetch failed; falling back to local cache");
                let cached = local::read_logs(store, &cache_key)?;
                return Ok(Fetched::local(cache_key, cached));
            }
        };

        let anonymous = local::read_logs(store, LOGS_KEY)?;
        let needs_migration = !anonymous.is_empty()
            && match owner {
                Some(o) => o == user_id,
                None => remote_logs.is_empty(),
            };
        if !needs_migration {
            return Ok(Fetched {
                source: LogSource::Remote,
                key: cache_key,
                logs: remote_logs,
                migrated: None,
            });
        }

        match migration::migrate_local_logs(store, remote.store(), user_id).await {
            Ok(MigrationReport { migrated }) => {
                // remote now holds its previous logs plus every anonymous one
                let mut merged = anonymous;
                merged.extend(remote_logs);
                Ok(Fetched {
                    source: LogSource::Remote,
                    key: cache_key,
                    logs: merged,
                    migrated: Some(migrated),
                })
            }
            Err(e) => {
                // the anonymous logs now belong to this identity until a later
                // sign-in finishes moving them
                warn!(%user_id, error = %e, "migration incomplete; continuing on unmigrated logs");
                Ok(Fetched::local(LOGS_KEY.to_string(), anonymous))
            }
        }
    }

    /// Adds a new log. The local write has completed when this returns.
    #[instrument(skip(self, log), fields(id = %log.id))]
    pub async fn commit(&self, log: MealLog) -> Result<MealLog, StoreError> {
        check_totals(&log)?;
        let mut state = self.state.write().await;
        if state.logs.iter().any(|l| l.id == log.id) {
            return Err(StoreError::Invariant(format!("duplicate log id {}", log.id)));
        }

        let mut next = state.logs.clone();
        insert_sorted(&mut next, log.clone());
        local::write_logs(self.local.as_ref(), &state.key, &next)?;
        state.logs = next;
        record(&mut state, Edit::Upsert(log.clone()));

        self.push_remote(state.identity, RemoteOp::Upsert(log.clone()));
        info!(count = state.logs.len(), "log committed");
        Ok(log)
    }

    #[instrument(skip(self, log), fields(id = %log.id))]
    pub async fn update(&self, log: MealLog) -> Result<MealLog, StoreError> {
        check_totals(&log)?;
        let mut state = self.state.write().await;
        let idx = state
            .logs
            .iter()
            .position(|l| l.id == log.id)
            .ok_or_else(|| StoreError::NotFound(log.id.clone()))?;

        let mut next = state.logs.clone();
        next.remove(idx);
        insert_sorted(&mut next, log.clone());
        local::write_logs(self.local.as_ref(), &state.key, &next)?;
        state.logs = next;
        record(&mut state, Edit::Upsert(log.clone()));

        self.push_remote(state.identity, RemoteOp::Upsert(log.clone()));
        info!("log updated");
        Ok(log)
    }

    /// Removes a log and parks a copy in the undo ledger.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<UndoEntry, StoreError> {
        let mut state = self.state.write().await;
        let idx = state
            .logs
            .iter()
            .position(|l| l.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let mut next = state.logs.clone();
        let removed = next.remove(idx);
        local::write_logs(self.local.as_ref(), &state.key, &next)?;
        state.logs = next;
        record(&mut state, Edit::Remove(removed.id.clone()));

        self.push_remote(state.identity, RemoteOp::Delete(removed.id.clone()));
        info!("log deleted");
        Ok(self.undo.push(removed))
    }

    /// Re-inserts a deleted log if its undo window is still open. Returns
    /// `None` when there is nothing to restore. The remote record is
    /// re-created, since the remote delete may already have happened.
    #[instrument(skip(self))]
    pub async fn restore(&self, id: &str) -> Result<Option<MealLog>, StoreError> {
        let Some(entry) = self.undo.take(id) else {
            debug!("nothing to restore");
            return Ok(None);
        };
        match self.commit(entry.log.clone()).await {
            Ok(log) => Ok(Some(log)),
            Err(e) => {
                self.undo.reinstate(entry);
                Err(e)
            }
        }
    }

    pub fn pending_undo(&self) -> Option<UndoEntry> {
        self.undo.latest()
    }

    pub fn dismiss_undo(&self, id: &str) -> bool {
        self.undo.dismiss(id)
    }

    pub async fn logs(&self) -> Vec<MealLog> {
        self.state.read().await.logs.clone()
    }

    pub async fn get(&self, id: &str) -> Option<MealLog> {
        self.state.read().await.logs.iter().find(|l| l.id == id).cloned()
    }

    pub async fn identity(&self) -> Option<Uuid> {
        self.state.read().await.identity
    }

    pub async fn source(&self) -> LogSource {
        self.state.read().await.source
    }

    pub async fn totals_for_day(&self, day: Date) -> Macros {
        nutrition::daily_totals(&self.state.read().await.logs, day)
    }

    pub fn sync_status(&self) -> Option<SyncStatus> {
        self.remote.as_ref().map(SyncQueue::status)
    }

    /// Waits for queued remote writes to be attempted.
    pub async fn flush_remote(&self) {
        if let Some(remote) = &self.remote {
            remote.flush().await;
        }
    }

    fn push_remote(&self, identity: Option<Uuid>, op: RemoteOp) {
        match (identity, &self.remote) {
            (Some(user_id), Some(remote)) => remote.enqueue(user_id, op),
            _ => debug!("local-only session; remote write skipped"),
        }
    }
}

/// Keeps a write made during a load of the same identity, so the load's
/// snapshot does not drop it.
fn record(state: &mut Loaded, edit: Edit) {
    let identity = state.identity;
    if let Some(pending) = state.pending.as_mut() {
        if pending.identity == identity {
            pending.edits.push(edit);
        }
    }
}

fn check_totals(log: &MealLog) -> Result<(), StoreError> {
    if log.totals_consistent() {
        Ok(())
    } else {
        Err(StoreError::Invariant(format!(
            "total macros of {} do not match its items",
            log.id
        )))
    }
}

/// Inserts before every log that is not newer, keeping newest-first order.
fn insert_sorted(logs: &mut Vec<MealLog>, log: MealLog) {
    let idx = logs.partition_point(|l| l.timestamp > log.timestamp);
    logs.insert(idx, log);
}

/// Newest first; the first occurrence of a duplicated id wins.
fn canonical(logs: Vec<MealLog>) -> Vec<MealLog> {
    let mut seen = std::collections::HashSet::new();
    let mut out: Vec<MealLog> = logs
        .into_iter()
        .filter(|l| seen.insert(l.id.clone()))
        .collect();
    out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    out
}
