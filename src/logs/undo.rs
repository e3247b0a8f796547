use std::{sync::Mutex, time::Duration};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::time::Instant;

use crate::nutrition::MealLog;

/// Snapshot of a deleted log, restorable until `expires_at`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoEntry {
    pub log: MealLog,
    /// Epoch millis, for display.
    pub expires_at: i64,
    #[serde(skip)]
    deadline: Instant,
}

impl UndoEntry {
    fn expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// Holding area for soft-deleted logs. Entries are copies; they never point
/// back into the live collection. Expiry is evaluated lazily on every access.
pub struct UndoLedger {
    window: Duration,
    entries: Mutex<Vec<UndoEntry>>,
}

impl UndoLedger {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, log: MealLog) -> UndoEntry {
        let now = Instant::now();
        let expires_at = OffsetDateTime::now_utc() + self.window;
        let entry = UndoEntry {
            log,
            expires_at: (expires_at.unix_timestamp_nanos() / 1_000_000) as i64,
            deadline: now + self.window,
        };

        let mut entries = self.lock_live(now);
        entries.retain(|e| e.log.id != entry.log.id);
        entries.push(entry.clone());
        entry
    }

    /// Removes and returns the entry if it has not expired.
    pub fn take(&self, log_id: &str) -> Option<UndoEntry> {
        let mut entries = self.lock_live(Instant::now());
        let idx = entries.iter().position(|e| e.log.id == log_id)?;
        Some(entries.remove(idx))
    }

    /// Puts back an entry taken by a restore that could not complete.
    pub fn reinstate(&self, entry: UndoEntry) {
        let now = Instant::now();
        if entry.expired(now) {
            return;
        }
        let mut entries = self.lock_live(now);
        entries.retain(|e| e.log.id != entry.log.id);
        entries.push(entry);
    }

    /// The single entry the user sees: the most recent unexpired delete.
    pub fn latest(&self) -> Option<UndoEntry> {
        self.lock_live(Instant::now()).last().cloned()
    }

    /// Finalizes a delete before its window runs out.
    pub fn dismiss(&self, log_id: &str) -> bool {
        self.take(log_id).is_some()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn lock_live(&self, now: Instant) -> std::sync::MutexGuard<'_, Vec<UndoEntry>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|e| !e.expired(now));
        entries
    }
}
