use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use super::remote::RemoteStore;
use crate::error::SyncError;
use crate::nutrition::MealLog;
use crate::settings::UserSettings;

#[derive(Debug, Clone)]
pub enum RemoteOp {
    Upsert(MealLog),
    Delete(String),
    SaveSettings(UserSettings),
}

impl RemoteOp {
    fn lane(&self) -> String {
        match self {
            RemoteOp::Upsert(log) => format!("log:{}", log.id),
            RemoteOp::Delete(id) => format!("log:{id}"),
            RemoteOp::SaveSettings(_) => "settings".to_string(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            RemoteOp::Upsert(_) => "upsert",
            RemoteOp::Delete(_) => "delete",
            RemoteOp::SaveSettings(_) => "save_settings",
        }
    }

    fn key(&self) -> &str {
        match self {
            RemoteOp::Upsert(log) => &log.id,
            RemoteOp::Delete(id) => id,
            RemoteOp::SaveSettings(_) => "settings",
        }
    }
}

/// A remote write that failed while the local write had already succeeded.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncNotice {
    pub op: &'static str,
    pub key: String,
    pub error: String,
    /// Epoch millis.
    pub at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub pending: usize,
    pub last_failure: Option<SyncNotice>,
}

struct Job {
    user_id: Uuid,
    op: RemoteOp,
}

struct Inner {
    remote: Arc<dyn RemoteStore>,
    lanes: Mutex<HashMap<String, mpsc::UnboundedSender<Job>>>,
    pending: watch::Sender<usize>,
    last_failure: Mutex<Option<SyncNotice>>,
}

/// Fire-and-forget remote writes. Operations on the same log run strictly in
/// the order they were enqueued; different logs proceed independently.
#[derive(Clone)]
pub struct SyncQueue {
    inner: Arc<Inner>,
}

impl SyncQueue {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                remote,
                lanes: Mutex::new(HashMap::new()),
                pending,
                last_failure: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &dyn RemoteStore {
        self.inner.remote.as_ref()
    }

    pub fn enqueue(&self, user_id: Uuid, op: RemoteOp) {
        let lane = op.lane();
        let mut job = Job { user_id, op };
        self.inner.pending.send_modify(|n| *n += 1);

        let mut lanes = self.inner.lanes.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = lanes.get(&lane) {
            match tx.send(job) {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => job = returned,
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        // the receiver is alive until run_lane returns
        let _ = tx.send(job);
        lanes.insert(lane.clone(), tx);
        tokio::spawn(run_lane(self.inner.clone(), lane, rx));
    }

    /// Resolves once every enqueued operation has been attempted.
    pub async fn flush(&self) {
        let mut rx = self.inner.pending.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub fn status(&self) -> SyncStatus {
        let last_failure = self
            .inner
            .last_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        SyncStatus {
            pending: *self.inner.pending.borrow(),
            last_failure,
        }
    }
}

async fn run_lane(inner: Arc<Inner>, lane: String, mut rx: mpsc::UnboundedReceiver<Job>) {
    loop {
        let next = match rx.try_recv() {
            Ok(job) => Some(job),
            Err(_) => {
                // enqueue sends while holding the lanes lock, so an empty
                // channel seen under the lock stays empty until we are removed
                let mut lanes = inner.lanes.lock().unwrap_or_else(|e| e.into_inner());
                let job = rx.try_recv().ok();
                if job.is_none() {
                    lanes.remove(&lane);
                }
                job
            }
        };
        let Some(job) = next else {
            debug!(%lane, "sync lane drained");
            return;
        };

        if let Err(e) = apply(inner.remote.as_ref(), &job).await {
            report(&inner, &job.op, e);
        }
        inner.pending.send_modify(|n| *n = n.saturating_sub(1));
    }
}

async fn apply(remote: &dyn RemoteStore, job: &Job) -> Result<(), SyncError> {
    match &job.op {
        RemoteOp::Upsert(log) => remote.upsert_log(job.user_id, log).await,
        RemoteOp::Delete(id) => remote.delete_log(job.user_id, id).await,
        RemoteOp::SaveSettings(settings) => remote.save_settings(job.user_id, settings).await,
    }
}

fn report(inner: &Inner, op: &RemoteOp, e: SyncError) {
    warn!(op = op.label(), key = op.key(), error = %e, "remote sync failed; local copy kept");
    let notice = SyncNotice {
        op: op.label(),
        key: op.key().to_string(),
        error: e.to_string(),
        at: (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
    };
    *inner.last_failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(notice);
}
