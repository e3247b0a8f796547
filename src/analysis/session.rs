use std::{future::Future, sync::Arc, time::Duration};

use bytes::Bytes;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use super::client::{AiProvider, AnalyzerClient};
use super::job::{AnalysisJob, ItemPatch, JobView, Ticket};
use crate::error::AnalysisError;
use crate::logs::LogStore;
use crate::nutrition::{FoodItem, MealLog, MealType};

/// A job installed by [`AnalysisSession::capture`], not yet analyzed.
pub struct Capture {
    id: String,
    ticket: Ticket,
    image: Bytes,
    /// Image of the job this capture replaced.
    pub replaced: Option<String>,
}

/// Drives the single live [`AnalysisJob`] of a session against the analyzer.
///
/// The job lock is never held while the analyzer is awaited. Each completion
/// re-checks the job id and ticket, so a result for a replaced, dismissed or
/// cancelled job is dropped instead of applied.
pub struct AnalysisSession {
    analyzer: Arc<dyn AnalyzerClient>,
    timeout: Duration,
    job: Mutex<Option<AnalysisJob>>,
}

impl AnalysisSession {
    pub fn new(analyzer: Arc<dyn AnalyzerClient>, timeout: Duration) -> Self {
        Self {
            analyzer,
            timeout,
            job: Mutex::new(None),
        }
    }

    /// Installs a new job for `image`, replacing any current one without
    /// waiting for its outstanding call. The replaced job's image reference is
    /// handed back since nothing else can reach it anymore.
    #[instrument(skip(self, image), fields(bytes = image.len()))]
    pub async fn capture(
        &self,
        id: String,
        image_ref: String,
        image: Bytes,
    ) -> Result<Capture, AnalysisError> {
        let created_at = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
        let mut slot = self.job.lock().await;
        let mut job = AnalysisJob::new(id.clone(), image_ref, image.clone(), created_at);
        let ticket = job.begin_analysis()?;

        // a late result for the old job no longer matches the slot's id
        let replaced = slot.take().map(|old| {
            info!(old = %old.id(), status = ?old.status(), "replacing unresolved analysis job");
            old.image_ref().to_string()
        });
        *slot = Some(job);
        Ok(Capture {
            id,
            ticket,
            image,
            replaced,
        })
    }

    /// Runs the first analysis of a freshly captured job.
    pub async fn analyze(&self, capture: Capture, provider: AiProvider) -> Result<JobView, AnalysisError> {
        self.run_analysis(&capture.id, capture.ticket, capture.image, provider)
            .await
    }

    #[cfg(test)]
    pub async fn start(
        &self,
        id: String,
        image_ref: String,
        image: Bytes,
        provider: AiProvider,
    ) -> Result<JobView, AnalysisError> {
        let capture = self.capture(id, image_ref, image).await?;
        self.analyze(capture, provider).await
    }

    pub async fn retry(&self, provider: AiProvider) -> Result<JobView, AnalysisError> {
        let (id, ticket, image) = {
            let mut slot = self.job.lock().await;
            let job = slot.as_mut().ok_or(AnalysisError::NoJob)?;
            let ticket = job.retry()?;
            (job.id().to_string(), ticket, job.image())
        };
        info!(%id, "retrying analysis");
        self.run_analysis(&id, ticket, image, provider).await
    }

    async fn run_analysis(
        &self,
        id: &str,
        ticket: Ticket,
        image: Bytes,
        provider: AiProvider,
    ) -> Result<JobView, AnalysisError> {
        let result = if image.is_empty() {
            Err(AnalysisError::InvalidImage)
        } else {
            self.call(self.analyzer.analyze(&image, provider)).await
        };

        let mut slot = self.job.lock().await;
        let job = current(&mut slot, id)?;
        if let Err(e) = job.finish_analysis(ticket, result) {
            if !matches!(e, AnalysisError::Stale) {
                warn!(%id, error = %e, "analysis failed");
            }
            return Err(e);
        }
        info!(%id, items = job.draft_items().len(), "analysis complete");
        Ok(job.view())
    }

    /// Sends the current draft and a free-text instruction back to the analyzer.
    #[instrument(skip(self, instruction))]
    pub async fn correct(&self, instruction: &str, provider: AiProvider) -> Result<JobView, AnalysisError> {
        let (id, ticket, image, items) = {
            let mut slot = self.job.lock().await;
            let job = slot.as_mut().ok_or(AnalysisError::NoJob)?;
            let ticket = job.begin_correction()?;
            (job.id().to_string(), ticket, job.image(), job.draft_items().to_vec())
        };

        let result = self
            .call(self.analyzer.correct(&image, &items, instruction, provider))
            .await;

        let mut slot = self.job.lock().await;
        let job = current(&mut slot, &id)?;
        if let Err(e) = job.finish_correction(ticket, result) {
            if !matches!(e, AnalysisError::Stale) {
                warn!(%id, error = %e, "correction failed; draft kept");
            }
            return Err(e);
        }
        info!(%id, items = job.draft_items().len(), "draft corrected");
        Ok(job.view())
    }

    pub async fn cancel(&self) -> Result<JobView, AnalysisError> {
        let mut slot = self.job.lock().await;
        let job = slot.as_mut().ok_or(AnalysisError::NoJob)?;
        job.cancel();
        info!(id = %job.id(), status = ?job.status(), "analysis cancelled");
        Ok(job.view())
    }

    /// Discards the job without producing a log. Returns its image ref.
    pub async fn dismiss(&self) -> Option<String> {
        let mut job = self.job.lock().await.take()?;
        job.cancel();
        info!(id = %job.id(), "analysis job dismissed");
        Some(job.image_ref().to_string())
    }

    pub async fn current(&self) -> Option<JobView> {
        self.job.lock().await.as_ref().map(AnalysisJob::view)
    }

    pub async fn edit_item(&self, index: usize, patch: ItemPatch) -> Result<JobView, AnalysisError> {
        self.with_job(|job| job.edit_item(index, patch).map(|_| ())).await
    }

    pub async fn add_item(&self, item: Option<FoodItem>) -> Result<JobView, AnalysisError> {
        self.with_job(|job| job.add_item(item).map(|_| ())).await
    }

    pub async fn remove_item(&self, index: usize) -> Result<JobView, AnalysisError> {
        self.with_job(|job| job.remove_item(index).map(|_| ())).await
    }

    /// Turns the draft into a MealLog and hands it to `logs`. The job ends only
    /// if the store accepted the log.
    #[instrument(skip(self, logs, note))]
    pub async fn commit(
        &self,
        logs: &LogStore,
        meal_type: MealType,
        note: Option<String>,
    ) -> Result<MealLog, AnalysisError> {
        let mut slot = self.job.lock().await;
        let job = slot.as_mut().ok_or(AnalysisError::NoJob)?;
        let log = job.to_meal_log(meal_type, note)?;
        let log = logs.commit(log).await?;
        *slot = None;
        Ok(log)
    }

    pub async fn search(&self, query: &str, provider: AiProvider) -> Result<Vec<FoodItem>, AnalysisError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        self.call(self.analyzer.search(query, provider)).await
    }

    async fn with_job<F>(&self, f: F) -> Result<JobView, AnalysisError>
    where
        F: FnOnce(&mut AnalysisJob) -> Result<(), AnalysisError>,
    {
        let mut slot = self.job.lock().await;
        let job = slot.as_mut().ok_or(AnalysisError::NoJob)?;
        f(job)?;
        Ok(job.view())
    }

    async fn call<F>(&self, fut: F) -> Result<Vec<FoodItem>, AnalysisError>
    where
        F: Future<Output = anyhow::Result<Vec<FoodItem>>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(items)) => Ok(items),
            Ok(Err(e)) => Err(AnalysisError::Analyzer(e.to_string())),
            Err(_) => Err(AnalysisError::Timeout),
        }
    }
}

fn current<'a>(slot: &'a mut Option<AnalysisJob>, id: &str) -> Result<&'a mut AnalysisJob, AnalysisError> {
    slot.as_mut()
        .filter(|job| job.id() == id)
        .ok_or(AnalysisError::Stale)
}
