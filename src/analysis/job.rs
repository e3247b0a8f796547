use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::nutrition::{self, FoodItem, Macros, MealLog, MealType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Analyzing,
    Complete,
    Error,
}

impl JobStatus {
    fn name(self) -> &'static str {
        match self {
            JobStatus::Analyzing => "analyzing",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    Analyze,
    Correct,
}

/// Proof that an analyzer call was issued by a job at a given generation.
/// A result is only applied if its ticket still matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    generation: u64,
    kind: CallKind,
}

/// User edit to one draft item. Absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPatch {
    pub name: Option<String>,
    pub serving_size: Option<String>,
    pub macros: Option<Macros>,
    pub micros: Option<BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: String,
    pub image_ref: String,
    pub created_at: i64,
    pub status: JobStatus,
    pub draft_items: Vec<FoodItem>,
    pub draft_totals: Macros,
    pub last_error: Option<String>,
    pub in_flight: bool,
}

/// One captured image on its way to becoming a MealLog.
///
/// Pure state: issuing and completing analyzer calls is split into
/// `begin_*` (returns a [`Ticket`]) and `finish_*` (applies a result only if
/// the ticket is still current), so the caller can await the analyzer with
/// no lock held.
#[derive(Debug)]
pub struct AnalysisJob {
    id: String,
    image_ref: String,
    image: Bytes,
    created_at: i64,
    status: JobStatus,
    draft_items: Vec<FoodItem>,
    last_error: Option<String>,
    generation: u64,
    in_flight: Option<Ticket>,
}

impl AnalysisJob {
    pub fn new(id: String, image_ref: String, image: Bytes, created_at: i64) -> Self {
        Self {
            id,
            image_ref,
            image,
            created_at,
            status: JobStatus::Analyzing,
            draft_items: Vec::new(),
            last_error: None,
            generation: 0,
            in_flight: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn image_ref(&self) -> &str {
        &self.image_ref
    }

    pub fn image(&self) -> Bytes {
        self.image.clone()
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn draft_items(&self) -> &[FoodItem] {
        &self.draft_items
    }

    /// Starts the initial analysis, or a retry after an error.
    pub fn begin_analysis(&mut self) -> Result<Ticket, AnalysisError> {
        self.ensure_idle()?;
        if self.status == JobStatus::Complete {
            return Err(AnalysisError::InvalidState(self.status.name()));
        }
        self.status = JobStatus::Analyzing;
        self.last_error = None;
        Ok(self.issue(CallKind::Analyze))
    }

    pub fn retry(&mut self) -> Result<Ticket, AnalysisError> {
        self.ensure_idle()?;
        if self.status != JobStatus::Error {
            return Err(AnalysisError::InvalidState(self.status.name()));
        }
        self.begin_analysis()
    }

    /// Applies an analysis result. A stale ticket changes nothing and yields
    /// `Stale`; otherwise failures move the job to `error` and are returned.
    pub fn finish_analysis(
        &mut self,
        ticket: Ticket,
        result: Result<Vec<FoodItem>, AnalysisError>,
    ) -> Result<(), AnalysisError> {
        self.accept(ticket, CallKind::Analyze)?;

        match result.and_then(validated) {
            Ok(items) => {
                self.draft_items = items;
                self.status = JobStatus::Complete;
                self.last_error = None;
                Ok(())
            }
            Err(e) => {
                self.status = JobStatus::Error;
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub fn begin_correction(&mut self) -> Result<Ticket, AnalysisError> {
        self.ensure_idle()?;
        self.ensure_complete()?;
        Ok(self.issue(CallKind::Correct))
    }

    /// Replaces the whole draft on success. Any failure, including an empty
    /// result, keeps the previous draft and stays `complete`.
    pub fn finish_correction(
        &mut self,
        ticket: Ticket,
        result: Result<Vec<FoodItem>, AnalysisError>,
    ) -> Result<(), AnalysisError> {
        self.accept(ticket, CallKind::Correct)?;

        match result.and_then(validated) {
            Ok(items) => {
                self.draft_items = items;
                self.last_error = None;
                Ok(())
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Abandons the outstanding call, if any. Its result will be discarded
    /// when it arrives. An interrupted analysis leaves the job in `error`
    /// so it can be retried.
    pub fn cancel(&mut self) {
        self.generation += 1;
        if let Some(ticket) = self.in_flight.take() {
            if ticket.kind == CallKind::Analyze {
                self.status = JobStatus::Error;
                self.last_error = Some(AnalysisError::Cancelled.to_string());
            }
        }
    }

    pub fn edit_item(&mut self, index: usize, patch: ItemPatch) -> Result<&FoodItem, AnalysisError> {
        self.ensure_editable()?;
        let item = self
            .draft_items
            .get_mut(index)
            .ok_or(AnalysisError::InvalidIndex(index))?;

        if let Some(name) = patch.name {
            item.name = name;
        }
        if let Some(serving) = patch.serving_size {
            item.set_serving(&serving);
        }
        if let Some(macros) = patch.macros {
            item.macros = macros.clamped();
        }
        if let Some(micros) = patch.micros {
            item.micros = Some(micros);
        }
        Ok(item)
    }

    /// Appends `item`, or a blank one to fill in by hand. Returns its index.
    pub fn add_item(&mut self, item: Option<FoodItem>) -> Result<usize, AnalysisError> {
        self.ensure_editable()?;
        self.draft_items.push(item.unwrap_or_else(FoodItem::blank));
        Ok(self.draft_items.len() - 1)
    }

    pub fn remove_item(&mut self, index: usize) -> Result<FoodItem, AnalysisError> {
        self.ensure_editable()?;
        if index >= self.draft_items.len() {
            return Err(AnalysisError::InvalidIndex(index));
        }
        Ok(self.draft_items.remove(index))
    }

    /// Builds the log this job would commit as. The job itself is untouched so
    /// a rejected commit can be retried.
    pub fn to_meal_log(&self, meal_type: MealType, note: Option<String>) -> Result<MealLog, AnalysisError> {
        self.ensure_editable()?;
        if self.draft_items.is_empty() {
            return Err(AnalysisError::EmptyDraft);
        }
        Ok(MealLog {
            id: self.id.clone(),
            timestamp: self.created_at,
            image_ref: self.image_ref.clone(),
            items: self.draft_items.clone(),
            total_macros: nutrition::sum(&self.draft_items),
            meal_type,
            note: note.filter(|n| !n.trim().is_empty()),
        })
    }

    pub fn view(&self) -> JobView {
        JobView {
            id: self.id.clone(),
            image_ref: self.image_ref.clone(),
            created_at: self.created_at,
            status: self.status,
            draft_items: self.draft_items.clone(),
            draft_totals: nutrition::sum(&self.draft_items),
            last_error: self.last_error.clone(),
            in_flight: self.in_flight.is_some(),
        }
    }

    fn issue(&mut self, kind: CallKind) -> Ticket {
        self.generation += 1;
        let ticket = Ticket {
            generation: self.generation,
            kind,
        };
        self.in_flight = Some(ticket);
        ticket
    }

    fn accept(&mut self, ticket: Ticket, kind: CallKind) -> Result<(), AnalysisError> {
        if ticket.kind != kind || self.in_flight != Some(ticket) || ticket.generation != self.generation {
            return Err(AnalysisError::Stale);
        }
        self.in_flight = None;
        Ok(())
    }

    fn ensure_idle(&self) -> Result<(), AnalysisError> {
        if self.in_flight.is_some() {
            return Err(AnalysisError::Busy);
        }
        Ok(())
    }

    fn ensure_complete(&self) -> Result<(), AnalysisError> {
        if self.status != JobStatus::Complete {
            return Err(AnalysisError::InvalidState(self.status.name()));
        }
        Ok(())
    }

    fn ensure_editable(&self) -> Result<(), AnalysisError> {
        self.ensure_idle()?;
        self.ensure_complete()
    }
}

/// Accepts an analyzer result only as a whole: an empty list or any item
/// without a name rejects all of it.
fn validated(items: Vec<FoodItem>) -> Result<Vec<FoodItem>, AnalysisError> {
    if items.is_empty() {
        return Err(AnalysisError::NoItems);
    }
    if let Some(pos) = items.iter().position(|i| i.name.trim().is_empty()) {
        return Err(AnalysisError::Analyzer(format!("item {pos} has no name")));
    }
    Ok(items
        .into_iter()
        .map(|mut i| {
            i.macros = i.macros.clamped();
            i
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::banana;

    fn job() -> AnalysisJob {
        AnalysisJob::new("job-1".into(), "captures/job-1.jpg".into(), Bytes::from_static(b"jpeg"), 1_700_000_000_000)
    }

    fn complete_job(items: Vec<FoodItem>) -> AnalysisJob {
        let mut job = job();
        let t = job.begin_analysis().unwrap();
        job.finish_analysis(t, Ok(items)).unwrap();
        job
    }

    #[test]
    fn successful_analysis_completes_with_draft() {
        let job = complete_job(vec![banana()]);
        assert_eq!(job.status(), JobStatus::Complete);
        assert_eq!(job.draft_items(), &[banana()]);
    }

    #[test]
    fn empty_analysis_is_an_error() {
        let mut job = job();
        let t = job.begin_analysis().unwrap();
        let err = job.finish_analysis(t, Ok(vec![])).unwrap_err();
        assert!(matches!(err, AnalysisError::NoItems));
        assert_eq!(job.status(), JobStatus::Error);
        assert_eq!(job.view().last_error.as_deref(), Some("No food items detected"));
    }

    #[test]
    fn retry_only_from_error() {
        let mut job = complete_job(vec![banana()]);
        assert!(matches!(job.retry(), Err(AnalysisError::InvalidState("complete"))));

        let mut job = self::job();
        let t = job.begin_analysis().unwrap();
        job.finish_analysis(t, Err(AnalysisError::Timeout)).unwrap_err();
        let t = job.retry().unwrap();
        assert_eq!(job.status(), JobStatus::Analyzing);
        job.finish_analysis(t, Ok(vec![banana()])).unwrap();
        assert_eq!(job.status(), JobStatus::Complete);
    }

    #[test]
    fn cancelled_result_is_discarded() {
        let mut job = job();
        let t = job.begin_analysis().unwrap();
        job.cancel();
        let status = job.status();

        let err = job.finish_analysis(t, Ok(vec![banana()])).unwrap_err();
        assert!(matches!(err, AnalysisError::Stale));
        assert_eq!(job.status(), status);
        assert!(job.draft_items().is_empty());
    }

    #[test]
    fn second_call_while_busy_is_rejected() {
        let mut job = complete_job(vec![banana()]);
        let _t = job.begin_correction().unwrap();
        assert!(matches!(job.begin_correction(), Err(AnalysisError::Busy)));
        assert!(matches!(job.add_item(None), Err(AnalysisError::Busy)));
    }

    #[test]
    fn correction_replaces_whole_draft_or_nothing() {
        let mut job = complete_job(vec![banana()]);
        let apple = FoodItem::new("Apple", "1 medium", Macros::new(95.0, 0.5, 25.0, 0.3));

        let t = job.begin_correction().unwrap();
        assert!(job.finish_correction(t, Ok(vec![])).is_err());
        assert_eq!(job.draft_items(), &[banana()]);
        assert_eq!(job.status(), JobStatus::Complete);

        let t = job.begin_correction().unwrap();
        assert!(job
            .finish_correction(t, Err(AnalysisError::Analyzer("boom".into())))
            .is_err());
        assert_eq!(job.draft_items(), &[banana()]);

        let t = job.begin_correction().unwrap();
        job.finish_correction(t, Ok(vec![apple.clone(), banana()])).unwrap();
        assert_eq!(job.draft_items(), &[apple, banana()]);
    }

    #[test]
    fn result_with_a_nameless_item_is_rejected_whole() {
        let mut job = complete_job(vec![banana()]);
        let t = job.begin_correction().unwrap();
        let err = job
            .finish_correction(t, Ok(vec![banana(), FoodItem::blank(), banana()]))
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Analyzer(_)));
        assert_eq!(job.draft_items(), &[banana()]);
        assert_eq!(job.status(), JobStatus::Complete);

        let mut fresh = job_with_blank_analysis();
        assert_eq!(fresh.status(), JobStatus::Error);
        assert!(fresh.retry().is_ok());
    }

    fn job_with_blank_analysis() -> AnalysisJob {
        let mut job = job();
        let t = job.begin_analysis().unwrap();
        assert!(job.finish_analysis(t, Ok(vec![FoodItem::blank()])).is_err());
        job
    }

    #[test]
    fn cancelled_correction_keeps_complete_draft() {
        let mut job = complete_job(vec![banana()]);
        let t = job.begin_correction().unwrap();
        job.cancel();
        assert_eq!(job.status(), JobStatus::Complete);
        assert!(job.finish_correction(t, Ok(vec![FoodItem::blank()])).is_err());
        assert_eq!(job.draft_items(), &[banana()]);
    }

    #[test]
    fn serving_quantity_edit_rescales_that_item_only() {
        let pasta = FoodItem::new("Pasta", "100g", Macros::new(300.0, 11.0, 60.0, 1.5));
        let mut job = complete_job(vec![pasta, banana()]);

        let patch = ItemPatch {
            serving_size: Some("200g".into()),
            ..Default::default()
        };
        let edited = job.edit_item(0, patch).unwrap();
        assert_eq!(edited.macros.calories, 600.0);
        assert_eq!(job.draft_items()[1], banana());

        let log = job.to_meal_log(MealType::Dinner, None).unwrap();
        assert!(log.totals_consistent());
        assert_eq!(log.total_macros.calories, 689.0);
    }

    #[test]
    fn edits_require_a_valid_index() {
        let mut job = complete_job(vec![banana()]);
        assert!(matches!(
            job.edit_item(3, ItemPatch::default()),
            Err(AnalysisError::InvalidIndex(3))
        ));
        assert!(matches!(job.remove_item(1), Err(AnalysisError::InvalidIndex(1))));
    }

    #[test]
    fn add_and_remove_items() {
        let mut job = complete_job(vec![banana()]);
        assert_eq!(job.add_item(None).unwrap(), 1);
        assert_eq!(job.draft_items()[1].name, "New item");
        assert_eq!(job.remove_item(0).unwrap(), banana());
        assert_eq!(job.draft_items().len(), 1);
    }

    #[test]
    fn commit_needs_complete_job_with_items() {
        let mut job = job();
        assert!(matches!(
            job.to_meal_log(MealType::Lunch, None),
            Err(AnalysisError::InvalidState("analyzing"))
        ));

        let t = job.begin_analysis().unwrap();
        job.finish_analysis(t, Ok(vec![banana()])).unwrap();
        job.remove_item(0).unwrap();
        assert!(matches!(job.to_meal_log(MealType::Lunch, None), Err(AnalysisError::EmptyDraft)));
    }

    #[test]
    fn meal_log_reuses_job_identity() {
        let job = complete_job(vec![banana()]);
        let log = job.to_meal_log(MealType::Snack, Some("  ".into())).unwrap();
        assert_eq!(log.id, "job-1");
        assert_eq!(log.image_ref, "captures/job-1.jpg");
        assert_eq!(log.timestamp, 1_700_000_000_000);
        assert_eq!(log.total_macros, Macros::new(89.0, 1.1, 23.0, 0.3));
        assert!(log.note.is_none());
    }
}
