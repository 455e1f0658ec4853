//! Bulk action accounting
//!
//! Tracks where every resource of a bulk operation stands: succeeded, still
//! in flight as a sub-job, or skipped/failed under a categorized reason. The
//! whole structure is persisted as JSON into the bulk job's status message
//! after every element, which is what lets an interrupted run resume.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Longest detail message kept, in characters
pub const MAX_MESSAGE_CHARS: usize = 512;

/// Detail records kept per reason; further resources are listed by id only
pub const MAX_DETAILS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasonKind {
    Skipped,
    Failed,
}

/// One resource recorded under a reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasonDetail {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Number of attempts that ended skipped or failed for this resource
    pub count: usize,
}

/// Resources skipped or failed for the same reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReason {
    pub kind: ReasonKind,
    pub category: String,
    /// Number of resources recorded under this reason
    pub count: usize,
    /// At most `MAX_DETAILS` records
    pub data: Vec<ReasonDetail>,
    /// Resources recorded once `data` was full
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub omitted: BTreeSet<String>,
}

impl ErrorReason {
    fn matches(&self, kind: ReasonKind, category: &str) -> bool {
        self.kind == kind && self.category == category
    }

    pub fn contains(&self, id: &str) -> bool {
        self.omitted.contains(id) || self.data.iter().any(|detail| detail.id == id)
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty() && self.omitted.is_empty()
    }

    fn recount(&mut self) {
        self.count = self.data.len() + self.omitted.len();
    }

    /// Takes `id` out of the reason, returning its known occurrences
    fn remove(&mut self, id: &str) -> usize {
        let removed = match self.data.iter().position(|detail| detail.id == id) {
            Some(index) => self.data.remove(index).count,
            None => usize::from(self.omitted.remove(id)),
        };
        self.recount();
        removed
    }
}

/// State of a bulk operation
///
/// A resource id is in at most one of: `success`, `queued`, `running` or a
/// single error reason.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Snapshot", into = "Snapshot")]
pub struct BulkActionResult {
    total_actions: usize,
    success: BTreeSet<String>,
    queued: BTreeSet<String>,
    running: BTreeSet<String>,
    error_reasons: Vec<ErrorReason>,
}

impl BulkActionResult {
    pub fn new(total_actions: usize) -> Self {
        Self {
            total_actions,
            ..Self::default()
        }
    }

    pub fn total_actions(&self) -> usize {
        self.total_actions
    }

    /// Raises the total, never lowering it
    pub fn extend_total(&mut self, total_actions: usize) {
        self.total_actions = self.total_actions.max(total_actions);
    }

    pub fn success(&self) -> &BTreeSet<String> {
        &self.success
    }

    pub fn queued(&self) -> &BTreeSet<String> {
        &self.queued
    }

    pub fn running(&self) -> &BTreeSet<String> {
        &self.running
    }

    /// Reasons sorted by descending count
    pub fn error_reasons(&self) -> &[ErrorReason] {
        &self.error_reasons
    }

    pub fn reason(&self, kind: ReasonKind, category: &str) -> Option<&ErrorReason> {
        self.error_reasons
            .iter()
            .find(|reason| reason.matches(kind, category))
    }

    pub fn success_count(&self) -> usize {
        self.success.len()
    }

    pub fn failed_count(&self) -> usize {
        self.count_of(ReasonKind::Failed)
    }

    pub fn skipped_count(&self) -> usize {
        self.count_of(ReasonKind::Skipped)
    }

    fn count_of(&self, kind: ReasonKind) -> usize {
        self.error_reasons
            .iter()
            .filter(|reason| reason.kind == kind)
            .map(|reason| reason.count)
            .sum()
    }

    pub fn in_flight_count(&self) -> usize {
        self.queued.len() + self.running.len()
    }

    /// Resources with a final outcome
    pub fn completed_count(&self) -> usize {
        self.success_count() + self.failed_count() + self.skipped_count()
    }

    /// Resources with any recorded outcome, in flight included
    pub fn recorded_count(&self) -> usize {
        self.completed_count() + self.in_flight_count()
    }

    pub fn is_recorded(&self, id: &str) -> bool {
        self.success.contains(id)
            || self.is_in_flight(id)
            || self.error_reasons.iter().any(|reason| reason.contains(id))
    }

    pub fn is_in_flight(&self, id: &str) -> bool {
        self.queued.contains(id) || self.running.contains(id)
    }

    /// In-flight resource ids
    pub fn in_flight(&self) -> impl Iterator<Item = &String> {
        self.queued.iter().chain(self.running.iter())
    }

    /// Completed share of the total, 100 when there is nothing to do
    pub fn progress(&self) -> u8 {
        if self.total_actions == 0 {
            return 100;
        }

        (self.completed_count() * 100 / self.total_actions).min(100) as u8
    }

    pub fn add_success(&mut self, id: &str) {
        self.remove_elsewhere(id, None);
        self.success.insert(id.to_string());
    }

    pub fn add_queued(&mut self, id: &str) {
        self.remove_elsewhere(id, None);
        self.queued.insert(id.to_string());
    }

    pub fn set_running(&mut self, id: &str) {
        self.remove_elsewhere(id, None);
        self.running.insert(id.to_string());
    }

    pub fn add_skipped(&mut self, category: &str, id: &str, name: Option<String>) {
        self.add_reason(ReasonKind::Skipped, category, id, name, None);
    }

    pub fn add_failed(&mut self, category: &str, id: &str, name: Option<String>, message: &str) {
        self.add_reason(
            ReasonKind::Failed,
            category,
            id,
            name,
            Some(truncate(message)),
        );
    }

    fn add_reason(
        &mut self,
        kind: ReasonKind,
        category: &str,
        id: &str,
        name: Option<String>,
        message: Option<String>,
    ) {
        let previous = self.remove_elsewhere(id, Some((kind, category)));

        let index = match self
            .error_reasons
            .iter()
            .position(|reason| reason.matches(kind, category))
        {
            Some(index) => index,
            None => {
                self.error_reasons.push(ErrorReason {
                    kind,
                    category: category.to_string(),
                    count: 0,
                    data: Vec::new(),
                    omitted: BTreeSet::new(),
                });
                self.error_reasons.len() - 1
            }
        };

        let reason = &mut self.error_reasons[index];
        match reason.data.iter().position(|detail| detail.id == id) {
            Some(index) => {
                let detail = &mut reason.data[index];
                detail.count += 1;
                if name.is_some() {
                    detail.name = name;
                }
                detail.message = message;
            }
            None if reason.omitted.contains(id) => {}
            None if reason.data.len() < MAX_DETAILS => reason.data.push(ReasonDetail {
                id: id.to_string(),
                name,
                message,
                count: previous + 1,
            }),
            None => {
                reason.omitted.insert(id.to_string());
            }
        }
        reason.recount();

        self.sort_reasons();
    }

    /// Removes `id` from every bucket except the `keep` reason
    ///
    /// Returns the occurrence count it had under a removed reason.
    fn remove_elsewhere(&mut self, id: &str, keep: Option<(ReasonKind, &str)>) -> usize {
        self.success.remove(id);
        self.queued.remove(id);
        self.running.remove(id);

        let mut previous = 0;
        for reason in self.error_reasons.iter_mut() {
            if keep.is_some_and(|(kind, category)| reason.matches(kind, category)) {
                continue;
            }

            previous += reason.remove(id);
        }

        self.error_reasons.retain(|reason| !reason.is_empty());
        previous
    }

    fn sort_reasons(&mut self) {
        self.error_reasons.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.category.cmp(&b.category))
                .then_with(|| a.kind.cmp(&b.kind))
        });
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

fn truncate(message: &str) -> String {
    if message.chars().count() <= MAX_MESSAGE_CHARS {
        return message.to_string();
    }

    let mut truncated: String = message.chars().take(MAX_MESSAGE_CHARS - 3).collect();
    truncated.push_str("...");
    truncated
}

/// Persisted form, carrying the derived counts for readers of the job record
#[derive(Serialize, Deserialize)]
struct Snapshot {
    total_actions: usize,
    #[serde(default)]
    success: BTreeSet<String>,
    #[serde(default)]
    queued: BTreeSet<String>,
    #[serde(default)]
    running: BTreeSet<String>,
    #[serde(default)]
    error_reasons: Vec<ErrorReason>,
    #[serde(default)]
    success_count: usize,
    #[serde(default)]
    failed_count: usize,
    #[serde(default)]
    skipped_count: usize,
}

impl From<BulkActionResult> for Snapshot {
    fn from(result: BulkActionResult) -> Self {
        Self {
            success_count: result.success_count(),
            failed_count: result.failed_count(),
            skipped_count: result.skipped_count(),
            total_actions: result.total_actions,
            success: result.success,
            queued: result.queued,
            running: result.running,
            error_reasons: result.error_reasons,
        }
    }
}

impl From<Snapshot> for BulkActionResult {
    fn from(snapshot: Snapshot) -> Self {
        let mut result = Self {
            total_actions: snapshot.total_actions,
            success: snapshot.success,
            queued: snapshot.queued,
            running: snapshot.running,
            error_reasons: snapshot.error_reasons,
        };

        // counts are derived from the recorded ids, whatever was stored
        for reason in result.error_reasons.iter_mut() {
            reason.recount();
        }
        result.error_reasons.retain(|reason| !reason.is_empty());
        result.sort_reasons();
        result
    }
}
