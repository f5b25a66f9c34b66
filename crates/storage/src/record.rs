use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A job row as stored in the backend.
///
/// `version` is the optimistic-concurrency counter: every stage update is
/// conditional on the expected version and increments it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub tenant_id: String,
    pub name: String,
    pub current_stage_id: String,
    /// User-visible status derived from the current stage.
    pub status: String,
    /// ISO 8601 / RFC 3339 timestamp string. Monotonically non-decreasing
    /// across the job's lifetime.
    pub stage_entered_at: String,
    pub version: i64,
    pub created_by: Option<String>,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub created_at: String,
}

/// The single current answer for one (job, question) pair.
///
/// A re-submission updates this row in place; `created_by`/`created_at`
/// keep the original author while `updated_by`/`updated_at` track the
/// latest write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub job_id: String,
    pub question_id: String,
    /// Stored as text, interpreted per the question's response type.
    pub value: String,
    /// Free-form metadata supplied by the caller.
    pub metadata: serde_json::Value,
    /// Submission channel, e.g. "web_app", "mobile".
    pub source: String,
    pub created_by: String,
    pub updated_by: String,
    /// ISO 8601 / RFC 3339 timestamp strings.
    pub created_at: String,
    pub updated_at: String,
}

/// One row of the append-only progression ledger.
///
/// Written for every progression attempt — success, skipped,
/// no-transition, and failure alike — and at job creation. Never updated
/// or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub job_id: String,
    /// from == to for attempts that did not move the job.
    pub from_stage_id: String,
    pub to_stage_id: String,
    pub from_status: String,
    pub to_status: String,
    /// What initiated the attempt, e.g. "question_response", "job_created".
    pub trigger_source: String,
    pub triggered_by: String,
    pub question_id: Option<String>,
    pub response_value: Option<String>,
    /// Time spent in the previous stage, fractional hours. None for
    /// attempts that did not transition.
    pub duration_hours: Option<Decimal>,
    /// "transition", "skipped", "no_transition", or "failure".
    pub outcome: String,
    pub error_detail: Option<String>,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub created_at: String,
}

/// Derived duration record for one stage occupancy by one job.
/// Created once when the stage is exited, immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageMetricRecord {
    pub id: String,
    pub job_id: String,
    pub stage_id: String,
    /// ISO 8601 / RFC 3339 timestamp strings.
    pub entered_at: String,
    pub exited_at: String,
    pub duration_hours: Decimal,
}

/// A work-item generated when a job enters a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub job_id: String,
    pub stage_id: String,
    pub title: String,
    pub description: Option<String>,
    pub sequence: u32,
    /// "open" at creation; later lifecycle is the host's concern.
    pub status: String,
    pub created_by: String,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub created_at: String,
}
