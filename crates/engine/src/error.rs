use crate::value::ValueError;

/// Errors surfaced by the progression engine.
///
/// The host layer maps these onto transport statuses: `InvalidArgument`
/// and `Validation` → 400, `NotFound` → 404, `Conflict` → 409, `Failed`
/// → 500. The engine returns structured values, never formatted
/// user-facing strings.
#[derive(Debug, thiserror::Error)]
pub enum ProgressionError {
    /// A required argument was missing or empty.
    #[error("missing required argument: {field}")]
    InvalidArgument { field: &'static str },

    /// The referenced job or question does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The submitted value does not match the question's response type.
    /// Never retried automatically; surfaced verbatim to the caller.
    #[error("invalid response for question '{question_id}': {source}")]
    Validation {
        question_id: String,
        source: ValueError,
    },

    /// The atomic transition lost an optimistic-concurrency race.
    #[error("concurrent update conflict on job {job_id}")]
    Conflict { job_id: String },

    /// Progression failed after the response was recorded. A failure
    /// audit row has been written best-effort before this was raised.
    #[error("progression failed for job {job_id}: {cause}")]
    Failed { job_id: String, cause: String },
}

impl ProgressionError {
    /// Whether a single retry is safe. Response recording is idempotent,
    /// so retrying re-evaluates cleanly.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ProgressionError::Conflict { .. } | ProgressionError::Failed { .. }
        )
    }
}
