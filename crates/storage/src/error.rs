/// All errors that can be returned by a JobStore implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Optimistic concurrency control conflict — another transaction moved
    /// the job concurrently. The expected version was not found.
    #[error("concurrent conflict on job {job_id}: expected version {expected_version}")]
    ConcurrentConflict { job_id: String, expected_version: i64 },

    /// No job row with the given id.
    #[error("job not found: {job_id}")]
    JobNotFound { job_id: String },

    /// A job row with this id already exists.
    #[error("job already exists: {job_id}")]
    JobAlreadyExists { job_id: String },

    /// A backend-specific storage error (DB connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
