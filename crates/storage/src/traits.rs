use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{AuditRecord, JobRecord, ResponseRecord, StageMetricRecord, TaskRecord};

/// The storage trait for jobflow backends.
///
/// A `JobStore` implementation provides durable, transactional storage for
/// job rows, question responses, audit ledger entries, stage metrics, and
/// generated tasks. The engine requires only point lookups by id, an
/// atomic multi-row write, and per-job locking — not any particular
/// storage technology.
///
/// ## Transaction Semantics
///
/// All mutating operations take `&mut Self::Txn`, a type representing an
/// in-progress transaction. The lifecycle is:
///
/// 1. `begin()` — start a transaction, returns a `Txn`
/// 2. Call mutating methods with `&mut txn`
/// 3. `commit(txn)` — commit and consume the transaction
///    OR `abort(txn)` — roll back and consume the transaction
///
/// If a `Txn` is dropped without committing, the underlying transaction
/// MUST be rolled back (drop semantics on the underlying DB transaction).
///
/// ## OCC Conflict Detection
///
/// `update_job_stage` performs an optimistic concurrency check:
/// `UPDATE WHERE version = expected_version`. If zero rows are affected,
/// the method returns `Err(StorageError::ConcurrentConflict { ... })`.
/// Backends that buffer writes may detect the conflict at `commit` time
/// instead; callers must treat a conflict from either call identically.
///
/// ## Row Locking
///
/// `get_job_for_update` uses `SELECT ... FOR UPDATE` semantics where the
/// backend supports it, holding the row until commit or abort. In-process
/// backends without row locks rely on the engine's per-job mutex for
/// serialization; the OCC version check remains as the backstop.
///
/// ## Ledger Rules
///
/// Audit, metric, and task rows are append-only: backends must never
/// update or delete them, and `insert_audit` must preserve insertion
/// order in `list_audit`.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be shared across
/// async task boundaries in the host application.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// The transaction type used by this storage backend.
    ///
    /// Must be `Send` to allow passing across async task boundaries.
    type Txn: Send;

    // ── Transaction lifecycle ────────────────────────────────────────────

    /// Begin a new transaction.
    async fn begin(&self) -> Result<Self::Txn, StorageError>;

    /// Commit a transaction, making all buffered mutations durable.
    async fn commit(&self, txn: Self::Txn) -> Result<(), StorageError>;

    /// Abort (roll back) a transaction, discarding all mutations.
    async fn abort(&self, txn: Self::Txn) -> Result<(), StorageError>;

    // ── Job operations (within transaction) ──────────────────────────────

    /// Insert a new job row.
    ///
    /// Returns `Err(StorageError::JobAlreadyExists)` if a row with this
    /// job id exists.
    async fn create_job(&self, txn: &mut Self::Txn, job: JobRecord)
        -> Result<(), StorageError>;

    /// Read a job row for update, locking it where the backend supports
    /// row locks. Sees writes buffered earlier in the same transaction.
    ///
    /// Returns `Err(StorageError::JobNotFound)` if the job does not exist.
    async fn get_job_for_update(
        &self,
        txn: &mut Self::Txn,
        job_id: &str,
    ) -> Result<JobRecord, StorageError>;

    /// Apply a version-validated stage update to a job row (OCC).
    ///
    /// The update is conditional on `version = expected_version` and sets
    /// the current stage, the derived status, and `stage_entered_at` in
    /// one write. Returns the new version number on success.
    async fn update_job_stage(
        &self,
        txn: &mut Self::Txn,
        job_id: &str,
        expected_version: i64,
        stage_id: &str,
        status: &str,
        entered_at: &str,
    ) -> Result<i64, StorageError>;

    // ── Response operations (within transaction) ─────────────────────────

    /// Update-or-insert the response row for (job_id, question_id).
    ///
    /// If a row exists, its value/metadata/source/updated_* fields are
    /// replaced while `created_by`/`created_at` are preserved; otherwise
    /// the record is inserted as given. Returns the stored row and `true`
    /// when a new row was created.
    ///
    /// This is what makes repeated submissions idempotent at the storage
    /// layer: no duplicate-key failures, at most one current row per
    /// (job, question) pair.
    async fn upsert_response(
        &self,
        txn: &mut Self::Txn,
        response: ResponseRecord,
    ) -> Result<(ResponseRecord, bool), StorageError>;

    // ── Ledger inserts (within transaction) ──────────────────────────────

    /// Append an audit ledger row.
    async fn insert_audit(
        &self,
        txn: &mut Self::Txn,
        entry: AuditRecord,
    ) -> Result<(), StorageError>;

    /// Insert a stage metric row.
    ///
    /// Must be inserted in the SAME transaction as the `update_job_stage`
    /// call that exits the stage: no stage change without its metric.
    async fn insert_metric(
        &self,
        txn: &mut Self::Txn,
        metric: StageMetricRecord,
    ) -> Result<(), StorageError>;

    /// Insert a generated task row.
    ///
    /// Rides in the transition transaction so a failed task insert rolls
    /// the whole transition back.
    async fn insert_task(
        &self,
        txn: &mut Self::Txn,
        task: TaskRecord,
    ) -> Result<(), StorageError>;

    // ── Query operations (committed reads, outside transaction) ──────────

    /// Read a job row without locking.
    ///
    /// Returns `Err(StorageError::JobNotFound)` if the job does not exist.
    async fn get_job(&self, job_id: &str) -> Result<JobRecord, StorageError>;

    /// Read the current response for (job_id, question_id), if any.
    async fn get_response(
        &self,
        job_id: &str,
        question_id: &str,
    ) -> Result<Option<ResponseRecord>, StorageError>;

    /// All current responses for a job, ordered by question id.
    async fn list_responses(&self, job_id: &str) -> Result<Vec<ResponseRecord>, StorageError>;

    /// The job's audit ledger in insertion order.
    async fn list_audit(&self, job_id: &str) -> Result<Vec<AuditRecord>, StorageError>;

    /// Stage metrics for a job in insertion order.
    async fn list_metrics(&self, job_id: &str) -> Result<Vec<StageMetricRecord>, StorageError>;

    /// Generated tasks for a job in insertion order.
    async fn list_tasks(&self, job_id: &str) -> Result<Vec<TaskRecord>, StorageError>;
}
