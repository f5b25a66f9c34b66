//! In-memory `JobStore` backend.
//!
//! Transactions buffer their writes and apply them to the shared state
//! only at commit, after re-validating every buffered write against the
//! state actually committed in the meantime. Aborting (or dropping) a
//! transaction discards the buffer, so uncommitted writes are never
//! visible to other readers.
//!
//! There is no real row lock here; per-job serialization comes from the
//! engine's keyed mutex, with the OCC version check as the backstop.
//! Used by the engine's tests and by in-process hosts that do not need
//! durability.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{AuditRecord, JobRecord, ResponseRecord, StageMetricRecord, TaskRecord};
use crate::traits::JobStore;

/// Shared in-memory store. Cloning is cheap and clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Clone, Default)]
struct Inner {
    jobs: BTreeMap<String, JobRecord>,
    /// Keyed by (job_id, question_id) — the at-most-one-current-response
    /// invariant is structural here.
    responses: BTreeMap<(String, String), ResponseRecord>,
    audit: Vec<AuditRecord>,
    metrics: Vec<StageMetricRecord>,
    tasks: Vec<TaskRecord>,
}

/// A buffered-write transaction over [`MemoryStore`].
pub struct MemoryTxn {
    writes: Vec<Write>,
}

enum Write {
    CreateJob(JobRecord),
    UpdateJob {
        job_id: String,
        expected_version: i64,
        stage_id: String,
        status: String,
        entered_at: String,
    },
    UpsertResponse(ResponseRecord),
    Audit(AuditRecord),
    Metric(StageMetricRecord),
    Task(TaskRecord),
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a writer panicked mid-operation; the
        // buffered-write design keeps the committed state consistent, so
        // recover the guard rather than wedging every caller.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Committed job row with the transaction's buffered writes applied.
    fn effective_job(&self, writes: &[Write], job_id: &str) -> Option<JobRecord> {
        let committed = self.lock().jobs.get(job_id).cloned();
        apply_job_writes(committed, writes, job_id)
    }

    /// Committed response row with the transaction's buffered upserts
    /// applied (last write wins).
    fn effective_response(
        &self,
        writes: &[Write],
        job_id: &str,
        question_id: &str,
    ) -> Option<ResponseRecord> {
        let mut current = self
            .lock()
            .responses
            .get(&(job_id.to_string(), question_id.to_string()))
            .cloned();
        for write in writes {
            if let Write::UpsertResponse(r) = write {
                if r.job_id == job_id && r.question_id == question_id {
                    current = Some(r.clone());
                }
            }
        }
        current
    }
}

fn apply_job_writes(
    committed: Option<JobRecord>,
    writes: &[Write],
    job_id: &str,
) -> Option<JobRecord> {
    let mut current = committed;
    for write in writes {
        match write {
            Write::CreateJob(job) if job.job_id == job_id => {
                current = Some(job.clone());
            }
            Write::UpdateJob {
                job_id: id,
                stage_id,
                status,
                entered_at,
                ..
            } if id == job_id => {
                if let Some(job) = current.as_mut() {
                    job.current_stage_id = stage_id.clone();
                    job.status = status.clone();
                    job.stage_entered_at = entered_at.clone();
                    job.version += 1;
                }
            }
            _ => {}
        }
    }
    current
}

/// Merge an incoming response over an existing row: the original author
/// and creation time survive, everything else is last-write-wins.
fn merge_response(
    existing: Option<&ResponseRecord>,
    incoming: ResponseRecord,
) -> (ResponseRecord, bool) {
    match existing {
        Some(prev) => {
            let mut merged = incoming;
            merged.created_by = prev.created_by.clone();
            merged.created_at = prev.created_at.clone();
            (merged, false)
        }
        None => (incoming, true),
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    type Txn = MemoryTxn;

    async fn begin(&self) -> Result<MemoryTxn, StorageError> {
        Ok(MemoryTxn { writes: Vec::new() })
    }

    async fn commit(&self, txn: MemoryTxn) -> Result<(), StorageError> {
        let mut inner = self.lock();

        // Replay the buffer against a staged copy so a mid-commit
        // validation failure leaves the committed state untouched.
        let mut staged = inner.clone();
        for write in &txn.writes {
            match write {
                Write::CreateJob(job) => {
                    if staged.jobs.contains_key(&job.job_id) {
                        return Err(StorageError::JobAlreadyExists {
                            job_id: job.job_id.clone(),
                        });
                    }
                    staged.jobs.insert(job.job_id.clone(), job.clone());
                }
                Write::UpdateJob {
                    job_id,
                    expected_version,
                    stage_id,
                    status,
                    entered_at,
                } => {
                    let job = staged.jobs.get_mut(job_id).ok_or_else(|| {
                        StorageError::JobNotFound {
                            job_id: job_id.clone(),
                        }
                    })?;
                    if job.version != *expected_version {
                        return Err(StorageError::ConcurrentConflict {
                            job_id: job_id.clone(),
                            expected_version: *expected_version,
                        });
                    }
                    job.current_stage_id = stage_id.clone();
                    job.status = status.clone();
                    job.stage_entered_at = entered_at.clone();
                    job.version += 1;
                }
                Write::UpsertResponse(record) => {
                    let key = (record.job_id.clone(), record.question_id.clone());
                    let (merged, _) = merge_response(staged.responses.get(&key), record.clone());
                    staged.responses.insert(key, merged);
                }
                Write::Audit(entry) => staged.audit.push(entry.clone()),
                Write::Metric(metric) => staged.metrics.push(metric.clone()),
                Write::Task(task) => staged.tasks.push(task.clone()),
            }
        }

        *inner = staged;
        Ok(())
    }

    async fn abort(&self, txn: MemoryTxn) -> Result<(), StorageError> {
        drop(txn);
        Ok(())
    }

    async fn create_job(
        &self,
        txn: &mut MemoryTxn,
        job: JobRecord,
    ) -> Result<(), StorageError> {
        if self.effective_job(&txn.writes, &job.job_id).is_some() {
            return Err(StorageError::JobAlreadyExists {
                job_id: job.job_id.clone(),
            });
        }
        txn.writes.push(Write::CreateJob(job));
        Ok(())
    }

    async fn get_job_for_update(
        &self,
        txn: &mut MemoryTxn,
        job_id: &str,
    ) -> Result<JobRecord, StorageError> {
        self.effective_job(&txn.writes, job_id)
            .ok_or_else(|| StorageError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    async fn update_job_stage(
        &self,
        txn: &mut MemoryTxn,
        job_id: &str,
        expected_version: i64,
        stage_id: &str,
        status: &str,
        entered_at: &str,
    ) -> Result<i64, StorageError> {
        let job = self.effective_job(&txn.writes, job_id).ok_or_else(|| {
            StorageError::JobNotFound {
                job_id: job_id.to_string(),
            }
        })?;
        if job.version != expected_version {
            return Err(StorageError::ConcurrentConflict {
                job_id: job_id.to_string(),
                expected_version,
            });
        }
        txn.writes.push(Write::UpdateJob {
            job_id: job_id.to_string(),
            expected_version,
            stage_id: stage_id.to_string(),
            status: status.to_string(),
            entered_at: entered_at.to_string(),
        });
        Ok(expected_version + 1)
    }

    async fn upsert_response(
        &self,
        txn: &mut MemoryTxn,
        response: ResponseRecord,
    ) -> Result<(ResponseRecord, bool), StorageError> {
        let existing =
            self.effective_response(&txn.writes, &response.job_id, &response.question_id);
        let (merged, created) = merge_response(existing.as_ref(), response);
        txn.writes.push(Write::UpsertResponse(merged.clone()));
        Ok((merged, created))
    }

    async fn insert_audit(
        &self,
        txn: &mut MemoryTxn,
        entry: AuditRecord,
    ) -> Result<(), StorageError> {
        txn.writes.push(Write::Audit(entry));
        Ok(())
    }

    async fn insert_metric(
        &self,
        txn: &mut MemoryTxn,
        metric: StageMetricRecord,
    ) -> Result<(), StorageError> {
        txn.writes.push(Write::Metric(metric));
        Ok(())
    }

    async fn insert_task(
        &self,
        txn: &mut MemoryTxn,
        task: TaskRecord,
    ) -> Result<(), StorageError> {
        txn.writes.push(Write::Task(task));
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<JobRecord, StorageError> {
        self.lock()
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| StorageError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    async fn get_response(
        &self,
        job_id: &str,
        question_id: &str,
    ) -> Result<Option<ResponseRecord>, StorageError> {
        Ok(self
            .lock()
            .responses
            .get(&(job_id.to_string(), question_id.to_string()))
            .cloned())
    }

    async fn list_responses(&self, job_id: &str) -> Result<Vec<ResponseRecord>, StorageError> {
        Ok(self
            .lock()
            .responses
            .values()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn list_audit(&self, job_id: &str) -> Result<Vec<AuditRecord>, StorageError> {
        Ok(self
            .lock()
            .audit
            .iter()
            .filter(|a| a.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn list_metrics(&self, job_id: &str) -> Result<Vec<StageMetricRecord>, StorageError> {
        Ok(self
            .lock()
            .metrics
            .iter()
            .filter(|m| m.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn list_tasks(&self, job_id: &str) -> Result<Vec<TaskRecord>, StorageError> {
        Ok(self
            .lock()
            .tasks
            .iter()
            .filter(|t| t.job_id == job_id)
            .cloned()
            .collect())
    }
}
