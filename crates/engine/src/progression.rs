//! Stage progression orchestration.
//!
//! `Engine::submit_response` is the single entry point that composes the
//! whole pipeline: validate → record response → skip evaluation →
//! transition resolution → atomic transition (job update + stage metric +
//! audit row + generated tasks) → result.
//!
//! Key invariants upheld here:
//!
//! - Per-job serialization: a keyed mutex spans every step, so two
//!   submissions for the same job never interleave. Different jobs run in
//!   parallel.
//! - The response upsert commits in its own transaction before
//!   evaluation, so the answer survives any later failure and a retry
//!   re-evaluates cleanly.
//! - Steps five through eight share one transaction: if task generation
//!   fails, the job update, metric, and audit roll back with it.
//! - Ledger completeness: every call appends exactly one audit row --
//!   outcome `transition`, `skipped`, `no_transition`, or `failure`.

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use jobflow_core::{Catalog, Question, TransitionRule};
use jobflow_storage::{
    AuditRecord, JobRecord, JobStore, ResponseRecord, StageMetricRecord, StorageError, TaskRecord,
};

use crate::condition::{eval_condition, EvalContext};
use crate::error::ProgressionError;
use crate::locks::JobLocks;
use crate::resolve::resolve_transition;
use crate::tasks::tasks_for_stage;
use crate::value::{parse_value, ResponseValue};

/// What a submission did to the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressionAction {
    /// The question's skip condition held; the answer was recorded but
    /// excluded from transition evaluation.
    Skipped,
    /// No transition rule matched the answer.
    NoTransition,
    /// The job moved to a new stage.
    StageTransition,
}

impl ProgressionAction {
    fn outcome(self) -> &'static str {
        match self {
            ProgressionAction::Skipped => "skipped",
            ProgressionAction::NoTransition => "no_transition",
            ProgressionAction::StageTransition => "transition",
        }
    }
}

/// Result of one `submit_response` call.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressionOutcome {
    pub action: ProgressionAction,
    pub stage_progressed: bool,
    pub job_id: String,
    /// Stage the job was in when the call started.
    pub current_stage_id: String,
    /// Destination stage on a transition.
    pub next_stage_id: Option<String>,
    pub tasks_created: u32,
    /// Time spent in the exited stage, fractional hours.
    pub duration_hours: Option<Decimal>,
    /// Id of the audit row this call appended.
    pub audit_id: String,
}

/// One answer submission.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub job_id: String,
    pub question_id: String,
    pub value: String,
    pub user_id: String,
    pub source: String,
    pub metadata: serde_json::Value,
}

impl SubmitRequest {
    pub fn new(
        job_id: impl Into<String>,
        question_id: impl Into<String>,
        value: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        SubmitRequest {
            job_id: job_id.into(),
            question_id: question_id.into(),
            value: value.into(),
            user_id: user_id.into(),
            source: "web_app".to_string(),
            metadata: serde_json::json!({}),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Dashboard summary of one job's position in its lifecycle.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub job_id: String,
    pub stage_id: String,
    pub stage_name: String,
    pub status: String,
    pub stage_entered_at: String,
    pub elapsed_hours: Decimal,
    pub is_terminal: bool,
    /// The stage's max expected duration has been exceeded.
    pub overdue: bool,
    /// Required questions of the current stage with no response yet.
    pub unanswered_required: Vec<String>,
}

/// The stage-progression engine for one tenant's catalog.
pub struct Engine<S: JobStore> {
    store: Arc<S>,
    catalog: Arc<Catalog>,
    locks: JobLocks,
}

impl<S: JobStore> Engine<S> {
    pub fn new(store: Arc<S>, catalog: Arc<Catalog>) -> Self {
        Engine {
            store,
            catalog,
            locks: JobLocks::new(),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Initialize a job at the catalog's initial stage and append the
    /// creation row to its ledger. A duplicate id maps to `Conflict`.
    pub async fn create_job(
        &self,
        job_id: Option<String>,
        name: &str,
        user_id: &str,
    ) -> Result<JobRecord, ProgressionError> {
        if name.trim().is_empty() {
            return Err(ProgressionError::InvalidArgument { field: "name" });
        }
        if user_id.trim().is_empty() {
            return Err(ProgressionError::InvalidArgument { field: "user_id" });
        }
        let job_id = job_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let initial = self
            .catalog
            .initial_stage()
            .ok_or_else(|| failed(&job_id, "catalog declares no stages"))?;
        let now = fmt_rfc3339(OffsetDateTime::now_utc()).map_err(|c| failed(&job_id, c))?;

        let job = JobRecord {
            job_id: job_id.clone(),
            tenant_id: self.catalog.tenant_id.clone(),
            name: name.trim().to_string(),
            current_stage_id: initial.id.clone(),
            status: initial.status.clone(),
            stage_entered_at: now.clone(),
            version: 0,
            created_by: Some(user_id.to_string()),
            created_at: now.clone(),
        };

        let mut txn = self
            .store
            .begin()
            .await
            .map_err(|e| storage_failure(&job_id, e))?;
        let result = async {
            self.store.create_job(&mut txn, job.clone()).await?;
            self.store
                .insert_audit(
                    &mut txn,
                    AuditRecord {
                        id: Uuid::new_v4().to_string(),
                        job_id: job_id.clone(),
                        from_stage_id: initial.id.clone(),
                        to_stage_id: initial.id.clone(),
                        from_status: initial.status.clone(),
                        to_status: initial.status.clone(),
                        trigger_source: "job_created".to_string(),
                        triggered_by: user_id.to_string(),
                        question_id: None,
                        response_value: None,
                        duration_hours: None,
                        outcome: "created".to_string(),
                        error_detail: None,
                        created_at: now.clone(),
                    },
                )
                .await
        }
        .await;

        match result {
            Ok(()) => {
                self.store
                    .commit(txn)
                    .await
                    .map_err(|e| create_failure(&job_id, e))?;
                info!(job_id = %job.job_id, stage = %initial.id, "job created");
                Ok(job)
            }
            Err(e) => {
                let _ = self.store.abort(txn).await;
                Err(create_failure(&job_id, e))
            }
        }
    }

    /// Record an answer and run it through skip evaluation and transition
    /// resolution, atomically applying any resulting stage change.
    ///
    /// Validation order is fixed: arguments present, job exists, question
    /// exists, value parses. Anything failing after the response commit
    /// triggers a best-effort failure audit row before the error is
    /// returned.
    pub async fn submit_response(
        &self,
        req: SubmitRequest,
    ) -> Result<ProgressionOutcome, ProgressionError> {
        for (field, value) in [
            ("job_id", &req.job_id),
            ("question_id", &req.question_id),
            ("value", &req.value),
            ("user_id", &req.user_id),
        ] {
            if value.trim().is_empty() {
                return Err(ProgressionError::InvalidArgument { field });
            }
        }

        // Serialize all steps for this job; other jobs proceed freely.
        let _guard = self.locks.acquire(&req.job_id).await;

        let job = self.store.get_job(&req.job_id).await.map_err(|e| match e {
            StorageError::JobNotFound { job_id } => ProgressionError::NotFound {
                kind: "job",
                id: job_id,
            },
            other => storage_failure(&req.job_id, other),
        })?;

        let question = self.catalog.question(&req.question_id).ok_or_else(|| {
            ProgressionError::NotFound {
                kind: "question",
                id: req.question_id.clone(),
            }
        })?;

        let value =
            parse_value(question, &req.value).map_err(|e| ProgressionError::Validation {
                question_id: req.question_id.clone(),
                source: e,
            })?;

        // Step 1: record the response in its own transaction so the
        // answer survives any failure in the steps that follow.
        self.record_response(&req).await?;
        debug!(
            job_id = %req.job_id,
            question_id = %req.question_id,
            source = %req.source,
            "response recorded"
        );

        match self.progress(&job, question, &value, &req).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.write_failure_audit(&job, &req, &err).await;
                Err(err)
            }
        }
    }

    /// Dashboard summary for one job.
    pub async fn status(&self, job_id: &str) -> Result<JobStatus, ProgressionError> {
        let job = self.store.get_job(job_id).await.map_err(|e| match e {
            StorageError::JobNotFound { job_id } => ProgressionError::NotFound {
                kind: "job",
                id: job_id,
            },
            other => storage_failure(job_id, other),
        })?;
        let stage = self
            .catalog
            .stage(&job.current_stage_id)
            .ok_or_else(|| failed(job_id, "job references a stage missing from the catalog"))?;

        let entered = parse_rfc3339(&job.stage_entered_at).map_err(|c| failed(job_id, c))?;
        let elapsed_hours = hours_between(entered, OffsetDateTime::now_utc());

        let responses = self
            .store
            .list_responses(job_id)
            .await
            .map_err(|e| storage_failure(job_id, e))?;
        let answered: Vec<&str> = responses.iter().map(|r| r.question_id.as_str()).collect();
        let unanswered_required = self
            .catalog
            .questions_for(&stage.id)
            .into_iter()
            .filter(|q| q.required && !answered.contains(&q.id.as_str()))
            .map(|q| q.id.clone())
            .collect();

        Ok(JobStatus {
            job_id: job.job_id,
            stage_id: stage.id.clone(),
            stage_name: stage.name.clone(),
            status: job.status,
            stage_entered_at: job.stage_entered_at,
            elapsed_hours,
            is_terminal: self
                .catalog
                .terminal_stage()
                .map(|t| t.id == stage.id)
                .unwrap_or(false),
            overdue: stage
                .max_hours
                .map(|max| elapsed_hours > max)
                .unwrap_or(false),
            unanswered_required,
        })
    }

    async fn record_response(&self, req: &SubmitRequest) -> Result<(), ProgressionError> {
        let now = fmt_rfc3339(OffsetDateTime::now_utc()).map_err(|c| failed(&req.job_id, c))?;
        let record = ResponseRecord {
            job_id: req.job_id.clone(),
            question_id: req.question_id.clone(),
            value: req.value.clone(),
            metadata: req.metadata.clone(),
            source: req.source.clone(),
            created_by: req.user_id.clone(),
            updated_by: req.user_id.clone(),
            created_at: now.clone(),
            updated_at: now,
        };

        let mut txn = self
            .store
            .begin()
            .await
            .map_err(|e| storage_failure(&req.job_id, e))?;
        match self.store.upsert_response(&mut txn, record).await {
            Ok(_) => self
                .store
                .commit(txn)
                .await
                .map_err(|e| storage_failure(&req.job_id, e)),
            Err(e) => {
                let _ = self.store.abort(txn).await;
                Err(storage_failure(&req.job_id, e))
            }
        }
    }

    /// Steps two through nine: skip, resolve, and the atomic transition.
    async fn progress(
        &self,
        job: &JobRecord,
        question: &Question,
        value: &ResponseValue,
        req: &SubmitRequest,
    ) -> Result<ProgressionOutcome, ProgressionError> {
        let responses = self
            .store
            .list_responses(&job.job_id)
            .await
            .map_err(|e| storage_failure(&job.job_id, e))?;
        let by_question: BTreeMap<String, ResponseRecord> = responses
            .into_iter()
            .map(|r| (r.question_id.clone(), r))
            .collect();
        let ctx = EvalContext {
            catalog: self.catalog.as_ref(),
            responses: &by_question,
        };

        // Step 2: skip evaluation.
        if let Some(cond) = &question.skip_when {
            let skip = eval_condition(cond, question, value, &ctx)
                .map_err(|e| failed(&job.job_id, e.to_string()))?;
            if skip {
                debug!(job_id = %job.job_id, question_id = %question.id, "question skipped");
                return self
                    .record_non_transition(job, req, ProgressionAction::Skipped)
                    .await;
            }
        }

        // Step 3: transition resolution.
        let rule =
            resolve_transition(&self.catalog, &job.current_stage_id, question, value, &ctx)
                .map_err(|e| failed(&job.job_id, e.to_string()))?;
        let Some(rule) = rule else {
            debug!(
                job_id = %job.job_id,
                stage = %job.current_stage_id,
                question_id = %question.id,
                "no transition rule matched"
            );
            return self
                .record_non_transition(job, req, ProgressionAction::NoTransition)
                .await;
        };

        // Step 4: time spent in the stage being exited.
        let now = OffsetDateTime::now_utc();
        let entered = parse_rfc3339(&job.stage_entered_at).map_err(|c| failed(&job.job_id, c))?;
        let duration_hours = hours_between(entered, now);
        let now_str = fmt_rfc3339(now).map_err(|c| failed(&job.job_id, c))?;

        let to_stage = self.catalog.stage(&rule.to_stage_id).ok_or_else(|| {
            failed(
                &job.job_id,
                format!("destination stage '{}' missing from catalog", rule.to_stage_id),
            )
        })?;

        // Steps 5–8 in one transaction: job update, metric, audit, tasks.
        let audit_id = Uuid::new_v4().to_string();
        let mut txn = self
            .store
            .begin()
            .await
            .map_err(|e| storage_failure(&job.job_id, e))?;
        let result = self
            .write_transition(
                &mut txn,
                job,
                rule,
                &to_stage.status,
                req,
                &now_str,
                duration_hours,
                &audit_id,
            )
            .await;

        let tasks_created = match result {
            Ok(count) => count,
            Err(e) => {
                let _ = self.store.abort(txn).await;
                return Err(e);
            }
        };
        self.store
            .commit(txn)
            .await
            .map_err(|e| storage_failure(&job.job_id, e))?;

        info!(
            job_id = %job.job_id,
            from = %job.current_stage_id,
            to = %rule.to_stage_id,
            rule = %rule.id,
            tasks_created,
            "stage transition"
        );

        Ok(ProgressionOutcome {
            action: ProgressionAction::StageTransition,
            stage_progressed: true,
            job_id: job.job_id.clone(),
            current_stage_id: job.current_stage_id.clone(),
            next_stage_id: Some(rule.to_stage_id.clone()),
            tasks_created,
            duration_hours: Some(duration_hours),
            audit_id,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_transition(
        &self,
        txn: &mut S::Txn,
        job: &JobRecord,
        rule: &TransitionRule,
        to_status: &str,
        req: &SubmitRequest,
        now_str: &str,
        duration_hours: Decimal,
        audit_id: &str,
    ) -> Result<u32, ProgressionError> {
        self.store
            .update_job_stage(
                txn,
                &job.job_id,
                job.version,
                &rule.to_stage_id,
                to_status,
                now_str,
            )
            .await
            .map_err(|e| storage_failure(&job.job_id, e))?;

        self.store
            .insert_metric(
                txn,
                StageMetricRecord {
                    id: Uuid::new_v4().to_string(),
                    job_id: job.job_id.clone(),
                    stage_id: job.current_stage_id.clone(),
                    entered_at: job.stage_entered_at.clone(),
                    exited_at: now_str.to_string(),
                    duration_hours,
                },
            )
            .await
            .map_err(|e| storage_failure(&job.job_id, e))?;

        self.store
            .insert_audit(
                txn,
                AuditRecord {
                    id: audit_id.to_string(),
                    job_id: job.job_id.clone(),
                    from_stage_id: job.current_stage_id.clone(),
                    to_stage_id: rule.to_stage_id.clone(),
                    from_status: job.status.clone(),
                    to_status: to_status.to_string(),
                    trigger_source: "question_response".to_string(),
                    triggered_by: req.user_id.clone(),
                    question_id: Some(req.question_id.clone()),
                    response_value: Some(req.value.clone()),
                    duration_hours: Some(duration_hours),
                    outcome: ProgressionAction::StageTransition.outcome().to_string(),
                    error_detail: None,
                    created_at: now_str.to_string(),
                },
            )
            .await
            .map_err(|e| storage_failure(&job.job_id, e))?;

        let tasks: Vec<TaskRecord> = tasks_for_stage(
            &self.catalog,
            &job.job_id,
            &rule.to_stage_id,
            &req.user_id,
            now_str,
        );
        let count = tasks.len() as u32;
        for task in tasks {
            self.store
                .insert_task(txn, task)
                .await
                .map_err(|e| storage_failure(&job.job_id, e))?;
        }
        Ok(count)
    }

    /// Append the ledger row for an attempt that left the job in place.
    async fn record_non_transition(
        &self,
        job: &JobRecord,
        req: &SubmitRequest,
        action: ProgressionAction,
    ) -> Result<ProgressionOutcome, ProgressionError> {
        let now = fmt_rfc3339(OffsetDateTime::now_utc()).map_err(|c| failed(&job.job_id, c))?;
        let audit_id = Uuid::new_v4().to_string();

        let mut txn = self
            .store
            .begin()
            .await
            .map_err(|e| storage_failure(&job.job_id, e))?;
        let result = self
            .store
            .insert_audit(
                &mut txn,
                AuditRecord {
                    id: audit_id.clone(),
                    job_id: job.job_id.clone(),
                    from_stage_id: job.current_stage_id.clone(),
                    to_stage_id: job.current_stage_id.clone(),
                    from_status: job.status.clone(),
                    to_status: job.status.clone(),
                    trigger_source: "question_response".to_string(),
                    triggered_by: req.user_id.clone(),
                    question_id: Some(req.question_id.clone()),
                    response_value: Some(req.value.clone()),
                    duration_hours: None,
                    outcome: action.outcome().to_string(),
                    error_detail: None,
                    created_at: now,
                },
            )
            .await;
        match result {
            Ok(()) => self
                .store
                .commit(txn)
                .await
                .map_err(|e| storage_failure(&job.job_id, e))?,
            Err(e) => {
                let _ = self.store.abort(txn).await;
                return Err(storage_failure(&job.job_id, e));
            }
        }

        Ok(ProgressionOutcome {
            action,
            stage_progressed: false,
            job_id: job.job_id.clone(),
            current_stage_id: job.current_stage_id.clone(),
            next_stage_id: None,
            tasks_created: 0,
            duration_hours: None,
            audit_id,
        })
    }

    /// Best-effort failure row. The ledger should show every attempt, but
    /// a failed audit write must never mask the error being returned.
    async fn write_failure_audit(
        &self,
        job: &JobRecord,
        req: &SubmitRequest,
        err: &ProgressionError,
    ) {
        let now = match fmt_rfc3339(OffsetDateTime::now_utc()) {
            Ok(now) => now,
            Err(cause) => {
                warn!(job_id = %job.job_id, %cause, "failure audit skipped");
                return;
            }
        };
        let entry = AuditRecord {
            id: Uuid::new_v4().to_string(),
            job_id: job.job_id.clone(),
            from_stage_id: job.current_stage_id.clone(),
            to_stage_id: job.current_stage_id.clone(),
            from_status: job.status.clone(),
            to_status: job.status.clone(),
            trigger_source: "question_response".to_string(),
            triggered_by: req.user_id.clone(),
            question_id: Some(req.question_id.clone()),
            response_value: Some(req.value.clone()),
            duration_hours: None,
            outcome: "failure".to_string(),
            error_detail: Some(err.to_string()),
            created_at: now,
        };

        let write = async {
            let mut txn = self.store.begin().await?;
            match self.store.insert_audit(&mut txn, entry).await {
                Ok(()) => self.store.commit(txn).await,
                Err(e) => {
                    let _ = self.store.abort(txn).await;
                    Err(e)
                }
            }
        };
        if let Err(audit_err) = write.await {
            warn!(
                job_id = %job.job_id,
                error = %audit_err,
                "failure audit write failed; propagating original error"
            );
        }
    }
}

// ── Timestamp helpers ────────────────────────────────────────────────────────

fn fmt_rfc3339(ts: OffsetDateTime) -> Result<String, String> {
    ts.format(&Rfc3339)
        .map_err(|e| format!("timestamp formatting failed: {e}"))
}

fn parse_rfc3339(raw: &str) -> Result<OffsetDateTime, String> {
    OffsetDateTime::parse(raw, &Rfc3339)
        .map_err(|e| format!("invalid stored timestamp '{raw}': {e}"))
}

/// Whole seconds between two instants, expressed as fractional hours
/// rounded to four decimal places.
fn hours_between(entered: OffsetDateTime, now: OffsetDateTime) -> Decimal {
    let seconds = (now - entered).whole_seconds().max(0);
    (Decimal::from(seconds) / Decimal::from(3600))
        .round_dp_with_strategy(4, RoundingStrategy::MidpointNearestEven)
}

fn failed(job_id: &str, cause: impl Into<String>) -> ProgressionError {
    ProgressionError::Failed {
        job_id: job_id.to_string(),
        cause: cause.into(),
    }
}

fn storage_failure(job_id: &str, err: StorageError) -> ProgressionError {
    match err {
        StorageError::ConcurrentConflict { job_id, .. } => ProgressionError::Conflict { job_id },
        other => failed(job_id, other.to_string()),
    }
}

/// Duplicate creation surfaces as a conflict; everything else wraps.
fn create_failure(job_id: &str, err: StorageError) -> ProgressionError {
    match err {
        StorageError::JobAlreadyExists { job_id } => ProgressionError::Conflict { job_id },
        other => storage_failure(job_id, other),
    }
}
