//! jobflow-engine: the stage-progression orchestrator.
//!
//! A job moves through its tenant's ordered stage catalog, driven by
//! answers to stage questions. Submitting an answer records it (idempotent
//! upsert), evaluates the question's skip condition, resolves a transition
//! rule, and -- when one fires -- atomically updates the job, writes the
//! exited stage's duration metric, appends the audit ledger row, and
//! generates the destination stage's tasks.
//!
//! The engine is storage-agnostic: it drives any
//! [`jobflow_storage::JobStore`] backend and serializes work per job with
//! a keyed mutex.
//!
//! # Public API
//!
//! - [`Engine`] -- construct with a store and a validated catalog
//! - [`Engine::submit_response`] -- the single progression entry point
//! - [`Engine::create_job`] / [`Engine::status`] -- lifecycle and
//!   dashboard support
//! - [`ProgressionOutcome`] / [`ProgressionError`] -- structured results
//!   the host maps onto its transport

pub mod condition;
pub mod error;
mod locks;
pub mod progression;
pub mod resolve;
pub mod tasks;
pub mod value;

pub use condition::{eval_condition, EvalContext, EvalError};
pub use error::ProgressionError;
pub use progression::{
    Engine, JobStatus, ProgressionAction, ProgressionOutcome, SubmitRequest,
};
pub use resolve::resolve_transition;
pub use tasks::tasks_for_stage;
pub use value::{parse_value, ResponseValue, ValueError};

// ──────────────────────────────────────────────
// Integration tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::sync::Arc;

    use rust_decimal::{Decimal, RoundingStrategy};
    use time::format_description::well_known::Rfc3339;
    use time::OffsetDateTime;

    use jobflow_core::Catalog;
    use jobflow_storage::{JobStore, MemoryStore};

    /// Construction-lifecycle catalog used by every scenario below.
    fn catalog() -> Catalog {
        Catalog::load(serde_json::json!({
            "tenant_id": "acme-builders",
            "stages": [
                {
                    "id": "lead_qualification",
                    "name": "Lead Qualification",
                    "sequence": 1,
                    "status": "lead",
                    "max_hours": "72"
                },
                {
                    "id": "initial_client_meeting",
                    "name": "Initial Client Meeting",
                    "sequence": 2,
                    "status": "meeting_scheduled"
                },
                {
                    "id": "estimation",
                    "name": "Estimation",
                    "sequence": 3,
                    "status": "estimating"
                },
                {
                    "id": "contract_signed",
                    "name": "Contract Signed",
                    "sequence": 4,
                    "status": "active"
                }
            ],
            "questions": [
                {
                    "id": "qualified",
                    "stage_id": "lead_qualification",
                    "prompt": "Is this lead qualified?",
                    "response_type": "yes_no",
                    "sequence": 1,
                    "required": true
                },
                {
                    "id": "estimated_value",
                    "stage_id": "lead_qualification",
                    "prompt": "Estimated contract value",
                    "response_type": "number",
                    "sequence": 2
                },
                {
                    "id": "permit_required",
                    "stage_id": "initial_client_meeting",
                    "prompt": "Does the project need a permit?",
                    "response_type": "yes_no",
                    "sequence": 1,
                    "required": true
                },
                {
                    "id": "permit_number",
                    "stage_id": "initial_client_meeting",
                    "prompt": "Permit application number",
                    "response_type": "text",
                    "sequence": 2,
                    "skip_when": {
                        "kind": "answered",
                        "question_id": "permit_required",
                        "condition": { "kind": "equals", "value": "no" }
                    }
                }
            ],
            "rules": [
                {
                    "id": "qualified_yes",
                    "from_stage_id": "lead_qualification",
                    "question_id": "qualified",
                    "trigger": { "kind": "value", "value": "yes" },
                    "to_stage_id": "initial_client_meeting",
                    "automatic": true
                },
                {
                    "id": "permit_filed",
                    "from_stage_id": "initial_client_meeting",
                    "question_id": "permit_number",
                    "trigger": {
                        "kind": "condition",
                        "condition": { "kind": "not", "condition": { "kind": "equals", "value": "pending" } }
                    },
                    "to_stage_id": "estimation",
                    "automatic": true
                }
            ],
            "task_templates": [
                {
                    "id": "schedule_meeting",
                    "stage_id": "initial_client_meeting",
                    "title": "Schedule kickoff meeting",
                    "sequence": 1
                },
                {
                    "id": "send_agenda",
                    "stage_id": "initial_client_meeting",
                    "title": "Send meeting agenda to client",
                    "sequence": 2
                }
            ]
        }))
        .unwrap()
    }

    fn engine() -> (Engine<MemoryStore>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let engine = Engine::new(store.clone(), Arc::new(catalog()));
        (engine, store)
    }

    /// Fractional hours between two stored timestamps, to the second --
    /// the same arithmetic the engine applies.
    fn recompute_hours(entered: &str, exited: &str) -> Decimal {
        let entered = OffsetDateTime::parse(entered, &Rfc3339).unwrap();
        let exited = OffsetDateTime::parse(exited, &Rfc3339).unwrap();
        let seconds = (exited - entered).whole_seconds().max(0);
        (Decimal::from(seconds) / Decimal::from(3600))
            .round_dp_with_strategy(4, RoundingStrategy::MidpointNearestEven)
    }

    #[tokio::test]
    async fn scenario_a_matching_answer_transitions_the_job() {
        let (engine, store) = engine();
        let job = engine
            .create_job(Some("job-1".to_string()), "Riverside duplex", "pm-1")
            .await
            .unwrap();
        assert_eq!(job.current_stage_id, "lead_qualification");
        assert_eq!(job.status, "lead");

        let outcome = engine
            .submit_response(SubmitRequest::new("job-1", "qualified", "yes", "pm-1"))
            .await
            .unwrap();

        assert_eq!(outcome.action, ProgressionAction::StageTransition);
        assert!(outcome.stage_progressed);
        assert_eq!(outcome.current_stage_id, "lead_qualification");
        assert_eq!(outcome.next_stage_id.as_deref(), Some("initial_client_meeting"));
        assert_eq!(outcome.tasks_created, 2);
        assert!(outcome.duration_hours.unwrap() >= Decimal::ZERO);

        let job = store.get_job("job-1").await.unwrap();
        assert_eq!(job.current_stage_id, "initial_client_meeting");
        assert_eq!(job.status, "meeting_scheduled");
        assert_eq!(job.version, 1);

        let tasks = store.list_tasks("job-1").await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|t| t.stage_id == "initial_client_meeting"));
    }

    #[tokio::test]
    async fn scenario_b_answer_without_rule_is_no_transition() {
        let (engine, store) = engine();
        engine
            .create_job(Some("job-1".to_string()), "Riverside duplex", "pm-1")
            .await
            .unwrap();

        let outcome = engine
            .submit_response(SubmitRequest::new("job-1", "estimated_value", "50000", "pm-1"))
            .await
            .unwrap();

        assert_eq!(outcome.action, ProgressionAction::NoTransition);
        assert!(!outcome.stage_progressed);
        assert!(outcome.next_stage_id.is_none());

        let job = store.get_job("job-1").await.unwrap();
        assert_eq!(job.current_stage_id, "lead_qualification");
        assert_eq!(job.version, 0);

        // The answer is still persisted.
        let response = store.get_response("job-1", "estimated_value").await.unwrap();
        assert_eq!(response.unwrap().value, "50000");
    }

    /// Resubmitting an already-processed answer re-runs evaluation against
    /// the job's current stage: storage stays idempotent (one response
    /// row), the ledger gains a row per attempt, and because the job has
    /// moved on the old rule no longer matches.
    #[tokio::test]
    async fn scenario_c_resubmission_is_idempotent_in_storage_only() {
        let (engine, store) = engine();
        engine
            .create_job(Some("job-1".to_string()), "Riverside duplex", "pm-1")
            .await
            .unwrap();

        let first = engine
            .submit_response(SubmitRequest::new("job-1", "qualified", "yes", "pm-1"))
            .await
            .unwrap();
        assert!(first.stage_progressed);

        let second = engine
            .submit_response(SubmitRequest::new("job-1", "qualified", "yes", "pm-1"))
            .await
            .unwrap();
        assert_eq!(second.action, ProgressionAction::NoTransition);
        assert!(!second.stage_progressed);

        let responses = store.list_responses("job-1").await.unwrap();
        assert_eq!(
            responses
                .iter()
                .filter(|r| r.question_id == "qualified")
                .count(),
            1
        );

        // Ledger: creation + transition + re-evaluated attempt.
        let audits = store.list_audit("job-1").await.unwrap();
        let outcomes: Vec<&str> = audits.iter().map(|a| a.outcome.as_str()).collect();
        assert_eq!(outcomes, ["created", "transition", "no_transition"]);
    }

    #[tokio::test]
    async fn scenario_d_unknown_question_is_not_found_and_writes_nothing() {
        let (engine, store) = engine();
        engine
            .create_job(Some("job-1".to_string()), "Riverside duplex", "pm-1")
            .await
            .unwrap();

        let err = engine
            .submit_response(SubmitRequest::new("job-1", "ghost_question", "yes", "pm-1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProgressionError::NotFound { kind: "question", .. }
        ));

        assert!(store.list_responses("job-1").await.unwrap().is_empty());
        // Only the creation row; validation failures precede the ledger.
        assert_eq!(store.list_audit("job-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn type_mismatch_is_a_validation_error_before_any_write() {
        let (engine, store) = engine();
        engine
            .create_job(Some("job-1".to_string()), "Riverside duplex", "pm-1")
            .await
            .unwrap();

        let err = engine
            .submit_response(SubmitRequest::new("job-1", "estimated_value", "a lot", "pm-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressionError::Validation { .. }));
        assert!(!err.retryable());
        assert!(store.list_responses("job-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_arguments_fail_fast() {
        let (engine, _) = engine();
        let err = engine
            .submit_response(SubmitRequest::new("", "qualified", "yes", "pm-1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProgressionError::InvalidArgument { field: "job_id" }
        ));

        let err = engine
            .submit_response(SubmitRequest::new("job-1", "qualified", "  ", "pm-1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProgressionError::InvalidArgument { field: "value" }
        ));
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let (engine, _) = engine();
        let err = engine
            .submit_response(SubmitRequest::new("ghost", "qualified", "yes", "pm-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressionError::NotFound { kind: "job", .. }));
    }

    #[tokio::test]
    async fn skip_condition_records_answer_without_moving_the_job() {
        let (engine, store) = engine();
        engine
            .create_job(Some("job-1".to_string()), "Riverside duplex", "pm-1")
            .await
            .unwrap();
        engine
            .submit_response(SubmitRequest::new("job-1", "qualified", "yes", "pm-1"))
            .await
            .unwrap();
        engine
            .submit_response(SubmitRequest::new("job-1", "permit_required", "no", "pm-1"))
            .await
            .unwrap();

        // permit_number has a matching transition rule, but the skip
        // condition (permit_required == no) short-circuits first.
        let outcome = engine
            .submit_response(SubmitRequest::new("job-1", "permit_number", "n/a", "pm-1"))
            .await
            .unwrap();
        assert_eq!(outcome.action, ProgressionAction::Skipped);
        assert!(!outcome.stage_progressed);

        let job = store.get_job("job-1").await.unwrap();
        assert_eq!(job.current_stage_id, "initial_client_meeting");

        let response = store.get_response("job-1", "permit_number").await.unwrap();
        assert_eq!(response.unwrap().value, "n/a");

        // No success-transition row was appended for the skipped attempt.
        let audits = store.list_audit("job-1").await.unwrap();
        assert_eq!(audits.last().unwrap().outcome, "skipped");
    }

    #[tokio::test]
    async fn skip_condition_does_not_fire_when_prior_answer_differs() {
        let (engine, _store) = engine();
        engine
            .create_job(Some("job-1".to_string()), "Riverside duplex", "pm-1")
            .await
            .unwrap();
        engine
            .submit_response(SubmitRequest::new("job-1", "qualified", "yes", "pm-1"))
            .await
            .unwrap();
        engine
            .submit_response(SubmitRequest::new("job-1", "permit_required", "yes", "pm-1"))
            .await
            .unwrap();

        let outcome = engine
            .submit_response(SubmitRequest::new("job-1", "permit_number", "BP-2291", "pm-1"))
            .await
            .unwrap();
        assert_eq!(outcome.action, ProgressionAction::StageTransition);
        assert_eq!(outcome.next_stage_id.as_deref(), Some("estimation"));
    }

    #[tokio::test]
    async fn every_submission_appends_exactly_one_ledger_row() {
        let (engine, store) = engine();
        engine
            .create_job(Some("job-1".to_string()), "Riverside duplex", "pm-1")
            .await
            .unwrap();

        let submissions = [
            ("estimated_value", "50000"), // no_transition
            ("qualified", "no"),          // no_transition
            ("qualified", "yes"),         // transition
            ("permit_required", "no"),    // no_transition
            ("permit_number", "n/a"),     // skipped
        ];
        for (question, value) in submissions {
            engine
                .submit_response(SubmitRequest::new("job-1", question, value, "pm-1"))
                .await
                .unwrap();
        }

        let audits = store.list_audit("job-1").await.unwrap();
        assert_eq!(audits.len(), 1 + submissions.len());
        assert_eq!(
            audits.iter().filter(|a| a.outcome == "transition").count(),
            1
        );
    }

    #[tokio::test]
    async fn transition_writes_metric_and_advances_stage_clock() {
        let (engine, store) = engine();
        let created = engine
            .create_job(Some("job-1".to_string()), "Riverside duplex", "pm-1")
            .await
            .unwrap();

        let outcome = engine
            .submit_response(SubmitRequest::new("job-1", "qualified", "yes", "pm-1"))
            .await
            .unwrap();

        let metrics = store.list_metrics("job-1").await.unwrap();
        assert_eq!(metrics.len(), 1);
        let metric = &metrics[0];
        assert_eq!(metric.stage_id, "lead_qualification");
        assert_eq!(metric.entered_at, created.stage_entered_at);
        assert_eq!(
            metric.duration_hours,
            recompute_hours(&metric.entered_at, &metric.exited_at)
        );
        assert_eq!(Some(metric.duration_hours), outcome.duration_hours);

        // stage_entered_at is monotonically non-decreasing.
        let job = store.get_job("job-1").await.unwrap();
        let before = OffsetDateTime::parse(&created.stage_entered_at, &Rfc3339).unwrap();
        let after = OffsetDateTime::parse(&job.stage_entered_at, &Rfc3339).unwrap();
        assert!(after >= before);
        assert_eq!(job.stage_entered_at, metric.exited_at);
    }

    #[tokio::test]
    async fn duplicate_job_creation_conflicts() {
        let (engine, _) = engine();
        engine
            .create_job(Some("job-1".to_string()), "Riverside duplex", "pm-1")
            .await
            .unwrap();
        let err = engine
            .create_job(Some("job-1".to_string()), "Riverside duplex", "pm-1")
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressionError::Conflict { .. }));
    }

    #[tokio::test]
    async fn status_reports_stage_and_outstanding_questions() {
        let (engine, _) = engine();
        engine
            .create_job(Some("job-1".to_string()), "Riverside duplex", "pm-1")
            .await
            .unwrap();

        let status = engine.status("job-1").await.unwrap();
        assert_eq!(status.stage_id, "lead_qualification");
        assert_eq!(status.status, "lead");
        assert!(!status.is_terminal);
        assert!(!status.overdue);
        assert_eq!(status.unanswered_required, vec!["qualified".to_string()]);

        engine
            .submit_response(SubmitRequest::new("job-1", "qualified", "yes", "pm-1"))
            .await
            .unwrap();
        let status = engine.status("job-1").await.unwrap();
        assert_eq!(status.stage_id, "initial_client_meeting");
        assert_eq!(
            status.unanswered_required,
            vec!["permit_required".to_string()]
        );
    }

    #[tokio::test]
    async fn parallel_submissions_for_one_job_serialize_cleanly() {
        let (engine, store) = engine();
        let engine = Arc::new(engine);
        engine
            .create_job(Some("job-1".to_string()), "Riverside duplex", "pm-1")
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .submit_response(SubmitRequest::new(
                        "job-1",
                        "qualified",
                        if i % 2 == 0 { "yes" } else { "no" },
                        "pm-1",
                    ))
                    .await
            }));
        }
        for handle in handles {
            // Serialized by the per-job lock: every call completes without
            // a concurrency conflict.
            handle.await.unwrap().unwrap();
        }

        // Exactly one transition fired; later "yes" answers re-evaluated
        // in the new stage where the rule no longer matches.
        let audits = store.list_audit("job-1").await.unwrap();
        assert_eq!(
            audits.iter().filter(|a| a.outcome == "transition").count(),
            1
        );
        assert_eq!(audits.len(), 9);
        let job = store.get_job("job-1").await.unwrap();
        assert_eq!(job.current_stage_id, "initial_client_meeting");
        assert_eq!(job.version, 1);
    }
}
