//! Conformance test suite for `JobStore` implementations.
//!
//! This module provides a backend-agnostic test suite that any `JobStore`
//! implementation can run to verify correctness. The suite covers:
//!
//! - **Initialization**: job creation, duplicate detection, lookups
//! - **Transaction isolation**: uncommitted writes invisible, abort
//!   discards, read-your-writes inside a transaction
//! - **Atomic commit**: all-or-nothing semantics for multi-record
//!   transition transactions
//! - **Version validation / OCC**: optimistic concurrency conflict
//!   detection on the job row
//! - **Response upsert**: one current row per (job, question), original
//!   author preserved
//! - **Concurrency**: racing transactions against the OCC check
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function
//! that creates a fresh, empty store for each test:
//!
//! ```ignore
//! use jobflow_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn postgres_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_postgres_store().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod commit;
mod concurrent;
mod init;
mod response;
mod txn;
mod version;

use std::fmt;
use std::future::Future;

use crate::record::{AuditRecord, JobRecord, ResponseRecord, StageMetricRecord, TaskRecord};
use crate::JobStore;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "init", "txn", "commit").
    pub category: String,
    /// Test name (e.g. "create_job_visible_after_commit").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self {
                category: category.to_string(),
                name: name.to_string(),
                passed: true,
                message: None,
            },
            Err(msg) => Self {
                category: category.to_string(),
                name: name.to_string(),
                passed: false,
                message: Some(msg),
            },
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// store, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: JobStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(init::run_init_tests(&factory).await);
    results.extend(txn::run_txn_tests(&factory).await);
    results.extend(commit::run_commit_tests(&factory).await);
    results.extend(version::run_version_tests(&factory).await);
    results.extend(response::run_response_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: record constructors with sensible defaults ──────────────────────

fn make_job(job_id: &str) -> JobRecord {
    JobRecord {
        job_id: job_id.to_string(),
        tenant_id: "test-tenant".to_string(),
        name: "Test job".to_string(),
        current_stage_id: "lead_qualification".to_string(),
        status: "lead".to_string(),
        stage_entered_at: "2026-01-01T00:00:00Z".to_string(),
        version: 0,
        created_by: Some("test-user".to_string()),
        created_at: "2026-01-01T00:00:00Z".to_string(),
    }
}

fn make_response(job_id: &str, question_id: &str, value: &str) -> ResponseRecord {
    ResponseRecord {
        job_id: job_id.to_string(),
        question_id: question_id.to_string(),
        value: value.to_string(),
        metadata: serde_json::json!({}),
        source: "web_app".to_string(),
        created_by: "test-user".to_string(),
        updated_by: "test-user".to_string(),
        created_at: "2026-01-01T00:10:00Z".to_string(),
        updated_at: "2026-01-01T00:10:00Z".to_string(),
    }
}

fn make_audit(id: &str, job_id: &str, outcome: &str) -> AuditRecord {
    AuditRecord {
        id: id.to_string(),
        job_id: job_id.to_string(),
        from_stage_id: "lead_qualification".to_string(),
        to_stage_id: "initial_client_meeting".to_string(),
        from_status: "lead".to_string(),
        to_status: "meeting_scheduled".to_string(),
        trigger_source: "question_response".to_string(),
        triggered_by: "test-user".to_string(),
        question_id: Some("qualified".to_string()),
        response_value: Some("yes".to_string()),
        duration_hours: Some(rust_decimal::Decimal::new(25, 1)),
        outcome: outcome.to_string(),
        error_detail: None,
        created_at: "2026-01-01T02:30:00Z".to_string(),
    }
}

fn make_metric(id: &str, job_id: &str) -> StageMetricRecord {
    StageMetricRecord {
        id: id.to_string(),
        job_id: job_id.to_string(),
        stage_id: "lead_qualification".to_string(),
        entered_at: "2026-01-01T00:00:00Z".to_string(),
        exited_at: "2026-01-01T02:30:00Z".to_string(),
        duration_hours: rust_decimal::Decimal::new(25, 1),
    }
}

fn make_task(id: &str, job_id: &str, title: &str) -> TaskRecord {
    TaskRecord {
        id: id.to_string(),
        job_id: job_id.to_string(),
        stage_id: "initial_client_meeting".to_string(),
        title: title.to_string(),
        description: None,
        sequence: 1,
        status: "open".to_string(),
        created_by: "test-user".to_string(),
        created_at: "2026-01-01T02:30:00Z".to_string(),
    }
}
