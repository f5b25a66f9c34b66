use std::future::Future;

use super::{make_audit, make_job, make_metric, make_task, TestResult};
use crate::JobStore;

pub(super) async fn run_commit_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: JobStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "commit",
            "transition_txn_all_visible_after_commit",
            transition_txn_all_visible_after_commit(factory).await,
        ),
        TestResult::from_result(
            "commit",
            "transition_txn_none_visible_after_abort",
            transition_txn_none_visible_after_abort(factory).await,
        ),
        TestResult::from_result(
            "commit",
            "audit_preserves_insertion_order",
            audit_preserves_insertion_order(factory).await,
        ),
    ]
}

/// Seed a committed job, then run a full transition transaction:
/// job update + metric + audit + task.
async fn seed_job<S: JobStore>(store: &S) -> Result<(), String> {
    let mut txn = store.begin().await.map_err(|e| format!("begin seed: {e}"))?;
    store
        .create_job(&mut txn, make_job("job-1"))
        .await
        .map_err(|e| format!("create: {e}"))?;
    store.commit(txn).await.map_err(|e| format!("commit seed: {e}"))
}

async fn write_transition<S: JobStore>(store: &S, txn: &mut S::Txn) -> Result<(), String> {
    store
        .update_job_stage(
            txn,
            "job-1",
            0,
            "initial_client_meeting",
            "meeting_scheduled",
            "2026-01-01T02:30:00Z",
        )
        .await
        .map_err(|e| format!("update: {e}"))?;
    store
        .insert_metric(txn, make_metric("metric-1", "job-1"))
        .await
        .map_err(|e| format!("metric: {e}"))?;
    store
        .insert_audit(txn, make_audit("audit-1", "job-1", "transition"))
        .await
        .map_err(|e| format!("audit: {e}"))?;
    store
        .insert_task(txn, make_task("task-1", "job-1", "Schedule kickoff meeting"))
        .await
        .map_err(|e| format!("task: {e}"))
}

async fn transition_txn_all_visible_after_commit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: JobStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    seed_job(&store).await?;

    let mut txn = store.begin().await.map_err(|e| format!("begin: {e}"))?;
    write_transition(&store, &mut txn).await?;
    store.commit(txn).await.map_err(|e| format!("commit: {e}"))?;

    let job = store.get_job("job-1").await.map_err(|e| format!("get: {e}"))?;
    if job.current_stage_id != "initial_client_meeting" || job.version != 1 {
        return Err(format!(
            "job not updated: stage '{}', version {}",
            job.current_stage_id, job.version
        ));
    }
    let metrics = store.list_metrics("job-1").await.map_err(|e| e.to_string())?;
    let audits = store.list_audit("job-1").await.map_err(|e| e.to_string())?;
    let tasks = store.list_tasks("job-1").await.map_err(|e| e.to_string())?;
    if metrics.len() != 1 || audits.len() != 1 || tasks.len() != 1 {
        return Err(format!(
            "expected 1 metric/audit/task, got {}/{}/{}",
            metrics.len(),
            audits.len(),
            tasks.len()
        ));
    }
    Ok(())
}

async fn transition_txn_none_visible_after_abort<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: JobStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    seed_job(&store).await?;

    let mut txn = store.begin().await.map_err(|e| format!("begin: {e}"))?;
    write_transition(&store, &mut txn).await?;
    store.abort(txn).await.map_err(|e| format!("abort: {e}"))?;

    let job = store.get_job("job-1").await.map_err(|e| format!("get: {e}"))?;
    if job.current_stage_id != "lead_qualification" || job.version != 0 {
        return Err("aborted transition mutated the job row".to_string());
    }
    let metrics = store.list_metrics("job-1").await.map_err(|e| e.to_string())?;
    let audits = store.list_audit("job-1").await.map_err(|e| e.to_string())?;
    let tasks = store.list_tasks("job-1").await.map_err(|e| e.to_string())?;
    if !metrics.is_empty() || !audits.is_empty() || !tasks.is_empty() {
        return Err(format!(
            "aborted rows visible: {}/{}/{} metric/audit/task",
            metrics.len(),
            audits.len(),
            tasks.len()
        ));
    }
    Ok(())
}

async fn audit_preserves_insertion_order<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: JobStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    seed_job(&store).await?;

    for (i, outcome) in ["no_transition", "skipped", "transition"].iter().enumerate() {
        let mut txn = store.begin().await.map_err(|e| format!("begin {i}: {e}"))?;
        store
            .insert_audit(&mut txn, make_audit(&format!("audit-{i}"), "job-1", outcome))
            .await
            .map_err(|e| format!("audit {i}: {e}"))?;
        store.commit(txn).await.map_err(|e| format!("commit {i}: {e}"))?;
    }

    let audits = store.list_audit("job-1").await.map_err(|e| e.to_string())?;
    let outcomes: Vec<&str> = audits.iter().map(|a| a.outcome.as_str()).collect();
    if outcomes != ["no_transition", "skipped", "transition"] {
        return Err(format!("ledger order not preserved: {outcomes:?}"));
    }
    Ok(())
}
