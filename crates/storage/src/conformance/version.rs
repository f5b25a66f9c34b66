use std::future::Future;

use super::{make_job, TestResult};
use crate::{JobStore, StorageError};

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: JobStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "version",
            "stale_version_conflicts",
            stale_version_conflicts(factory).await,
        ),
        TestResult::from_result(
            "version",
            "sequential_updates_increment_version",
            sequential_updates_increment_version(factory).await,
        ),
    ]
}

async fn seed_job<S: JobStore>(store: &S) -> Result<(), String> {
    let mut txn = store.begin().await.map_err(|e| format!("begin seed: {e}"))?;
    store
        .create_job(&mut txn, make_job("job-1"))
        .await
        .map_err(|e| format!("create: {e}"))?;
    store.commit(txn).await.map_err(|e| format!("commit seed: {e}"))
}

async fn stale_version_conflicts<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: JobStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    seed_job(&store).await?;

    // Move the job to version 1.
    let mut txn = store.begin().await.map_err(|e| format!("begin: {e}"))?;
    store
        .update_job_stage(
            &mut txn,
            "job-1",
            0,
            "initial_client_meeting",
            "meeting_scheduled",
            "2026-01-01T02:30:00Z",
        )
        .await
        .map_err(|e| format!("update: {e}"))?;
    store.commit(txn).await.map_err(|e| format!("commit: {e}"))?;

    // A second update still expecting version 0 must conflict — at the
    // update call or, for buffered backends, at commit.
    let mut txn = store.begin().await.map_err(|e| format!("begin 2: {e}"))?;
    let result = store
        .update_job_stage(
            &mut txn,
            "job-1",
            0,
            "contract_signed",
            "active",
            "2026-01-01T04:00:00Z",
        )
        .await;
    let conflict_now = matches!(&result, Err(StorageError::ConcurrentConflict { .. }));
    let conflict_at_commit = if result.is_ok() {
        matches!(
            store.commit(txn).await,
            Err(StorageError::ConcurrentConflict { .. })
        )
    } else {
        store.abort(txn).await.map_err(|e| format!("abort: {e}"))?;
        false
    };
    if !conflict_now && !conflict_at_commit {
        return Err("stale version update did not conflict".to_string());
    }

    // The losing update must not have been applied.
    let job = store.get_job("job-1").await.map_err(|e| format!("get: {e}"))?;
    if job.current_stage_id != "initial_client_meeting" || job.version != 1 {
        return Err(format!(
            "conflicting update leaked: stage '{}', version {}",
            job.current_stage_id, job.version
        ));
    }
    Ok(())
}

async fn sequential_updates_increment_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: JobStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    seed_job(&store).await?;

    let stages = [
        ("initial_client_meeting", "meeting_scheduled"),
        ("contract_signed", "active"),
    ];
    for (i, (stage, status)) in stages.iter().enumerate() {
        let expected = i as i64;
        let mut txn = store.begin().await.map_err(|e| format!("begin {i}: {e}"))?;
        let new_version = store
            .update_job_stage(
                &mut txn,
                "job-1",
                expected,
                stage,
                status,
                "2026-01-01T02:30:00Z",
            )
            .await
            .map_err(|e| format!("update {i}: {e}"))?;
        if new_version != expected + 1 {
            return Err(format!(
                "expected version {} after update {i}, got {new_version}",
                expected + 1
            ));
        }
        store.commit(txn).await.map_err(|e| format!("commit {i}: {e}"))?;
    }

    let job = store.get_job("job-1").await.map_err(|e| format!("get: {e}"))?;
    if job.version != 2 {
        return Err(format!("expected committed version 2, got {}", job.version));
    }
    Ok(())
}
