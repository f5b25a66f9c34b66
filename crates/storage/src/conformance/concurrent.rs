use std::future::Future;
use std::sync::Arc;

use super::{make_job, TestResult};
use crate::{JobStore, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: JobStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "concurrent",
            "concurrent_updates_exactly_one_wins",
            concurrent_updates_exactly_one_wins(factory).await,
        ),
        TestResult::from_result(
            "concurrent",
            "concurrent_updates_different_jobs_all_succeed",
            concurrent_updates_different_jobs_all_succeed(factory).await,
        ),
    ]
}

/// N tasks each open a transaction and attempt to move the same job from
/// version 0. Exactly one commit succeeds; the rest must get
/// ConcurrentConflict from the update call or from commit.
async fn concurrent_updates_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: JobStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = Arc::new(factory().await);

    {
        let mut txn = store.begin().await.map_err(|e| format!("begin: {e}"))?;
        store
            .create_job(&mut txn, make_job("job-1"))
            .await
            .map_err(|e| format!("create: {e}"))?;
        store.commit(txn).await.map_err(|e| format!("commit init: {e}"))?;
    }

    let mut handles = Vec::new();
    for i in 0..N {
        let s = store.clone();
        handles.push(tokio::spawn(async move {
            let mut txn = s.begin().await?;
            let result = s
                .update_job_stage(
                    &mut txn,
                    "job-1",
                    0,
                    "initial_client_meeting",
                    "meeting_scheduled",
                    &format!("2026-01-01T02:30:{i:02}Z"),
                )
                .await;
            match result {
                Ok(_new_version) => match s.commit(txn).await {
                    Ok(()) => Ok(true),
                    Err(StorageError::ConcurrentConflict { .. }) => Ok(false),
                    Err(e) => Err(e),
                },
                Err(StorageError::ConcurrentConflict { .. }) => {
                    s.abort(txn).await?;
                    Ok(false)
                }
                Err(e) => {
                    let _ = s.abort(txn).await;
                    Err(e)
                }
            }
        }));
    }

    let mut winners = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        }
    }
    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }

    let job = store.get_job("job-1").await.map_err(|e| format!("get: {e}"))?;
    if job.version != 1 || job.current_stage_id != "initial_client_meeting" {
        return Err(format!(
            "final state inconsistent: stage '{}', version {}",
            job.current_stage_id, job.version
        ));
    }
    Ok(())
}

/// Updates against distinct jobs share no lock or version and must all
/// commit.
async fn concurrent_updates_different_jobs_all_succeed<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: JobStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = Arc::new(factory().await);

    for i in 0..N {
        let mut txn = store.begin().await.map_err(|e| format!("begin {i}: {e}"))?;
        store
            .create_job(&mut txn, make_job(&format!("job-{i}")))
            .await
            .map_err(|e| format!("create {i}: {e}"))?;
        store.commit(txn).await.map_err(|e| format!("commit {i}: {e}"))?;
    }

    let mut handles = Vec::new();
    for i in 0..N {
        let s = store.clone();
        handles.push(tokio::spawn(async move {
            let job_id = format!("job-{i}");
            let mut txn = s.begin().await?;
            s.update_job_stage(
                &mut txn,
                &job_id,
                0,
                "initial_client_meeting",
                "meeting_scheduled",
                "2026-01-01T02:30:00Z",
            )
            .await?;
            s.commit(txn).await
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        handle
            .await
            .map_err(|e| format!("task {i} panic: {e}"))?
            .map_err(|e| format!("job-{i} update failed: {e}"))?;
    }

    for i in 0..N {
        let job = store
            .get_job(&format!("job-{i}"))
            .await
            .map_err(|e| format!("get {i}: {e}"))?;
        if job.version != 1 {
            return Err(format!("job-{i} at version {}, expected 1", job.version));
        }
    }
    Ok(())
}
