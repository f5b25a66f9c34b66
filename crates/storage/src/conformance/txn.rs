use std::future::Future;

use super::{make_audit, make_job, TestResult};
use crate::{JobStore, StorageError};

pub(super) async fn run_txn_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: JobStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "txn",
            "uncommitted_writes_invisible",
            uncommitted_writes_invisible(factory).await,
        ),
        TestResult::from_result(
            "txn",
            "abort_discards_writes",
            abort_discards_writes(factory).await,
        ),
        TestResult::from_result(
            "txn",
            "read_your_writes_within_txn",
            read_your_writes_within_txn(factory).await,
        ),
    ]
}

async fn uncommitted_writes_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: JobStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let mut txn = store.begin().await.map_err(|e| format!("begin: {e}"))?;
    store
        .create_job(&mut txn, make_job("job-1"))
        .await
        .map_err(|e| format!("create: {e}"))?;
    store
        .insert_audit(&mut txn, make_audit("audit-1", "job-1", "transition"))
        .await
        .map_err(|e| format!("audit: {e}"))?;

    // Committed reads must not see the open transaction's writes.
    if store.get_job("job-1").await.is_ok() {
        return Err("uncommitted job visible to committed read".to_string());
    }
    let audits = store
        .list_audit("job-1")
        .await
        .map_err(|e| format!("list_audit: {e}"))?;
    if !audits.is_empty() {
        return Err("uncommitted audit row visible to committed read".to_string());
    }

    store.commit(txn).await.map_err(|e| format!("commit: {e}"))?;
    store.get_job("job-1").await.map_err(|e| format!("get after commit: {e}"))?;
    Ok(())
}

async fn abort_discards_writes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: JobStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let mut txn = store.begin().await.map_err(|e| format!("begin: {e}"))?;
    store
        .create_job(&mut txn, make_job("job-1"))
        .await
        .map_err(|e| format!("create: {e}"))?;
    store.abort(txn).await.map_err(|e| format!("abort: {e}"))?;

    match store.get_job("job-1").await {
        Err(StorageError::JobNotFound { .. }) => Ok(()),
        Err(other) => Err(format!("expected JobNotFound after abort, got: {other}")),
        Ok(_) => Err("aborted job row was committed".to_string()),
    }
}

async fn read_your_writes_within_txn<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: JobStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let mut txn = store.begin().await.map_err(|e| format!("begin: {e}"))?;
    store
        .create_job(&mut txn, make_job("job-1"))
        .await
        .map_err(|e| format!("create: {e}"))?;

    // The transaction that wrote the row must be able to read it back.
    let job = store
        .get_job_for_update(&mut txn, "job-1")
        .await
        .map_err(|e| format!("get_job_for_update: {e}"))?;
    if job.version != 0 {
        return Err(format!("expected version 0 in-txn, got {}", job.version));
    }

    let new_version = store
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
    if new_version != 1 {
        return Err(format!("expected new version 1, got {new_version}"));
    }

    let job = store
        .get_job_for_update(&mut txn, "job-1")
        .await
        .map_err(|e| format!("re-read: {e}"))?;
    if job.current_stage_id != "initial_client_meeting" || job.version != 1 {
        return Err(format!(
            "in-txn read did not see the update: stage '{}', version {}",
            job.current_stage_id, job.version
        ));
    }

    store.commit(txn).await.map_err(|e| format!("commit: {e}"))?;
    Ok(())
}
