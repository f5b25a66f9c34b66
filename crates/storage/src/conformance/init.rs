use std::future::Future;

use super::{make_job, TestResult};
use crate::{JobStore, StorageError};

pub(super) async fn run_init_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: JobStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "init",
            "create_job_visible_after_commit",
            create_job_visible_after_commit(factory).await,
        ),
        TestResult::from_result(
            "init",
            "create_job_starts_at_version_0",
            create_job_starts_at_version_0(factory).await,
        ),
        TestResult::from_result(
            "init",
            "duplicate_create_rejected",
            duplicate_create_rejected(factory).await,
        ),
        TestResult::from_result(
            "init",
            "missing_job_is_not_found",
            missing_job_is_not_found(factory).await,
        ),
    ]
}

async fn create_job_visible_after_commit<S, F, Fut>(factory: &F) -> Result<(), String>
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
    store.commit(txn).await.map_err(|e| format!("commit: {e}"))?;

    let job = store.get_job("job-1").await.map_err(|e| format!("get: {e}"))?;
    if job.current_stage_id != "lead_qualification" {
        return Err(format!(
            "expected initial stage, got '{}'",
            job.current_stage_id
        ));
    }
    Ok(())
}

async fn create_job_starts_at_version_0<S, F, Fut>(factory: &F) -> Result<(), String>
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
    store.commit(txn).await.map_err(|e| format!("commit: {e}"))?;

    let job = store.get_job("job-1").await.map_err(|e| format!("get: {e}"))?;
    if job.version != 0 {
        return Err(format!("expected version 0, got {}", job.version));
    }
    Ok(())
}

async fn duplicate_create_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
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
    store.commit(txn).await.map_err(|e| format!("commit: {e}"))?;

    let mut txn = store.begin().await.map_err(|e| format!("begin 2: {e}"))?;
    let result = store.create_job(&mut txn, make_job("job-1")).await;
    let conflict_now = matches!(&result, Err(StorageError::JobAlreadyExists { .. }));
    // Buffered backends may only detect the duplicate at commit.
    let commit_result = if result.is_ok() {
        store.commit(txn).await
    } else {
        store.abort(txn).await.map_err(|e| format!("abort: {e}"))?;
        Ok(())
    };
    let conflict_at_commit = matches!(commit_result, Err(StorageError::JobAlreadyExists { .. }));
    if !conflict_now && !conflict_at_commit {
        return Err("duplicate create was not rejected at create or commit".to_string());
    }
    Ok(())
}

async fn missing_job_is_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: JobStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    match store.get_job("nope").await {
        Err(StorageError::JobNotFound { job_id }) if job_id == "nope" => Ok(()),
        Err(other) => Err(format!("expected JobNotFound, got: {other}")),
        Ok(_) => Err("expected JobNotFound, got a job".to_string()),
    }
}
