use std::future::Future;

use super::{make_job, make_response, TestResult};
use crate::JobStore;

pub(super) async fn run_response_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: JobStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "response",
            "upsert_inserts_then_updates_in_place",
            upsert_inserts_then_updates_in_place(factory).await,
        ),
        TestResult::from_result(
            "response",
            "upsert_preserves_created_fields",
            upsert_preserves_created_fields(factory).await,
        ),
        TestResult::from_result(
            "response",
            "one_row_per_job_question_pair",
            one_row_per_job_question_pair(factory).await,
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

async fn upsert_inserts_then_updates_in_place<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: JobStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    seed_job(&store).await?;

    let mut txn = store.begin().await.map_err(|e| format!("begin: {e}"))?;
    let (_, created) = store
        .upsert_response(&mut txn, make_response("job-1", "qualified", "no"))
        .await
        .map_err(|e| format!("first upsert: {e}"))?;
    store.commit(txn).await.map_err(|e| format!("commit: {e}"))?;
    if !created {
        return Err("first upsert did not report a new row".to_string());
    }

    let mut txn = store.begin().await.map_err(|e| format!("begin 2: {e}"))?;
    let (_, created) = store
        .upsert_response(&mut txn, make_response("job-1", "qualified", "yes"))
        .await
        .map_err(|e| format!("second upsert: {e}"))?;
    store.commit(txn).await.map_err(|e| format!("commit 2: {e}"))?;
    if created {
        return Err("second upsert created a duplicate row".to_string());
    }

    let stored = store
        .get_response("job-1", "qualified")
        .await
        .map_err(|e| format!("get: {e}"))?
        .ok_or("response missing after upsert")?;
    if stored.value != "yes" {
        return Err(format!("expected latest value 'yes', got '{}'", stored.value));
    }
    Ok(())
}

async fn upsert_preserves_created_fields<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: JobStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    seed_job(&store).await?;

    let mut first = make_response("job-1", "qualified", "no");
    first.created_by = "estimator".to_string();
    first.updated_by = "estimator".to_string();
    let mut txn = store.begin().await.map_err(|e| format!("begin: {e}"))?;
    store
        .upsert_response(&mut txn, first)
        .await
        .map_err(|e| format!("first upsert: {e}"))?;
    store.commit(txn).await.map_err(|e| format!("commit: {e}"))?;

    let mut second = make_response("job-1", "qualified", "yes");
    second.created_by = "pm-2".to_string();
    second.updated_by = "pm-2".to_string();
    second.updated_at = "2026-01-02T09:00:00Z".to_string();
    let mut txn = store.begin().await.map_err(|e| format!("begin 2: {e}"))?;
    store
        .upsert_response(&mut txn, second)
        .await
        .map_err(|e| format!("second upsert: {e}"))?;
    store.commit(txn).await.map_err(|e| format!("commit 2: {e}"))?;

    let stored = store
        .get_response("job-1", "qualified")
        .await
        .map_err(|e| format!("get: {e}"))?
        .ok_or("response missing")?;
    if stored.created_by != "estimator" {
        return Err(format!(
            "original author lost: created_by '{}'",
            stored.created_by
        ));
    }
    if stored.updated_by != "pm-2" || stored.updated_at != "2026-01-02T09:00:00Z" {
        return Err("updated_* fields not replaced by the second write".to_string());
    }
    Ok(())
}

async fn one_row_per_job_question_pair<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: JobStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    seed_job(&store).await?;

    for value in ["no", "yes", "yes"] {
        let mut txn = store.begin().await.map_err(|e| format!("begin: {e}"))?;
        store
            .upsert_response(&mut txn, make_response("job-1", "qualified", value))
            .await
            .map_err(|e| format!("upsert '{value}': {e}"))?;
        store.commit(txn).await.map_err(|e| format!("commit '{value}': {e}"))?;
    }

    let responses = store
        .list_responses("job-1")
        .await
        .map_err(|e| format!("list: {e}"))?;
    if responses.len() != 1 {
        return Err(format!(
            "expected exactly one row for the pair, got {}",
            responses.len()
        ));
    }
    Ok(())
}
