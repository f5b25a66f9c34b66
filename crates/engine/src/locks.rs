//! Per-job serialization.
//!
//! Two concurrent submissions for the same job must not interleave the
//! progression steps, or stale durations and duplicate tasks result. The
//! engine holds a keyed async mutex per job id for the whole operation;
//! different jobs proceed in parallel. The storage layer's OCC version
//! check remains as the backstop for out-of-process writers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Keyed mutex map. Lock entries are retained for the engine's lifetime.
#[derive(Default)]
pub(crate) struct JobLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl JobLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for one job, waiting behind any submission
    /// already in flight for it.
    pub async fn acquire(&self, job_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            map.entry(job_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_job_serializes() {
        let locks = Arc::new(JobLocks::new());
        let guard = locks.acquire("job-1").await;

        let locks2 = locks.clone();
        let contender = tokio::spawn(async move {
            let _guard = locks2.acquire("job-1").await;
        });

        // The contender cannot finish while the first guard is held.
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn different_jobs_do_not_block_each_other() {
        let locks = JobLocks::new();
        let _a = locks.acquire("job-1").await;
        // Acquiring another job's lock must not deadlock.
        let _b = locks.acquire("job-2").await;
    }
}
