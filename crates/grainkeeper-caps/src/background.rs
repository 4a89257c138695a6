//! Fire-and-forget work that must still be observable.
//!
//! Cancelling an ongoing notification happens after the dismissal that
//! triggered it has already returned. Tasks are tracked here so tests and
//! shutdown can wait for them with [`BackgroundTasks::settle`].

use std::future::Future;
use std::sync::Mutex;

use tokio::task::JoinSet;
use tracing::error;

#[derive(Debug, Default)]
pub struct BackgroundTasks {
    set: Mutex<JoinSet<()>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` on the current runtime.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        // Reap whatever already finished so the set stays small.
        while let Some(result) = set.try_join_next() {
            log_join(result);
        }
        set.spawn(task);
    }

    /// Wait until every spawned task, including ones spawned meanwhile, has finished.
    pub async fn settle(&self) {
        loop {
            let mut pending = {
                let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
                std::mem::take(&mut *set)
            };
            if pending.is_empty() {
                return;
            }
            while let Some(result) = pending.join_next().await {
                log_join(result);
            }
        }
    }

    /// Tasks spawned and not yet reaped.
    pub fn len(&self) -> usize {
        self.set.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn log_join(result: Result<(), tokio::task::JoinError>) {
    if let Err(err) = result {
        if err.is_panic() {
            error!(error = %err, "background task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_settle_waits_for_all() {
        let tasks = BackgroundTasks::new();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let done = done.clone();
            tasks.spawn(async move {
                tokio::task::yield_now().await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        tasks.settle().await;
        assert_eq!(done.load(Ordering::SeqCst), 5);
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_settle_on_empty_returns() {
        BackgroundTasks::new().settle().await;
    }
}
