//! Background worker group.
//!
//! Workers lease due tasks and run them through a [`TaskHandler`]. Failures
//! are rescheduled with exponential backoff until the attempt budget runs
//! out. Delivery is at-least-once; handlers must be idempotent.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::AppError;

use super::{QueuedTask, RetryPolicy, Scheduler, Task};

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<(), AppError>;
}

/// Worker group handle. Dropping `shutdown_tx` stops the group; `join()`
/// waits for in-flight handlers to finish.
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers over the shared scheduler.
    pub fn spawn(
        n: usize,
        scheduler: Scheduler,
        handler: Arc<dyn TaskHandler>,
        retry: RetryPolicy,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let scheduler = scheduler.clone();
            let handler = Arc::clone(&handler);
            let retry = retry.clone();
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, scheduler, handler, retry, &mut rx).await;
            });
            joins.push(join);
        }

        Self { shutdown_tx, joins }
    }

    /// Stop taking new leases. In-flight handlers are not cancelled.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            let _ = join.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    scheduler: Scheduler,
    handler: Arc<dyn TaskHandler>,
    retry: RetryPolicy,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let mut queued: QueuedTask = tokio::select! {
            _ = shutdown_rx.changed() => continue,
            queued = scheduler.next() => queued,
        };

        queued.attempts += 1;
        let kind = queued.task.kind();
        match handler.handle(&queued.task).await {
            Ok(()) => {
                tracing::debug!(worker_id, kind, task_id = queued.id, "task done");
            }
            Err(err) if queued.attempts >= retry.max_attempts => {
                tracing::error!(
                    worker_id,
                    kind,
                    task_id = queued.id,
                    attempts = queued.attempts,
                    error = %err,
                    "task dead, attempt budget exhausted"
                );
            }
            Err(err) => {
                let delay = retry.next_delay(queued.attempts);
                tracing::warn!(
                    worker_id,
                    kind,
                    task_id = queued.id,
                    attempts = queued.attempts,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "task failed, retry scheduled"
                );
                let run_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                scheduler.requeue_at(queued, run_at).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    struct FlakyHandler {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl TaskHandler for FlakyHandler {
        async fn handle(&self, _task: &Task) -> Result<(), AppError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(AppError::BadRequest("transient".into()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn failed_task_retries_until_success() {
        let scheduler = Scheduler::new();
        let handler = Arc::new(FlakyHandler { calls: AtomicU32::new(0), fail_first: 2 });
        let retry = RetryPolicy {
            base_delay: Duration::from_millis(5),
            multiplier: 1.0,
            max_attempts: 5,
        };
        let group = WorkerGroup::spawn(1, scheduler.clone(), handler.clone(), retry);

        scheduler
            .schedule_in(Task::SessionEnd { session_id: Uuid::now_v7() }, Duration::ZERO)
            .await;

        tokio::time::timeout(Duration::from_secs(1), async {
            while handler.calls.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("handler should eventually succeed");

        group.shutdown_and_join().await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn dead_tasks_stop_retrying() {
        let scheduler = Scheduler::new();
        let handler = Arc::new(FlakyHandler { calls: AtomicU32::new(0), fail_first: u32::MAX });
        let retry = RetryPolicy {
            base_delay: Duration::from_millis(2),
            multiplier: 1.0,
            max_attempts: 3,
        };
        let group = WorkerGroup::spawn(1, scheduler.clone(), handler.clone(), retry);

        scheduler
            .schedule_in(Task::OrderExpiration { order_id: Uuid::now_v7() }, Duration::ZERO)
            .await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        group.shutdown_and_join().await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }
}
