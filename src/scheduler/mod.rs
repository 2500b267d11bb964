//! In-process deferred task queue.
//!
//! Tasks carry a wall-clock deadline. A min-heap orders the scheduled set;
//! workers block on [`Scheduler::next`], which promotes due entries into the
//! ready queue and otherwise sleeps until the earliest deadline or a `Notify`
//! from a new enqueue, whichever comes first.

mod retry;
mod task;
pub mod worker;

pub use retry::RetryPolicy;
pub use task::Task;
pub use worker::{TaskHandler, WorkerGroup};

use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

/// A task plus its delivery bookkeeping.
#[derive(Clone, Debug)]
pub struct QueuedTask {
    pub id: u64,
    pub task: Task,
    pub attempts: u32,
}

#[derive(Debug)]
struct ScheduledEntry {
    run_at: DateTime<Utc>,
    seq: u64,
    queued: QueuedTask,
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.run_at == other.run_at && self.seq == other.seq
    }
}
impl Eq for ScheduledEntry {}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering: the heap pops the earliest deadline first, FIFO
        // within a deadline.
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct SchedulerState {
    scheduled: BinaryHeap<ScheduledEntry>,
    ready: VecDeque<QueuedTask>,
    next_id: u64,
}

impl SchedulerState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Move entries whose deadline has passed into the ready queue.
    fn promote_due(&mut self, now: DateTime<Utc>) {
        while let Some(entry) = self.scheduled.peek() {
            if entry.run_at > now {
                break;
            }
            let entry = self.scheduled.pop().expect("peeked entry exists");
            self.ready.push_back(entry.queued);
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    state: Arc<Mutex<SchedulerState>>,
    notify: Arc<Notify>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SchedulerState::default())),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Enqueue `task` to run at `run_at`. Past deadlines run immediately.
    pub async fn schedule_at(&self, task: Task, run_at: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        let id = state.allocate_id();
        let seq = id;
        tracing::debug!(kind = task.kind(), %run_at, task_id = id, "task scheduled");
        state.scheduled.push(ScheduledEntry {
            run_at,
            seq,
            queued: QueuedTask { id, task, attempts: 0 },
        });
        drop(state);
        self.notify.notify_one();
    }

    /// Enqueue `task` to run after `delay`.
    pub async fn schedule_in(&self, task: Task, delay: std::time::Duration) {
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        self.schedule_at(task, Utc::now() + delay).await;
    }

    /// Put a failed delivery back with its attempt count intact.
    pub(crate) async fn requeue_at(&self, queued: QueuedTask, run_at: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        let seq = state.allocate_id();
        state.scheduled.push(ScheduledEntry { run_at, seq, queued });
        drop(state);
        self.notify.notify_one();
    }

    /// Wait for the next due task.
    pub async fn next(&self) -> QueuedTask {
        loop {
            let next_deadline = {
                let mut state = self.state.lock().await;
                state.promote_due(Utc::now());
                if let Some(queued) = state.ready.pop_front() {
                    return queued;
                }
                state.scheduled.peek().map(|e| e.run_at)
            };

            match next_deadline {
                Some(deadline) => {
                    let wait = (deadline - Utc::now()).to_std().unwrap_or_default();
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    /// (ready, scheduled) depths, for logs and health output.
    pub async fn depths(&self) -> (usize, usize) {
        let state = self.state.lock().await;
        (state.ready.len(), state.scheduled.len())
    }
}

impl Default for Scheduler {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn due_tasks_come_out_in_deadline_order() {
        let scheduler = Scheduler::new();
        let late = Task::SessionEnd { session_id: Uuid::now_v7() };
        let early = Task::OrderExpiration { order_id: Uuid::now_v7() };
        scheduler.schedule_in(late.clone(), Duration::from_millis(40)).await;
        scheduler.schedule_in(early.clone(), Duration::from_millis(5)).await;

        let first = scheduler.next().await;
        let second = scheduler.next().await;
        assert_eq!(first.task, early);
        assert_eq!(second.task, late);
    }

    #[tokio::test]
    async fn past_deadline_runs_immediately() {
        let scheduler = Scheduler::new();
        let task = Task::BuyerSessionEnd { buyer_session_id: Uuid::now_v7() };
        scheduler.schedule_at(task.clone(), Utc::now() - chrono::Duration::seconds(10)).await;
        let queued = tokio::time::timeout(Duration::from_millis(100), scheduler.next())
            .await
            .expect("task should be ready at once");
        assert_eq!(queued.task, task);
        assert_eq!(queued.attempts, 0);
    }

    #[tokio::test]
    async fn next_blocks_until_enqueue() {
        let scheduler = Scheduler::new();
        let waiter = scheduler.clone();
        let handle = tokio::spawn(async move { waiter.next().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let task = Task::SessionEnd { session_id: Uuid::now_v7() };
        scheduler.schedule_in(task.clone(), Duration::ZERO).await;
        let queued = tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert_eq!(queued.task, task);
    }
}
