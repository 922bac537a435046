//! Admission queue shared by `submit` and the worker slots.

use std::collections::{HashMap, VecDeque};
use std::pin::pin;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify, oneshot};

use crate::domain::{ActivationId, ExecutionResult, ExecutionStatus, JobDescriptor, JobState};
use crate::error::{SchedulerError, SubmitError};

pub(crate) type Reply = oneshot::Sender<Result<ExecutionResult, SchedulerError>>;

/// Per-state job counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub timed_out: usize,
    pub failed: usize,
}

pub(crate) struct QueueEntry {
    pub descriptor: JobDescriptor,
    pub activation_id: ActivationId,
    pub reply: Reply,
}

struct QueueState {
    ready: VecDeque<QueueEntry>,
    /// Every job_id admitted by this process, with its current state.
    states: HashMap<String, JobState>,
    counts: JobCounts,
    closed: bool,
}

impl QueueState {
    fn transition(&mut self, job_id: &str, to: JobState) {
        let from = self.states.insert(job_id.to_string(), to);
        if let Some(from) = from {
            *self.slot(from) -= 1;
        }
        *self.slot(to) += 1;
    }

    fn slot(&mut self, state: JobState) -> &mut usize {
        match state {
            JobState::Queued => &mut self.counts.queued,
            JobState::Running => &mut self.counts.running,
            JobState::Completed => &mut self.counts.completed,
            JobState::TimedOut => &mut self.counts.timed_out,
            JobState::Failed => &mut self.counts.failed,
        }
    }
}

/// FIFO of admitted jobs plus the lifecycle of every job seen.
pub(crate) struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    slots: usize,
    max_depth: usize,
}

impl JobQueue {
    pub fn new(slots: usize, max_depth: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                ready: VecDeque::new(),
                states: HashMap::new(),
                counts: JobCounts::default(),
                closed: false,
            }),
            notify: Notify::new(),
            slots,
            max_depth,
        }
    }

    /// Admit `entry` or reject it immediately.
    ///
    /// A job is turned away once the jobs waiting beyond the free slots reach
    /// `max_depth`.
    pub async fn admit(&self, entry: QueueEntry) -> Result<(), SubmitError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(SubmitError::ShuttingDown);
        }
        if state.states.contains_key(&entry.descriptor.job_id) {
            return Err(SubmitError::DuplicateJob(entry.descriptor.job_id));
        }
        let free = self.slots.saturating_sub(state.counts.running);
        let depth = state.ready.len();
        if depth >= self.max_depth.saturating_add(free) {
            return Err(SubmitError::Backpressure { depth });
        }

        state.transition(&entry.descriptor.job_id, JobState::Queued);
        state.ready.push_back(entry);

        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the oldest queued job and mark it running.
    pub async fn lease(&self) -> QueueEntry {
        loop {
            // registered before checking so an admit in between is not missed
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if let Some(entry) = state.ready.pop_front() {
                    state.transition(&entry.descriptor.job_id, JobState::Running);
                    let more = !state.ready.is_empty();
                    drop(state);
                    if more {
                        self.notify.notify_one();
                    }
                    return entry;
                }
            }

            notified.await;
        }
    }

    /// Record the terminal state of a job and free its slot.
    pub async fn finish(&self, job_id: &str, status: ExecutionStatus) -> JobState {
        let terminal = JobState::terminal_for(status);
        self.state.lock().await.transition(job_id, terminal);
        terminal
    }

    /// Stop admitting and hand back everything still waiting.
    pub async fn close(&self) -> Vec<QueueEntry> {
        let mut state = self.state.lock().await;
        state.closed = true;
        let drained: Vec<QueueEntry> = state.ready.drain(..).collect();
        for entry in &drained {
            state.transition(&entry.descriptor.job_id, JobState::Failed);
        }
        drained
    }

    pub async fn counts(&self) -> JobCounts {
        self.state.lock().await.counts.clone()
    }

    pub async fn state_of(&self, job_id: &str) -> Option<JobState> {
        self.state.lock().await.states.get(job_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::sample;
    use std::time::Duration;
    use ulid::Ulid;

    fn entry(job_id: &str) -> (QueueEntry, oneshot::Receiver<Result<ExecutionResult, SchedulerError>>) {
        let (reply, rx) = oneshot::channel();
        let entry = QueueEntry {
            descriptor: sample(job_id),
            activation_id: ActivationId::from(Ulid::new()),
            reply,
        };
        (entry, rx)
    }

    #[tokio::test]
    async fn admit_and_counts() {
        let queue = JobQueue::new(1, 4);
        let (e, _rx) = entry("a");

        queue.admit(e).await.unwrap();

        let counts = queue.counts().await;
        assert_eq!(counts.queued, 1);
        assert_eq!(counts.running, 0);
        assert_eq!(queue.state_of("a").await, Some(JobState::Queued));
    }

    #[tokio::test]
    async fn lease_transitions_to_running() {
        let queue = JobQueue::new(1, 4);
        let (e, _rx) = entry("a");
        queue.admit(e).await.unwrap();

        let leased = tokio::time::timeout(Duration::from_millis(100), queue.lease())
            .await
            .unwrap();

        assert_eq!(leased.descriptor.job_id, "a");
        let counts = queue.counts().await;
        assert_eq!(counts.queued, 0);
        assert_eq!(counts.running, 1);
    }

    #[tokio::test]
    async fn lease_waits_for_admission() {
        let queue = std::sync::Arc::new(JobQueue::new(1, 4));
        let waiter = {
            let queue = std::sync::Arc::clone(&queue);
            tokio::spawn(async move { queue.lease().await.descriptor.job_id })
        };
        tokio::task::yield_now().await;

        let (e, _rx) = entry("late");
        queue.admit(e).await.unwrap();

        let leased = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(leased, "late");
    }

    #[tokio::test]
    async fn finish_moves_to_terminal_state() {
        let queue = JobQueue::new(1, 4);
        let (e, _rx) = entry("a");
        queue.admit(e).await.unwrap();
        queue.lease().await;

        let state = queue.finish("a", ExecutionStatus::TimeoutExpired).await;

        assert_eq!(state, JobState::TimedOut);
        assert_eq!(
            queue.counts().await,
            JobCounts {
                timed_out: 1,
                ..JobCounts::default()
            }
        );
    }

    #[tokio::test]
    async fn depth_limit_counts_free_slots() {
        let queue = JobQueue::new(2, 1);
        let mut keep = Vec::new();
        for id in ["a", "b", "c"] {
            let (e, rx) = entry(id);
            queue.admit(e).await.unwrap();
            keep.push(rx);
        }

        let (e, _rx) = entry("d");
        assert_eq!(
            queue.admit(e).await,
            Err(SubmitError::Backpressure { depth: 3 })
        );
    }

    #[tokio::test]
    async fn close_drains_and_rejects() {
        let queue = JobQueue::new(1, 4);
        let (e, _rx) = entry("a");
        queue.admit(e).await.unwrap();

        let drained = queue.close().await;
        assert_eq!(drained.len(), 1);
        assert_eq!(queue.state_of("a").await, Some(JobState::Failed));

        let (e, _rx) = entry("b");
        assert_eq!(queue.admit(e).await, Err(SubmitError::ShuttingDown));
    }
}
