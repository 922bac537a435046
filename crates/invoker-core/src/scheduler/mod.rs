//! Concurrency scheduler - a fixed pool of worker slots fed by a FIFO queue.
//!
//! Per job: Queued -> Running -> {Completed, TimedOut, Failed}.
//!
//! `submit` only admits or rejects; the caller then awaits its `JobHandle`.
//! Each slot leases the oldest queued job, runs it through the `JobRunner`,
//! records the terminal state and hands the result to the waiter.

mod queue;
mod worker;

use std::sync::Arc;

use tokio::sync::{Mutex, oneshot};

use crate::domain::{ActivationId, ExecutionResult, JobDescriptor, JobState};
use crate::error::{SchedulerError, SubmitError};
use crate::ports::{Clock, IdGenerator, JobRunner};

pub use self::queue::JobCounts;
use self::queue::{JobQueue, QueueEntry};
use self::worker::WorkerGroup;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Worker slots, i.e. jobs executing at once.
    pub slots: usize,

    /// Jobs allowed to wait beyond the free slots.
    pub max_queue_depth: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            slots: 1,
            max_queue_depth: 256,
        }
    }
}

pub struct Scheduler {
    queue: Arc<JobQueue>,
    ids: Arc<dyn IdGenerator>,
    slots: usize,
    workers: Mutex<Option<WorkerGroup>>,
}

/// Claim on the result of one admitted job.
#[derive(Debug)]
pub struct JobHandle {
    pub job_id: String,
    pub activation_id: ActivationId,
    rx: oneshot::Receiver<Result<ExecutionResult, SchedulerError>>,
}

impl JobHandle {
    /// Suspend until the job reaches a terminal state.
    pub async fn wait(self) -> Result<ExecutionResult, SchedulerError> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(SchedulerError::Lost(self.job_id)),
        }
    }
}

impl Scheduler {
    /// Spawn the worker slots. Must be called inside a tokio runtime.
    pub fn start(
        config: SchedulerConfig,
        runner: Arc<dyn JobRunner>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let slots = config.slots.max(1);
        let queue = Arc::new(JobQueue::new(slots, config.max_queue_depth));
        let workers = WorkerGroup::spawn(slots, Arc::clone(&queue), runner, clock);
        tracing::info!(slots, max_queue_depth = config.max_queue_depth, "scheduler started");

        Self {
            queue,
            ids,
            slots,
            workers: Mutex::new(Some(workers)),
        }
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Admit `descriptor` for execution. Never waits for a free slot.
    pub async fn submit(&self, descriptor: JobDescriptor) -> Result<JobHandle, SubmitError> {
        let job_id = descriptor.job_id.clone();
        let activation_id = self.ids.generate_activation_id();
        let (reply, rx) = oneshot::channel();

        self.queue
            .admit(QueueEntry {
                descriptor,
                activation_id,
                reply,
            })
            .await
            .inspect_err(|err| tracing::warn!(%job_id, error = %err, "submission rejected"))?;

        tracing::debug!(%job_id, %activation_id, "job queued");
        Ok(JobHandle {
            job_id,
            activation_id,
            rx,
        })
    }

    pub async fn counts(&self) -> JobCounts {
        self.queue.counts().await
    }

    pub async fn state(&self, job_id: &str) -> Option<JobState> {
        self.queue.state_of(job_id).await
    }

    /// Close admission, reject queued jobs and wait for in-flight ones.
    ///
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) {
        let drained = self.queue.close().await;
        if !drained.is_empty() {
            tracing::warn!(rejected = drained.len(), "dropping queued jobs on shutdown");
        }
        for entry in drained {
            let job_id = entry.descriptor.job_id;
            let _ = entry.reply.send(Err(SchedulerError::ShuttingDown(job_id)));
        }

        let workers = self.workers.lock().await.take();
        if let Some(workers) = workers {
            workers.shutdown_and_join().await;
            tracing::info!("scheduler stopped");
        }
    }
}
