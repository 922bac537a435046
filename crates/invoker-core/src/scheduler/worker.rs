use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::domain::ExecutionResult;
use crate::ports::{Clock, JobRunner};

use super::queue::{JobQueue, QueueEntry};

/// Worker slot handles.
/// - `shutdown_and_join` stops every slot once its current job is done
pub(crate) struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` slots.
    pub fn spawn(
        n: usize,
        queue: Arc<JobQueue>,
        runner: Arc<dyn JobRunner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for slot in 0..n {
            let queue = Arc::clone(&queue);
            let runner = Arc::clone(&runner);
            let clock = Arc::clone(&clock);
            let mut rx = shutdown_rx.clone();

            joins.push(tokio::spawn(async move {
                worker_loop(slot, queue, runner, clock, &mut rx).await;
            }));
        }

        Self { shutdown_tx, joins }
    }

    /// Stop taking new jobs and wait for in-flight ones.
    pub async fn shutdown_and_join(self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
        for join in self.joins {
            if let Err(err) = join.await {
                tracing::error!(error = %err, "worker slot ended abnormally");
            }
        }
    }
}

async fn worker_loop(
    slot: usize,
    queue: Arc<JobQueue>,
    runner: Arc<dyn JobRunner>,
    clock: Arc<dyn Clock>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let entry = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            entry = queue.lease() => entry,
        };

        run_entry(slot, &queue, &runner, clock.as_ref(), entry).await;
    }
    tracing::debug!(slot, "worker slot stopped");
}

async fn run_entry(
    slot: usize,
    queue: &JobQueue,
    runner: &Arc<dyn JobRunner>,
    clock: &dyn Clock,
    entry: QueueEntry,
) {
    let QueueEntry {
        descriptor,
        activation_id,
        reply,
    } = entry;
    let job_id = descriptor.job_id.clone();
    tracing::info!(slot, %job_id, %activation_id, "job started");

    let start_time = clock.now();
    let started = Instant::now();

    // a panicking runner takes down this task, not the slot
    let run = {
        let runner = Arc::clone(runner);
        tokio::spawn(async move { runner.run(&descriptor).await })
    };
    let result = match run.await {
        Ok(result) => result,
        Err(err) => {
            tracing::error!(slot, %job_id, error = %err, "runner panicked");
            ExecutionResult::internal_error(
                job_id.clone(),
                format!("runner panicked: {err}"),
                start_time,
                started.elapsed(),
            )
        }
    }
    .with_activation(activation_id);

    let state = queue.finish(&job_id, result.status).await;
    tracing::info!(
        slot,
        %job_id,
        status = ?result.status,
        ?state,
        duration_ms = result.duration_ms,
        "job finished"
    );

    if reply.send(Ok(result)).is_err() {
        tracing::debug!(%job_id, "waiter went away before the result");
    }
}
