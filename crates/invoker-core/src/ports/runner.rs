//! JobRunner port - what a worker slot executes.
//!
//! The scheduler only knows this trait; the production runner is
//! `invoker::Invoker` (stage code and data, then run the sandbox). Tests plug
//! in runners that block on a gate or count concurrency.

use async_trait::async_trait;

use crate::domain::{ExecutionResult, JobDescriptor};

#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Run one job to a terminal result.
    ///
    /// Task-level failures are part of the returned `ExecutionResult`; this
    /// never returns an error.
    async fn run(&self, descriptor: &JobDescriptor) -> ExecutionResult;
}
