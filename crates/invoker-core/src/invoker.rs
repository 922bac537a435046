//! Invoker - the production `JobRunner`.
//!
//! Stages everything a job needs from the object store (code, then the
//! optional input bundle or a byte range of it) and hands it to the sandbox.
//! Staging failures are the proxy's problem, not the function's, so they
//! surface as `INTERNAL_ERROR` results.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::domain::{ExecutionResult, JobDescriptor};
use crate::error::StorageError;
use crate::ports::{Clock, JobRunner, ObjectStore};
use crate::retry::{RetryPolicy, with_retry};
use crate::sandbox::Sandbox;

/// Upper bound on any job's timeout unless configured otherwise.
pub const DEFAULT_MAX_TIMEOUT_SECONDS: u64 = 900;

pub struct Invoker {
    store: Arc<dyn ObjectStore>,
    sandbox: Arc<Sandbox>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    max_timeout_seconds: u64,
}

impl Invoker {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        sandbox: Arc<Sandbox>,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            sandbox,
            retry,
            clock,
            max_timeout_seconds: DEFAULT_MAX_TIMEOUT_SECONDS,
        }
    }

    /// Jobs asking for more than `seconds` run with `seconds`.
    pub fn with_max_timeout_seconds(mut self, seconds: u64) -> Self {
        self.max_timeout_seconds = seconds.max(1);
        self
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    async fn fetch_code(&self, descriptor: &JobDescriptor) -> Result<Vec<u8>, StorageError> {
        let key = descriptor.function_reference.key.as_str();
        with_retry(&self.retry, "fetch function code", || self.store.fetch(key)).await
    }

    async fn fetch_input(
        &self,
        descriptor: &JobDescriptor,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        let Some(bundle) = descriptor.storage_bundle.as_deref() else {
            return Ok(None);
        };
        let bytes = match descriptor.data_byte_range {
            Some(range) => {
                with_retry(&self.retry, "fetch input range", || {
                    self.store.fetch_range(bundle, range)
                })
                .await?
            }
            None => with_retry(&self.retry, "fetch input", || self.store.fetch(bundle)).await?,
        };
        Ok(Some(bytes))
    }

    fn clamp_timeout<'a>(&self, descriptor: &'a JobDescriptor) -> Cow<'a, JobDescriptor> {
        if descriptor.timeout_seconds <= self.max_timeout_seconds {
            return Cow::Borrowed(descriptor);
        }
        tracing::warn!(
            job_id = %descriptor.job_id,
            requested = descriptor.timeout_seconds,
            max = self.max_timeout_seconds,
            "timeout above limit, clamping"
        );
        let mut clamped = descriptor.clone();
        clamped.timeout_seconds = self.max_timeout_seconds;
        Cow::Owned(clamped)
    }
}

#[async_trait]
impl JobRunner for Invoker {
    async fn run(&self, descriptor: &JobDescriptor) -> ExecutionResult {
        let start_time = self.clock.now();
        let started = Instant::now();

        let code = match self.fetch_code(descriptor).await {
            Ok(code) => code,
            Err(err) => {
                tracing::warn!(job_id = %descriptor.job_id, error = %err, "could not fetch function");
                return ExecutionResult::internal_error(
                    descriptor.job_id.clone(),
                    format!(
                        "failed to load function {}: {err}",
                        descriptor.function_reference.key
                    ),
                    start_time,
                    started.elapsed(),
                );
            }
        };

        let input = match self.fetch_input(descriptor).await {
            Ok(input) => input,
            Err(err) => {
                tracing::warn!(job_id = %descriptor.job_id, error = %err, "could not stage input");
                return ExecutionResult::internal_error(
                    descriptor.job_id.clone(),
                    format!(
                        "failed to stage input {}: {err}",
                        descriptor.storage_bundle.as_deref().unwrap_or_default()
                    ),
                    start_time,
                    started.elapsed(),
                );
            }
        };

        let descriptor = self.clamp_timeout(descriptor);
        self.sandbox.execute(&descriptor, code, input).await
    }
}
