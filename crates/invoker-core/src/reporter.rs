//! Result reporter - persists an `ExecutionResult` at its destination key.

use std::sync::Arc;

use crate::domain::ExecutionResult;
use crate::error::ReportError;
use crate::ports::ObjectStore;
use crate::retry::{RetryPolicy, with_retry};

#[derive(Clone)]
pub struct ResultReporter {
    store: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
}

impl ResultReporter {
    pub fn new(store: Arc<dyn ObjectStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Write `result` as JSON to `destination`.
    ///
    /// A failure keeps the task status so callers can tell "task failed"
    /// apart from "task ran but its result was not saved".
    pub async fn report(
        &self,
        result: &ExecutionResult,
        destination: &str,
    ) -> Result<(), ReportError> {
        let body = serde_json::to_vec(result).map_err(|source| ReportError::Serialize {
            job_id: result.job_id.clone(),
            source,
        })?;

        with_retry(&self.retry, "put result", || {
            self.store.put(destination, body.clone())
        })
        .await
        .map_err(|source| ReportError::Storage {
            job_id: result.job_id.clone(),
            status: result.status,
            source,
        })?;

        tracing::info!(
            job_id = %result.job_id,
            status = ?result.status,
            %destination,
            "result reported"
        );
        Ok(())
    }
}
