//! Execution outcome: the record stored at a job's result destination.
//!
//! The constructors are the only way to build a result, so `return_value` is
//! present iff the status is `SUCCESS` and `error_detail` iff it is not.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::ActivationId;

/// Final classification of one execution.
///
/// Serialized as SCREAMING_SNAKE_CASE: SUCCESS / USER_ERROR / TIMEOUT_EXPIRED /
/// INTERNAL_ERROR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    /// The function failed on its own terms (non-zero exit).
    UserError,
    TimeoutExpired,
    /// The proxy or the runtime failed, not the user code.
    InternalError,
}

impl ExecutionStatus {
    pub fn is_success(self) -> bool {
        matches!(self, ExecutionStatus::Success)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub job_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_id: Option<ActivationId>,

    pub status: ExecutionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_value: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,

    #[serde(default)]
    pub logs: String,

    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn success(
        job_id: impl Into<String>,
        return_value: serde_json::Value,
        logs: String,
        start_time: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        Self::build(
            job_id.into(),
            ExecutionStatus::Success,
            Some(return_value),
            None,
            logs,
            start_time,
            elapsed,
        )
    }

    /// Any non-success status. Passing `Success` here is a programming error
    /// and is downgraded to `InternalError`.
    pub fn failure(
        job_id: impl Into<String>,
        status: ExecutionStatus,
        detail: impl Into<String>,
        logs: String,
        start_time: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        let status = if status.is_success() {
            ExecutionStatus::InternalError
        } else {
            status
        };
        Self::build(
            job_id.into(),
            status,
            None,
            Some(detail.into()),
            logs,
            start_time,
            elapsed,
        )
    }

    pub fn internal_error(
        job_id: impl Into<String>,
        detail: impl Into<String>,
        start_time: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        Self::failure(
            job_id,
            ExecutionStatus::InternalError,
            detail,
            String::new(),
            start_time,
            elapsed,
        )
    }

    pub fn with_activation(mut self, activation_id: ActivationId) -> Self {
        self.activation_id = Some(activation_id);
        self
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    fn build(
        job_id: String,
        status: ExecutionStatus,
        return_value: Option<serde_json::Value>,
        error_detail: Option<String>,
        logs: String,
        start_time: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        // end_time derives from the monotonic elapsed time so it can never
        // precede start_time, even if the wall clock steps backwards.
        let end_time = start_time
            + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            job_id,
            activation_id: None,
            status,
            return_value,
            error_detail,
            logs,
            start_time,
            end_time,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn status_serializes_as_screaming_snake_case() {
        let names: Vec<String> = [
            ExecutionStatus::Success,
            ExecutionStatus::UserError,
            ExecutionStatus::TimeoutExpired,
            ExecutionStatus::InternalError,
        ]
        .iter()
        .map(|s| serde_json::to_string(s).unwrap())
        .collect();

        assert_eq!(
            names,
            [
                "\"SUCCESS\"",
                "\"USER_ERROR\"",
                "\"TIMEOUT_EXPIRED\"",
                "\"INTERNAL_ERROR\""
            ]
        );
    }

    #[test]
    fn success_carries_value_and_no_detail() {
        let r = ExecutionResult::success("j1", json!(4), "4\n".into(), t0(), Duration::from_millis(1500));
        assert_eq!(r.status, ExecutionStatus::Success);
        assert_eq!(r.return_value, Some(json!(4)));
        assert!(r.error_detail.is_none());
        assert_eq!(r.duration_ms, 1500);
        assert_eq!(r.end_time - r.start_time, chrono::Duration::milliseconds(1500));
    }

    #[test]
    fn failure_never_reports_success() {
        let r = ExecutionResult::failure(
            "j1",
            ExecutionStatus::Success,
            "confused caller",
            String::new(),
            t0(),
            Duration::ZERO,
        );
        assert_eq!(r.status, ExecutionStatus::InternalError);
        assert!(r.return_value.is_none());
        assert_eq!(r.error_detail.as_deref(), Some("confused caller"));
    }

    #[test]
    fn json_omits_absent_fields() {
        let r = ExecutionResult::internal_error("j1", "boom", t0(), Duration::ZERO);
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["status"], "INTERNAL_ERROR");
        assert!(v.get("return_value").is_none());
        assert!(v.get("activation_id").is_none());

        let back: ExecutionResult = serde_json::from_value(v).unwrap();
        assert_eq!(back, r);
    }
}
