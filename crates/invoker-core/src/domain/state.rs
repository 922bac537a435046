//! Job lifecycle inside the scheduler.

use serde::{Deserialize, Serialize};

use super::outcome::ExecutionStatus;

/// Job state.
///
/// State transitions:
/// - Queued -> Running -> Completed
/// - Queued -> Running -> TimedOut
/// - Queued -> Running -> Failed (user or internal error)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Admitted, waiting for a free slot.
    Queued,

    /// Bound to a worker slot.
    Running,

    Completed,

    TimedOut,

    Failed,
}

impl JobState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::TimedOut | JobState::Failed
        )
    }

    /// Terminal state reached by a job that produced `status`.
    pub fn terminal_for(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::Success => JobState::Completed,
            ExecutionStatus::TimeoutExpired => JobState::TimedOut,
            ExecutionStatus::UserError | ExecutionStatus::InternalError => JobState::Failed,
        }
    }
}
