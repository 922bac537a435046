//! Domain model (ids, job descriptors, outcomes, lifecycle states).

pub mod ids;
pub mod job;
pub mod outcome;
pub mod state;

pub use self::ids::{ActivationId, GeneratedJobId};
pub use self::job::{ByteRange, FunctionReference, JobDescriptor, UnitFormat};
pub use self::outcome::{ExecutionResult, ExecutionStatus};
pub use self::state::JobState;
