//! invoker-core
//!
//! Building blocks for the invocation proxy: one HTTP request in, one
//! sandboxed function execution out, its result persisted to object storage.
//!
//! # Modules
//! - **domain**: job descriptors, execution results, lifecycle states, ids
//! - **ports**: capability traits (ObjectStore, JobRunner, Clock, IdGenerator)
//! - **impls**: object store bindings (in-memory, local directory)
//! - **decoder**: invocation payload -> `JobDescriptor`
//! - **sandbox**: isolated child-process execution with timeouts
//! - **scheduler**: bounded worker slots, FIFO queue, backpressure
//! - **invoker**: stages code and input, then runs the sandbox
//! - **reporter**: writes results back to storage
//! - **retry**: backoff for transient storage failures

pub mod decoder;
pub mod domain;
pub mod error;
pub mod impls;
pub mod invoker;
pub mod ports;
pub mod reporter;
pub mod retry;
pub mod sandbox;
pub mod scheduler;

pub use decoder::TaskDecoder;
pub use domain::{
    ActivationId, ByteRange, ExecutionResult, ExecutionStatus, FunctionReference, JobDescriptor,
    JobState, UnitFormat,
};
pub use error::{DecodeError, ReportError, SandboxError, SchedulerError, StorageError, SubmitError};
pub use invoker::Invoker;
pub use reporter::ResultReporter;
pub use retry::RetryPolicy;
pub use sandbox::{Sandbox, SandboxConfig};
pub use scheduler::{JobCounts, JobHandle, Scheduler, SchedulerConfig};
