//! Ports - capability interfaces between the pipeline and the outside world.

pub mod clock;
pub mod id_generator;
pub mod object_store;
pub mod runner;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::object_store::ObjectStore;
pub use self::runner::JobRunner;
