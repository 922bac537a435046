//! IdGenerator port - ULID-based ids.
//!
//! The timestamp part comes from the injected `Clock`, the random part from
//! `rand`, so ids stay unique under a `FixedClock` while their time prefix is
//! deterministic.

use ulid::Ulid;

use crate::domain::ids::{ActivationId, GeneratedJobId};
use crate::ports::Clock;

/// Thread-safe id source shared by the decoder and the scheduler.
pub trait IdGenerator: Send + Sync {
    /// Id for a job submitted without a `job_id`.
    fn generate_job_id(&self) -> GeneratedJobId;

    /// Id for an accepted submission.
    fn generate_activation_id(&self) -> ActivationId;
}

pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_job_id(&self) -> GeneratedJobId {
        GeneratedJobId::from(self.next_ulid())
    }

    fn generate_activation_id(&self) -> ActivationId {
        ActivationId::from(self.next_ulid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);

        let a = id_gen.generate_activation_id();
        let b = id_gen.generate_activation_id();
        let c = id_gen.generate_activation_id();

        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn fixed_clock_pins_the_timestamp_part() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.generate_activation_id();
        let id2 = id_gen.generate_activation_id();

        // random part still differs
        assert_ne!(id1, id2);
        assert_eq!(id1.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
        assert_eq!(id2.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
    }

    #[test]
    fn job_and_activation_ids_have_distinct_prefixes() {
        let id_gen = UlidGenerator::new(SystemClock);

        assert!(id_gen.generate_job_id().to_string().starts_with("job-"));
        assert!(id_gen.generate_activation_id().to_string().starts_with("act-"));
    }
}
