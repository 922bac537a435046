//! Strongly-typed ULID identifiers.
//!
//! `Id<T>` carries a ULID plus a zero-sized marker so that an activation id can
//! never be passed where a generated job id is expected. Both sort by creation
//! time, which keeps log lines and stored results in submission order.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// Marker trait supplying the display prefix of an id type.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Error returned when a string is not `<prefix><ULID>`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id {0:?}")]
pub struct ParseIdError(String);

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .strip_prefix(T::prefix())
            .ok_or_else(|| ParseIdError(s.to_string()))?;
        let ulid = Ulid::from_string(raw).map_err(|_| ParseIdError(s.to_string()))?;
        Ok(Self::from_ulid(ulid))
    }
}

impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Marker for ids the proxy mints for jobs that arrive without one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GeneratedJob {}

impl IdMarker for GeneratedJob {
    fn prefix() -> &'static str {
        "job-"
    }
}

/// Marker for activations (one accepted submission).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Activation {}

impl IdMarker for Activation {
    fn prefix() -> &'static str {
        "act-"
    }
}

/// Job id minted by the decoder. Callers normally supply their own string id.
pub type GeneratedJobId = Id<GeneratedJob>;

/// Identifier of one accepted submission, echoed back to the caller.
pub type ActivationId = Id<Activation>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_prefix() {
        let ulid = Ulid::new();
        let act = ActivationId::from_ulid(ulid);
        let job = GeneratedJobId::from_ulid(ulid);

        assert_eq!(act.to_string(), format!("act-{ulid}"));
        assert_eq!(job.to_string(), format!("job-{ulid}"));
    }

    #[test]
    fn parse_round_trips_through_display() {
        let act = ActivationId::from_ulid(Ulid::new());
        let parsed: ActivationId = act.to_string().parse().unwrap();
        assert_eq!(parsed, act);
    }

    #[test]
    fn parse_rejects_wrong_prefix() {
        let job = GeneratedJobId::from_ulid(Ulid::new());
        assert!(job.to_string().parse::<ActivationId>().is_err());
    }

    #[test]
    fn serializes_as_prefixed_string() {
        let act = ActivationId::from_ulid(Ulid::new());
        let json = serde_json::to_string(&act).unwrap();
        assert_eq!(json, format!("\"{act}\""));

        let back: ActivationId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, act);
    }

    #[test]
    fn ids_are_sortable_by_creation() {
        let first = ActivationId::from_ulid(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = ActivationId::from_ulid(Ulid::new());
        assert!(first < second);
    }
}
