//! Job descriptor: one unit of work requested of the proxy.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the code bytes behind a [`FunctionReference`] are packaged.
///
/// Each variant maps to one `LoadableUnit` implementation in the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitFormat {
    /// Source text run through an interpreter found on `PATH`.
    Script { interpreter: String },

    /// A file executed directly (native binary or a script with a shebang).
    Executable,

    /// A gzip'd tarball unpacked into the working directory.
    Archive {
        entrypoint: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interpreter: Option<String>,
    },
}

/// Locator for the code to execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionReference {
    /// Object-store key of the code bytes.
    pub key: String,
    pub format: UnitFormat,
}

/// Half-open byte range `[start, end)` into the staged data bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u64, u64)", into = "(u64, u64)")]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<(u64, u64)> for ByteRange {
    fn from((start, end): (u64, u64)) -> Self {
        Self { start, end }
    }
}

impl From<ByteRange> for (u64, u64) {
    fn from(range: ByteRange) -> Self {
        (range.start, range.end)
    }
}

/// Structured representation of a single invocation.
///
/// Built only through the decoder, which enforces `timeout_seconds > 0` and
/// non-empty keys.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescriptor {
    pub job_id: String,
    pub function_reference: FunctionReference,
    /// Ordered, already-deserialized inputs.
    pub arguments: Vec<serde_json::Value>,
    /// Key of a data bundle to stage as the function's input file.
    pub storage_bundle: Option<String>,
    pub data_byte_range: Option<ByteRange>,
    pub timeout_seconds: u64,
    /// Key the outcome is written to.
    pub result_destination: String,
    pub extra_env: BTreeMap<String, String>,
    pub memory_limit_mb: Option<u64>,
}

impl JobDescriptor {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Minimal `sh` script descriptor for tests across the crate.
#[cfg(test)]
pub(crate) fn sample(job_id: &str) -> JobDescriptor {
    JobDescriptor {
        job_id: job_id.to_string(),
        function_reference: FunctionReference {
            key: format!("funcs/{job_id}.sh"),
            format: UnitFormat::Script {
                interpreter: "sh".into(),
            },
        },
        arguments: Vec::new(),
        storage_bundle: None,
        data_byte_range: None,
        timeout_seconds: 5,
        result_destination: format!("results/{job_id}.json"),
        extra_env: BTreeMap::new(),
        memory_limit_mb: None,
    }
}
