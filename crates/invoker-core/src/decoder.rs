//! Task decoder: invocation payload (JSON) <-> `JobDescriptor`.
//!
//! Wire shape:
//!
//! ```json
//! {
//!   "job_id": "optional, minted when absent",
//!   "function_reference": {"key": "funcs/add.sh", "format": {"kind": "script", "interpreter": "sh"}},
//!   "arguments": [2, 2],
//!   "storage_bundle": "data/input.bin",
//!   "data_byte_range": [0, 1024],
//!   "timeout_seconds": 5,
//!   "result_destination": "results/add.json",
//!   "extra_env": {"MODE": "fast"},
//!   "memory_limit_mb": 256
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::{ByteRange, FunctionReference, JobDescriptor, UnitFormat};
use crate::error::DecodeError;
use crate::ports::IdGenerator;

/// Wire form. Every field is optional here so missing fields map onto
/// `DecodeError::MissingField` instead of a generic serde message.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_reference: Option<FunctionReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    arguments: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    storage_bundle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_byte_range: Option<ByteRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result_destination: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    extra_env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    memory_limit_mb: Option<u64>,
}

/// Parses invocation payloads.
///
/// Pure apart from minting a `job-<ULID>` id for payloads that carry none.
#[derive(Clone)]
pub struct TaskDecoder {
    ids: Arc<dyn IdGenerator>,
}

impl TaskDecoder {
    pub fn new(ids: Arc<dyn IdGenerator>) -> Self {
        Self { ids }
    }

    pub fn decode(&self, raw_payload: &[u8]) -> Result<JobDescriptor, DecodeError> {
        if raw_payload.iter().all(u8::is_ascii_whitespace) {
            return Err(DecodeError::Malformed("empty payload".into()));
        }
        let wire: WireDescriptor = serde_json::from_slice(raw_payload)
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;

        let function_reference = wire
            .function_reference
            .ok_or(DecodeError::MissingField("function_reference"))?;
        let timeout = wire
            .timeout_seconds
            .ok_or(DecodeError::MissingField("timeout_seconds"))?;
        let result_destination = wire
            .result_destination
            .ok_or(DecodeError::MissingField("result_destination"))?;

        if timeout <= 0 {
            return Err(DecodeError::NonPositiveTimeout(timeout));
        }
        validate_function(&function_reference)?;
        non_empty("result_destination", &result_destination)?;
        if let Some(bundle) = &wire.storage_bundle {
            non_empty("storage_bundle", bundle)?;
        }
        if let Some(range) = wire.data_byte_range {
            if range.end < range.start {
                return Err(DecodeError::InvalidField {
                    field: "data_byte_range",
                    reason: format!("end {} precedes start {}", range.end, range.start),
                });
            }
            if wire.storage_bundle.is_none() {
                return Err(DecodeError::InvalidField {
                    field: "data_byte_range",
                    reason: "requires storage_bundle".into(),
                });
            }
        }
        if wire.memory_limit_mb == Some(0) {
            return Err(DecodeError::InvalidField {
                field: "memory_limit_mb",
                reason: "must be positive".into(),
            });
        }

        let job_id = match wire.job_id {
            Some(id) => {
                non_empty("job_id", &id)?;
                id
            }
            None => self.ids.generate_job_id().to_string(),
        };

        Ok(JobDescriptor {
            job_id,
            function_reference,
            arguments: wire.arguments,
            storage_bundle: wire.storage_bundle,
            data_byte_range: wire.data_byte_range,
            timeout_seconds: timeout as u64,
            result_destination,
            extra_env: wire.extra_env,
            memory_limit_mb: wire.memory_limit_mb,
        })
    }
}

/// Wire encoding of a descriptor; `decode(encode(d)) == d`.
pub fn encode(descriptor: &JobDescriptor) -> Vec<u8> {
    let wire = WireDescriptor {
        job_id: Some(descriptor.job_id.clone()),
        function_reference: Some(descriptor.function_reference.clone()),
        arguments: descriptor.arguments.clone(),
        storage_bundle: descriptor.storage_bundle.clone(),
        data_byte_range: descriptor.data_byte_range,
        timeout_seconds: Some(i64::try_from(descriptor.timeout_seconds).unwrap_or(i64::MAX)),
        result_destination: Some(descriptor.result_destination.clone()),
        extra_env: descriptor.extra_env.clone(),
        memory_limit_mb: descriptor.memory_limit_mb,
    };
    // A struct of strings, numbers and JSON values always serializes.
    serde_json::to_vec(&wire).unwrap_or_default()
}

fn non_empty(field: &'static str, value: &str) -> Result<(), DecodeError> {
    if value.trim().is_empty() {
        return Err(DecodeError::InvalidField {
            field,
            reason: "must not be empty".into(),
        });
    }
    Ok(())
}

fn validate_function(function: &FunctionReference) -> Result<(), DecodeError> {
    non_empty("function_reference.key", &function.key)?;
    match &function.format {
        UnitFormat::Script { interpreter } => {
            non_empty("function_reference.format.interpreter", interpreter)
        }
        UnitFormat::Executable => Ok(()),
        UnitFormat::Archive {
            entrypoint,
            interpreter,
        } => {
            non_empty("function_reference.format.entrypoint", entrypoint)?;
            if let Some(interpreter) = interpreter {
                non_empty("function_reference.format.interpreter", interpreter)?;
            }
            Ok(())
        }
    }
}
