//! Job wire codec.
//!
//! The broker stores jobs as `{"body": <marshalled>, "metadata": <map>}`;
//! the body is marshalled independently so the CLI worker protocol can pass
//! it verbatim as `--body=<marshalled>`. Malformed input is a recoverable
//! error, never a panic: the fetch loop drops the entry and keeps going.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Job;

/// Errors raised while marshalling or unmarshalling job payloads.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Failed to marshal job payload: {0}")]
    Marshal(serde_json::Error),

    #[error("Failed to unmarshal job payload: {0}")]
    Unmarshal(serde_json::Error),
}

/// Wire envelope stored in the broker.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    body: String,
    metadata: HashMap<String, serde_json::Value>,
}

/// A payload decoded from the broker.
#[derive(Debug)]
pub struct DecodedPayload {
    pub body: serde_json::Value,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Marshal a job body for the wire or the CLI worker protocol.
pub fn marshal_body(body: &serde_json::Value) -> Result<String, CodecError> {
    serde_json::to_string(body).map_err(CodecError::Marshal)
}

/// Marshal a metadata map for the CLI worker protocol.
pub fn marshal_metadata(
    metadata: &HashMap<String, serde_json::Value>,
) -> Result<String, CodecError> {
    serde_json::to_string(metadata).map_err(CodecError::Marshal)
}

/// Encode a job into the broker's envelope format.
pub fn encode_payload(job: &Job) -> Result<String, CodecError> {
    let envelope = Envelope {
        body: marshal_body(job.body())?,
        metadata: job.metadata().clone(),
    };
    serde_json::to_string(&envelope).map_err(CodecError::Marshal)
}

/// Decode a broker envelope back into body and metadata.
pub fn decode_payload(raw: &str) -> Result<DecodedPayload, CodecError> {
    let envelope: Envelope = serde_json::from_str(raw).map_err(CodecError::Unmarshal)?;
    let body = serde_json::from_str(&envelope.body).map_err(CodecError::Unmarshal)?;
    Ok(DecodedPayload {
        body,
        metadata: envelope.metadata,
    })
}

/// Decode a marshalled metadata map (CLI worker protocol).
pub fn decode_metadata(raw: &str) -> Result<HashMap<String, serde_json::Value>, CodecError> {
    serde_json::from_str(raw).map_err(CodecError::Unmarshal)
}
