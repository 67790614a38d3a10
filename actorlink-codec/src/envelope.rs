//! Invocation and response envelopes (sec3 / sec4.3), and the runtime-face
//! error taxonomy that travels inside a `Failure` response.

use std::fmt;

use serde::{Deserialize, Serialize};

use actorlink_wire::ids::{ActorId, CallId};
use actorlink_wire::TransportError;

use crate::codec::{decode_with, encode_with, Encoding};

/// Bumped on any wire-incompatible change to the envelope shape. Peers
/// exchanging a different major version reject the call with
/// `VersionMismatch` rather than attempt to decode further.
pub const PROTOCOL_VERSION: u32 = 1;

/// A method call addressed to a specific actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationEnvelope {
    pub call_id: CallId,
    pub sender_id: Option<ActorId>,
    pub recipient_id: ActorId,
    /// `"TypeName.methodName"`, chosen by the kernel; both sides must agree.
    pub target: String,
    pub args: Vec<u8>,
    pub version: u32,
}

impl InvocationEnvelope {
    pub fn new(call_id: CallId, sender_id: Option<ActorId>, recipient_id: ActorId, target: impl Into<String>, args: Vec<u8>) -> Self {
        InvocationEnvelope { call_id, sender_id, recipient_id, target: target.into(), args, version: PROTOCOL_VERSION }
    }

    pub fn encode(&self, encoding: Encoding) -> Result<Vec<u8>, RuntimeError> {
        encode_with(encoding, self).map_err(RuntimeError::SerializationFailed)
    }

    /// Decode and reject anything whose major version doesn't match ours.
    pub fn decode(encoding: Encoding, bytes: &[u8]) -> Result<Self, RuntimeError> {
        let envelope: InvocationEnvelope = decode_with(encoding, bytes).map_err(RuntimeError::InvalidEnvelope)?;
        if envelope.version != PROTOCOL_VERSION {
            return Err(RuntimeError::VersionMismatch { expected: PROTOCOL_VERSION, actual: envelope.version });
        }
        Ok(envelope)
    }
}

/// The outcome of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallResult {
    Success(Vec<u8>),
    Void,
    Failure(RuntimeError),
}

/// A reply correlated to an [`InvocationEnvelope`] by `call_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub call_id: CallId,
    pub result: CallResult,
}

impl ResponseEnvelope {
    pub fn success(call_id: CallId, bytes: Vec<u8>) -> Self {
        ResponseEnvelope { call_id, result: CallResult::Success(bytes) }
    }

    pub fn void(call_id: CallId) -> Self {
        ResponseEnvelope { call_id, result: CallResult::Void }
    }

    pub fn failure(call_id: CallId, error: RuntimeError) -> Self {
        ResponseEnvelope { call_id, result: CallResult::Failure(error) }
    }

    pub fn encode(&self, encoding: Encoding) -> Result<Vec<u8>, RuntimeError> {
        encode_with(encoding, self).map_err(RuntimeError::SerializationFailed)
    }

    pub fn decode(encoding: Encoding, bytes: &[u8]) -> Result<Self, RuntimeError> {
        decode_with(encoding, bytes).map_err(RuntimeError::InvalidEnvelope)
    }
}

/// The runtime-face error taxonomy (sec4.8): what crosses the wire inside a
/// `Failure` response. Converted to [`TransportError`] at the call boundary
/// so callers only ever see one vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeError {
    ActorNotFound(String),
    ActorDeallocated(String),
    MethodNotFound(String),
    ExecutionFailed { message: String, underlying: Option<String> },
    SerializationFailed(String),
    TransportFailed(String),
    Timeout(u64),
    InvalidEnvelope(String),
    VersionMismatch { expected: u32, actual: u32 },
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::ActorNotFound(id) => write!(f, "actor not found: {id}"),
            RuntimeError::ActorDeallocated(id) => write!(f, "actor deallocated: {id}"),
            RuntimeError::MethodNotFound(name) => write!(f, "method not found: {name}"),
            RuntimeError::ExecutionFailed { message, underlying } => match underlying {
                Some(u) => write!(f, "execution failed: {message} ({u})"),
                None => write!(f, "execution failed: {message}"),
            },
            RuntimeError::SerializationFailed(msg) => write!(f, "serialization failed: {msg}"),
            RuntimeError::TransportFailed(msg) => write!(f, "transport failed: {msg}"),
            RuntimeError::Timeout(secs) => write!(f, "timed out after {secs}s"),
            RuntimeError::InvalidEnvelope(msg) => write!(f, "invalid envelope: {msg}"),
            RuntimeError::VersionMismatch { expected, actual } => write!(f, "version mismatch: expected {expected}, got {actual}"),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Convert a runtime-face error arriving from a remote peer into the
/// transport-face vocabulary callers actually see (sec4.8 propagation
/// policy).
impl From<RuntimeError> for TransportError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::ActorNotFound(id) => match id.parse::<u128>() {
                Ok(v) => TransportError::ActorNotFound(actorlink_wire::ids::Id128::from_u128(v)),
                Err(_) => TransportError::RpcFailed(format!("actor not found: {id}")),
            },
            RuntimeError::ActorDeallocated(id) => TransportError::RpcFailed(format!("actor deallocated: {id}")),
            RuntimeError::MethodNotFound(name) => TransportError::MethodNotSupported(name),
            RuntimeError::ExecutionFailed { message, .. } => TransportError::RpcFailed(message),
            RuntimeError::SerializationFailed(msg) => TransportError::RpcFailed(format!("serialization failed: {msg}")),
            RuntimeError::TransportFailed(msg) => TransportError::RpcFailed(msg),
            RuntimeError::Timeout(_) => TransportError::ConnectionTimeout,
            RuntimeError::InvalidEnvelope(_) => TransportError::InvalidData,
            RuntimeError::VersionMismatch { expected, actual } => {
                TransportError::IncompatibleVersion { detected: actual, required: expected }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actorlink_wire::ids::Id128;

    #[test]
    fn invocation_roundtrips_through_postcard() {
        let envelope = InvocationEnvelope::new(Id128::from_u128(1), Some(Id128::from_u128(2)), Id128::from_u128(3), "Thermostat.setTarget", vec![1, 2, 3]);
        let bytes = envelope.encode(Encoding::Postcard).unwrap();
        let decoded = InvocationEnvelope::decode(Encoding::Postcard, &bytes).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn invocation_roundtrips_through_json() {
        let envelope = InvocationEnvelope::new(Id128::from_u128(1), None, Id128::from_u128(3), "Thermostat.currentTemp", vec![]);
        let bytes = envelope.encode(Encoding::Json).unwrap();
        let decoded = InvocationEnvelope::decode(Encoding::Json, &bytes).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn decode_rejects_mismatched_version() {
        let mut envelope = InvocationEnvelope::new(Id128::from_u128(1), None, Id128::from_u128(3), "Thermostat.currentTemp", vec![]);
        envelope.version = PROTOCOL_VERSION + 1;
        let bytes = encode_with(Encoding::Postcard, &envelope).unwrap();
        let result = InvocationEnvelope::decode(Encoding::Postcard, &bytes);
        assert_eq!(result, Err(RuntimeError::VersionMismatch { expected: PROTOCOL_VERSION, actual: PROTOCOL_VERSION + 1 }));
    }

    #[test]
    fn response_envelope_roundtrips_each_result_variant() {
        let call_id = Id128::from_u128(42);
        for resp in [
            ResponseEnvelope::success(call_id, vec![9, 9]),
            ResponseEnvelope::void(call_id),
            ResponseEnvelope::failure(call_id, RuntimeError::MethodNotFound("Thermostat.bogus".into())),
        ] {
            let bytes = resp.encode(Encoding::Postcard).unwrap();
            let decoded = ResponseEnvelope::decode(Encoding::Postcard, &bytes).unwrap();
            assert_eq!(decoded, resp);
        }
    }

    #[test]
    fn runtime_error_converts_to_transport_face() {
        let transport: TransportError = RuntimeError::MethodNotFound("Thermostat.bogus".into()).into();
        assert_eq!(transport, TransportError::MethodNotSupported("Thermostat.bogus".into()));

        let transport: TransportError = RuntimeError::Timeout(10).into();
        assert_eq!(transport, TransportError::ConnectionTimeout);
    }
}
