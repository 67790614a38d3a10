//! The transport-local face of the error model (sec4.8 / C8).
//!
//! These are the errors raised by code that talks directly to a link or to
//! the fragmentation/reassembly machinery above it. They never cross the
//! wire themselves -- `actorlink-codec::RuntimeError` is the face that
//! does, and the kernel converts between the two at the call boundary.

use std::fmt;

use crate::ids::{CharacteristicId, PeerId, ServiceId};

/// Transport-face errors (sec4.8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    BluetoothUnavailable,
    Unauthorized,
    PoweredOff,
    PeripheralNotFound(PeerId),
    ServiceNotFound(ServiceId),
    CharacteristicNotFound(CharacteristicId),
    ConnectionTimeout,
    ConnectionFailed(String),
    Disconnected,
    IncompatibleVersion { detected: u32, required: u32 },
    InvalidData,
    QuotaExceeded,
    OperationNotSupported,
    MethodNotSupported(String),
    ActorNotFound(PeerId),
    RpcFailed(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::BluetoothUnavailable => write!(f, "bluetooth unavailable"),
            TransportError::Unauthorized => write!(f, "unauthorized"),
            TransportError::PoweredOff => write!(f, "link powered off"),
            TransportError::PeripheralNotFound(id) => write!(f, "peripheral not found: {id}"),
            TransportError::ServiceNotFound(id) => write!(f, "service not found: {id}"),
            TransportError::CharacteristicNotFound(id) => write!(f, "characteristic not found: {id}"),
            TransportError::ConnectionTimeout => write!(f, "connection timed out"),
            TransportError::ConnectionFailed(msg) => write!(f, "connection failed: {msg}"),
            TransportError::Disconnected => write!(f, "peer disconnected"),
            TransportError::IncompatibleVersion { detected, required } => {
                write!(f, "incompatible version: detected {detected}, required {required}")
            }
            TransportError::InvalidData => write!(f, "invalid data"),
            TransportError::QuotaExceeded => write!(f, "quota exceeded"),
            TransportError::OperationNotSupported => write!(f, "operation not supported"),
            TransportError::MethodNotSupported(name) => write!(f, "method not supported: {name}"),
            TransportError::ActorNotFound(id) => write!(f, "actor not found: {id}"),
            TransportError::RpcFailed(msg) => write!(f, "rpc failed: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Errors specific to the link abstraction (a view onto `TransportError`
/// restricted to what a link implementation can itself raise).
pub type LinkError = TransportError;
