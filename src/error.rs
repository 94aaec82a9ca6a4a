//! Error types for the protocol engine.
//!
//! There are exactly two protocol-violation kinds (ref spec &sect;7):
//! [`LocalProtocolError`] when the caller asked a peer to do something
//! illegal for its role/state, and [`RemoteProtocolError`] when bytes off
//! the wire violate framing or the peer's state machine. [`CaprotoValueError`]
//! covers caller-supplied garbage that isn't really a protocol violation at
//! all (unknown role, unknown DBR id, negative counts).

use packed_struct::PackingError;
use std::fmt;

/// The caller tried to do something our role/state doesn't permit. The peer
/// is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalProtocolError(pub String);

impl fmt::Display for LocalProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local protocol error: {}", self.0)
    }
}

impl std::error::Error for LocalProtocolError {}

impl LocalProtocolError {
    pub fn new(msg: impl Into<String>) -> Self {
        LocalProtocolError(msg.into())
    }
}

/// Bytes received from the wire violate framing or the peer's state
/// machine. The peer that raises this is put into `DISCONNECTED`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteProtocolError(pub String);

impl fmt::Display for RemoteProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remote protocol error: {}", self.0)
    }
}

impl std::error::Error for RemoteProtocolError {}

impl RemoteProtocolError {
    pub fn new(msg: impl Into<String>) -> Self {
        RemoteProtocolError(msg.into())
    }
}

impl From<PackingError> for RemoteProtocolError {
    fn from(error: PackingError) -> Self {
        RemoteProtocolError(format!("failed to unpack header: {error}"))
    }
}

/// The caller supplied an illegal argument: an unknown role, an unknown DBR
/// id, a negative count, and the like. Not a wire or state-machine error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaprotoValueError(pub String);

impl fmt::Display for CaprotoValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid value: {}", self.0)
    }
}

impl std::error::Error for CaprotoValueError {}

impl CaprotoValueError {
    pub fn new(msg: impl Into<String>) -> Self {
        CaprotoValueError(msg.into())
    }
}

impl From<PackingError> for LocalProtocolError {
    fn from(error: PackingError) -> Self {
        LocalProtocolError(format!("failed to pack command: {error}"))
    }
}

/// Outcome of a streaming TCP decode: either a fully-framed command, or a
/// sentinel meaning "not enough bytes yet, come back with more". This is
/// deliberately not folded into `RemoteProtocolError`: needing more data is
/// the normal, expected state of a byte stream, not a violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome<T> {
    Command(T),
    NeedData,
}
