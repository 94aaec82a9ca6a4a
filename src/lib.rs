//! A sans-I/O implementation of the EPICS Channel Access protocol: a pure
//! byte-buffer-in/command-out engine with no sockets, threads, or timers
//! of its own.
//!
//! The crate is organized the way the protocol itself is layered:
//!
//! - [`header`] and [`dbr`] are the wire format — the fixed 16/24-byte
//!   header and the DBR metadata/value family that rides in a payload.
//! - [`commands`] is the command set built on top of that wire format,
//!   and [`codec`] is the datagram/bytestream framing around it.
//! - [`broadcaster`] and [`circuit`]/[`channel`] are the two stateful
//!   peer objects a real client or server drives: UDP search/beacon
//!   traffic, and TCP per-channel request/response/subscription traffic.
//! - [`role`], [`error`], and [`ids`] are shared plumbing: which side of
//!   a conversation a peer plays, the two-kind protocol error model, and
//!   the collision-free id counters CID/SID/subscription-id/ioid/search-id
//!   all share the same implementation of.
//!
//! None of these types touch the network. A caller reads bytes off a
//! socket, hands them to a `Broadcaster`/`VirtualCircuit`, and gets back
//! `Command`s to act on; commands to send are built the same way and
//! handed back as bytes to write. This split is what makes the engine
//! testable without a network stack, and reusable across any I/O model
//! (blocking, async, simulated).

pub mod broadcaster;
pub mod channel;
pub mod circuit;
pub mod codec;
pub mod commands;
pub mod dbr;
pub mod error;
pub mod header;
pub mod ids;
pub mod role;

pub use commands::Command;
pub use error::{CaprotoValueError, DecodeOutcome, LocalProtocolError, RemoteProtocolError};
pub use role::Role;

/// Protocol version this crate negotiates by default when nothing else is
/// specified. EPICS base has shipped CA protocol version 13 since the
/// 3.14 series; this is also the minimum version that understands the
/// extended header (spec &sect;3).
pub const DEFAULT_PROTOCOL_VERSION: u16 = 13;
