//! The 16-byte Channel Access message header, and the 8-byte extension
//! used when a payload or element count overflows 16 bits (protocol
//! version >= 13 only).
//!
//! Grounded on the teacher's `packed_struct`-based header in
//! `lib.rs`/`resourcerecord.rs`: a `#[derive(PackedStruct)]` struct with
//! explicit `msb0` bit ranges does the bit-exact (de)serialization instead
//! of manual shifting.

use crate::error::{DecodeOutcome, LocalProtocolError, RemoteProtocolError};
use packed_struct::prelude::*;

pub const HEADER_BYTES: usize = 16;
pub const EXTENDED_HEADER_BYTES: usize = 8;

/// Minimum protocol version that understands the extended header. Below
/// this, a payload/count that doesn't fit in 16 bits can't be sent at all.
pub const EXTENDED_MESSAGE_MIN_VERSION: u16 = 13;

const SENTINEL_U16: u16 = 0xFFFF;

#[derive(PackedStruct, Debug, Clone, Copy, PartialEq, Eq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "16", endian = "msb")]
struct RawHeader {
    command: u16,
    payload_size: u16,
    data_type: u16,
    data_count: u16,
    parameter1: u32,
    parameter2: u32,
}

#[derive(PackedStruct, Debug, Clone, Copy, PartialEq, Eq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "8", endian = "msb")]
struct RawExtendedHeader {
    payload_size: u32,
    data_count: u32,
}

/// A decoded message header, with `payload_size`/`data_count` already
/// widened to 32 bits regardless of whether the wire form used the
/// extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub command: u16,
    pub payload_size: u32,
    pub data_type: u16,
    pub data_count: u32,
    pub parameter1: u32,
    pub parameter2: u32,
}

/// Whether `payload_size`/`data_count` require the 8-byte extension:
/// caproto's rule is the 16-bit sentinel `0xFFFF` in the regular header's
/// payload-size slot, which only appears when either value doesn't fit.
pub fn needs_extended_header(payload_size: u32, data_count: u32) -> bool {
    payload_size > u16::MAX as u32 || data_count > u16::MAX as u32
}

impl Header {
    /// Encode this header, choosing the extended form if required.
    /// `protocol_version` gates it: extended headers don't exist before
    /// [`EXTENDED_MESSAGE_MIN_VERSION`], so a command that would need one is
    /// a caller error on older links, not a silent truncation.
    pub fn encode(&self, protocol_version: u16) -> Result<Vec<u8>, LocalProtocolError> {
        let extended = needs_extended_header(self.payload_size, self.data_count);
        if extended && protocol_version < EXTENDED_MESSAGE_MIN_VERSION {
            return Err(LocalProtocolError::new(format!(
                "command requires the extended header (protocol version \
                 {EXTENDED_MESSAGE_MIN_VERSION}+), but this link negotiated version {protocol_version}"
            )));
        }
        let raw = RawHeader {
            command: self.command,
            payload_size: if extended { SENTINEL_U16 } else { self.payload_size as u16 },
            data_type: self.data_type,
            data_count: if extended { 0 } else { self.data_count as u16 },
            parameter1: self.parameter1,
            parameter2: self.parameter2,
        };
        let mut out = raw.pack().map_err(LocalProtocolError::from)?.to_vec();
        if extended {
            let ext = RawExtendedHeader {
                payload_size: self.payload_size,
                data_count: self.data_count,
            };
            out.extend_from_slice(&ext.pack().map_err(LocalProtocolError::from)?);
        }
        Ok(out)
    }

    /// Try to decode a header from the front of `buf`. Returns the header
    /// plus the number of bytes it consumed (16 or 24), or
    /// [`DecodeOutcome::NeedData`] if `buf` doesn't yet hold a complete one.
    pub fn decode(buf: &[u8]) -> Result<DecodeOutcome<(Header, usize)>, RemoteProtocolError> {
        if buf.len() < HEADER_BYTES {
            return Ok(DecodeOutcome::NeedData);
        }
        let raw_bytes: [u8; HEADER_BYTES] = buf[..HEADER_BYTES].try_into().unwrap();
        let raw = RawHeader::unpack(&raw_bytes).map_err(RemoteProtocolError::from)?;

        let is_extended = raw.payload_size == SENTINEL_U16 && raw.data_count == 0;
        if !is_extended {
            return Ok(DecodeOutcome::Command((
                Header {
                    command: raw.command,
                    payload_size: raw.payload_size as u32,
                    data_type: raw.data_type,
                    data_count: raw.data_count as u32,
                    parameter1: raw.parameter1,
                    parameter2: raw.parameter2,
                },
                HEADER_BYTES,
            )));
        }

        if buf.len() < HEADER_BYTES + EXTENDED_HEADER_BYTES {
            return Ok(DecodeOutcome::NeedData);
        }
        let ext_bytes: [u8; EXTENDED_HEADER_BYTES] =
            buf[HEADER_BYTES..HEADER_BYTES + EXTENDED_HEADER_BYTES]
                .try_into()
                .unwrap();
        let ext = RawExtendedHeader::unpack(&ext_bytes).map_err(RemoteProtocolError::from)?;
        Ok(DecodeOutcome::Command((
            Header {
                command: raw.command,
                payload_size: ext.payload_size,
                data_type: raw.data_type,
                data_count: ext.data_count,
                parameter1: raw.parameter1,
                parameter2: raw.parameter2,
            },
            HEADER_BYTES + EXTENDED_HEADER_BYTES,
        )))
    }
}

/// Round a payload length up to the next 8-byte boundary. Every CA payload
/// is padded to a multiple of 8 bytes regardless of its declared size.
pub const fn pad_to_8(len: usize) -> usize {
    (len + 7) & !7
}
