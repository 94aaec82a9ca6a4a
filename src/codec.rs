//! Framing: turning raw bytes into [`Command`]s and back, for both
//! transports Channel Access uses.
//!
//! A UDP datagram holds a whole run of back-to-back commands (the
//! Broadcaster's `send`/`recv`, spec &sect;4.2); a TCP stream holds one
//! command at a time but may hand it to the caller split across several
//! reads (the VirtualCircuit's `recv`, spec &sect;4.3). [`read_datagram`]
//! and [`read_from_bytestream`] are the entry points for those two shapes;
//! everything above them (Broadcaster, VirtualCircuit) is sans-I/O and
//! just calls these against buffers the caller filled in.

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::commands::Command;
use crate::dbr::{native_type, ChannelType};
use crate::error::{DecodeOutcome, RemoteProtocolError};
use crate::header::{pad_to_8, Header};
use crate::role::Role;

/// Decode every command packed into one UDP datagram. A malformed header
/// or payload anywhere in the datagram fails the whole datagram — there's
/// no way to resynchronize mid-packet once framing is lost, so partial
/// results would be misleading.
///
/// `address` is the peer the datagram arrived from; it is not used to
/// decode anything (CA datagrams are self-contained) but is accepted so
/// a caller can be handed back a uniform signature with
/// [`crate::broadcaster::Broadcaster::recv`] regardless of transport.
pub fn read_datagram(
    bytes: &[u8],
    their_role: Role,
    _address: SocketAddr,
) -> Result<Vec<Command>, RemoteProtocolError> {
    let mut commands = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let (header, consumed) = match Header::decode(&bytes[offset..])? {
            DecodeOutcome::Command(pair) => pair,
            DecodeOutcome::NeedData => {
                return Err(RemoteProtocolError::new(
                    "datagram ends with a truncated header",
                ))
            }
        };
        offset += consumed;
        let payload_len = header.payload_size as usize;
        let padded_len = pad_to_8(payload_len);
        if bytes.len() < offset + padded_len {
            return Err(RemoteProtocolError::new(
                "datagram ends with a truncated payload",
            ));
        }
        let payload = &bytes[offset..offset + payload_len];
        commands.push(Command::decode(&header, payload, their_role)?);
        offset += padded_len;
    }
    Ok(commands)
}

/// Try to decode one command from the front of a TCP byte stream.
///
/// Returns the number of bytes consumed and the decoded command, or
/// [`DecodeOutcome::NeedData`] (consuming nothing) if `buf` doesn't yet
/// hold a complete command — the caller is expected to read more bytes,
/// append them, and call again (spec &sect;4.3, the `NEED_DATA` sentinel).
///
/// `channel_types` maps SID to the (data_type, data_count) last agreed
/// for that channel via `CreateChanResponse` (spec &sect;4.1). Any
/// SID-bearing request that declares a `data_type` whose native type
/// disagrees with what was actually negotiated is rejected here, before
/// the caller ever sees it — a malformed or malicious peer cannot claim
/// a DBR type for a channel it was never given.
pub fn read_from_bytestream(
    buf: &[u8],
    their_role: Role,
    channel_types: &HashMap<u32, (ChannelType, u32)>,
) -> Result<(usize, DecodeOutcome<Command>), RemoteProtocolError> {
    let (header, header_len) = match Header::decode(buf)? {
        DecodeOutcome::Command(pair) => pair,
        DecodeOutcome::NeedData => return Ok((0, DecodeOutcome::NeedData)),
    };
    let payload_len = header.payload_size as usize;
    let padded_len = pad_to_8(payload_len);
    if buf.len() < header_len + padded_len {
        return Ok((0, DecodeOutcome::NeedData));
    }
    let payload = &buf[header_len..header_len + payload_len];
    let command = Command::decode(&header, payload, their_role)?;
    validate_against_channel_types(&command, channel_types)?;
    Ok((header_len + padded_len, DecodeOutcome::Command(command)))
}

/// Reject a SID-bearing request whose declared `data_type` doesn't match
/// what was actually negotiated for that SID. Requests carry their sid
/// directly on the wire under this crate's field convention, so they can
/// be checked here; the `*NotifyResponse`/`EventAddResponse` variants
/// carry no sid (only an ioid/subscriptionid) and are instead checked by
/// [`crate::circuit::VirtualCircuit`], which can correlate them back to a
/// sid from commands it has itself sent.
fn validate_against_channel_types(
    command: &Command,
    channel_types: &HashMap<u32, (ChannelType, u32)>,
) -> Result<(), RemoteProtocolError> {
    let (sid, claimed_type) = match command {
        Command::ReadNotifyRequest { sid, data_type, .. }
        | Command::WriteRequest { sid, data_type, .. }
        | Command::WriteNotifyRequest { sid, data_type, .. }
        | Command::EventAddRequest { sid, data_type, .. }
        | Command::EventCancelRequest { sid, data_type, .. } => (*sid, *data_type),
        _ => return Ok(()),
    };
    if let Some((negotiated, _)) = channel_types.get(&sid) {
        if native_type(claimed_type) != native_type(*negotiated) {
            return Err(RemoteProtocolError::new(format!(
                "sid {sid}: command declares data type {claimed_type:?}, channel negotiated {negotiated:?}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_two_commands_from_one_datagram() {
        let version = Command::VersionRequest {
            priority: 0,
            protocol_version: 13,
        };
        let search = Command::SearchRequest {
            name: "TST:pv1".to_string(),
            cid: 1,
            protocol_version: 13,
            reply_required: true,
        };
        let mut bytes = version.encode(13).unwrap();
        bytes.extend(search.encode(13).unwrap());
        let commands = read_datagram(&bytes, Role::Client, "127.0.0.1:0".parse().unwrap()).unwrap();
        assert_eq!(commands, vec![version, search]);
    }

    #[test]
    fn bytestream_reports_need_data_on_partial_header() {
        let bytes = vec![0u8; 4];
        let (consumed, outcome) =
            read_from_bytestream(&bytes, Role::Client, &HashMap::new()).unwrap();
        assert_eq!(consumed, 0);
        assert_eq!(outcome, DecodeOutcome::NeedData);
    }

    #[test]
    fn bytestream_reports_need_data_on_partial_payload() {
        let command = Command::HostNameRequest {
            hostname: "ioc1".to_string(),
        };
        let full = command.encode(13).unwrap();
        let (consumed, outcome) =
            read_from_bytestream(&full[..full.len() - 1], Role::Client, &HashMap::new()).unwrap();
        assert_eq!(consumed, 0);
        assert_eq!(outcome, DecodeOutcome::NeedData);
    }

    #[test]
    fn bytestream_decodes_and_reports_consumed_length() {
        let command = Command::HostNameRequest {
            hostname: "ioc1".to_string(),
        };
        let full = command.encode(13).unwrap();
        let (consumed, outcome) =
            read_from_bytestream(&full, Role::Client, &HashMap::new()).unwrap();
        assert_eq!(consumed, full.len());
        assert_eq!(outcome, DecodeOutcome::Command(command));
    }

    #[test]
    fn bytestream_leaves_trailing_bytes_for_next_call() {
        let first = Command::EchoRequest.encode(13).unwrap();
        let second = Command::ReadSyncRequest.encode(13).unwrap();
        let mut buf = first.clone();
        buf.extend(second.clone());
        let (consumed, outcome) =
            read_from_bytestream(&buf, Role::Client, &HashMap::new()).unwrap();
        assert_eq!(consumed, first.len());
        assert_eq!(outcome, DecodeOutcome::Command(Command::EchoRequest));
        let (consumed2, outcome2) =
            read_from_bytestream(&buf[consumed..], Role::Client, &HashMap::new()).unwrap();
        assert_eq!(consumed2, second.len());
        assert_eq!(outcome2, DecodeOutcome::Command(Command::ReadSyncRequest));
    }

    #[test]
    fn bytestream_rejects_read_notify_request_with_mismatched_type() {
        let command = Command::ReadNotifyRequest {
            data_type: ChannelType::TimeInt,
            data_count: 1,
            sid: 7,
            ioid: 1,
        };
        let bytes = command.encode(13).unwrap();
        let mut channel_types = HashMap::new();
        channel_types.insert(7, (ChannelType::Double, 1));
        assert!(read_from_bytestream(&bytes, Role::Client, &channel_types).is_err());
    }

    #[test]
    fn bytestream_accepts_promoted_type_matching_negotiated_native_type() {
        let command = Command::ReadNotifyRequest {
            data_type: ChannelType::TimeDouble,
            data_count: 1,
            sid: 7,
            ioid: 1,
        };
        let bytes = command.encode(13).unwrap();
        let mut channel_types = HashMap::new();
        channel_types.insert(7, (ChannelType::Double, 1));
        let (_, outcome) = read_from_bytestream(&bytes, Role::Client, &channel_types).unwrap();
        assert_eq!(outcome, DecodeOutcome::Command(command));
    }
}
