//! The UDP broadcaster: beacon reception, repeater registration, and PV
//! name search, correlated across unordered inbound commands rather than
//! a request/response pair on one connection (spec &sect;4.2).
//!
//! Grounded on `original_source/caproto/_broadcaster.py`'s `Broadcaster`
//! class: a sans-I/O object with `send`/`recv` bytes-in/bytes-out methods
//! and a `process_commands` step that updates `unanswered_searches` and
//! `registered`. The id-skipping search counter is [`crate::ids::IdCounter`].

use std::collections::HashMap;
use std::net::SocketAddr;

use tracing::{debug, trace, warn};

use crate::commands::Command;
use crate::error::{LocalProtocolError, RemoteProtocolError};
use crate::ids::{random_initial_value, IdCounter};
use crate::role::Role;

/// The UDP peer object. One per process, not per remote host: a single
/// `Broadcaster` multiplexes searches and beacons across every CA server
/// a client can see, and the equivalent server-side object answers every
/// search it's capable of answering.
pub struct Broadcaster {
    our_role: Role,
    their_role: Role,
    /// `strict` mirrors caproto's (currently disabled) validation that a
    /// `SearchRequest` must be preceded by a `VersionRequest` in the same
    /// datagram. Default is lenient, matching the upstream behavior this
    /// crate actually reproduces rather than the stricter behavior the
    /// comments in `_broadcaster.py` describe but don't enforce.
    strict: bool,
    search_id_counter: IdCounter,
    /// Search id -> PV name, for searches this peer has sent and is still
    /// waiting on a response for.
    unanswered_searches: HashMap<u32, String>,
    registered: bool,
}

impl Broadcaster {
    pub fn new(our_role: Role) -> Self {
        Broadcaster {
            our_role,
            their_role: our_role.opposite(),
            strict: false,
            search_id_counter: IdCounter::new(random_initial_value()),
            unanswered_searches: HashMap::new(),
            registered: false,
        }
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn our_role(&self) -> Role {
        self.our_role
    }

    pub fn registered(&self) -> bool {
        self.registered
    }

    /// Clear `registered`, e.g. after the repeater has gone away and a
    /// fresh `RepeaterRegisterRequest` is needed before searching again.
    pub fn disconnect(&mut self) {
        self.registered = false;
    }

    pub fn unanswered_searches_contains(&self, search_id: u32) -> bool {
        self.unanswered_searches.contains_key(&search_id)
    }

    /// Allocate a search id not already awaiting a response.
    pub fn new_search_id(&self) -> u32 {
        self.search_id_counter
            .next(|id| self.unanswered_searches.contains_key(&id))
    }

    /// Build a `RepeaterRegisterRequest` to send to the local repeater.
    /// Only a client registers; a server calling this is a caller error.
    pub fn register(&self, client_ip: u32) -> Result<Command, LocalProtocolError> {
        if self.our_role != Role::Client {
            return Err(LocalProtocolError::new(
                "only a client registers with the repeater",
            ));
        }
        Ok(Command::RepeaterRegisterRequest { client_ip })
    }

    /// Build a `SearchRequest` for `name`, remembering its search id so a
    /// later `SearchResponse`/`NotFoundResponse` can be matched back to it.
    pub fn search(
        &mut self,
        name: impl Into<String>,
        protocol_version: u16,
        reply_required: bool,
    ) -> Result<Command, LocalProtocolError> {
        if self.our_role != Role::Client {
            return Err(LocalProtocolError::new(
                "only a client sends SearchRequest",
            ));
        }
        let name = name.into();
        let cid = self.new_search_id();
        self.unanswered_searches.insert(cid, name.clone());
        trace!(cid, name = %name, "search request queued");
        Ok(Command::SearchRequest {
            name,
            cid,
            protocol_version,
            reply_required,
        })
    }

    /// Serialize a run of outbound commands into one datagram.
    pub fn send(
        &mut self,
        commands: &[Command],
        protocol_version: u16,
    ) -> Result<Vec<u8>, LocalProtocolError> {
        let mut out = Vec::new();
        for command in commands {
            out.extend(
                command
                    .encode(protocol_version)
                    .map_err(|e| LocalProtocolError::new(e.to_string()))?,
            );
        }
        Ok(out)
    }

    /// Decode one inbound datagram into its commands without updating any
    /// state — call [`Broadcaster::process_commands`] afterward to apply
    /// their effects. Split the same way `VirtualCircuit::recv` is, so a
    /// caller can inspect commands before committing to them.
    pub fn recv(
        &self,
        bytes: &[u8],
        from: SocketAddr,
    ) -> Result<Vec<Command>, RemoteProtocolError> {
        crate::codec::read_datagram(bytes, self.their_role, from)
    }

    /// Apply the effects of commands already produced by [`recv`]:
    /// resolve searches, note repeater confirmation, and (in `strict`
    /// mode) reject a `SearchRequest` datagram that never opened with a
    /// `VersionRequest`.
    pub fn process_commands(&mut self, commands: &[Command]) -> Result<(), RemoteProtocolError> {
        if self.strict {
            let opened_with_version = matches!(commands.first(), Some(Command::VersionRequest { .. }));
            let has_search = commands
                .iter()
                .any(|c| matches!(c, Command::SearchRequest { .. }));
            if has_search && !opened_with_version {
                return Err(RemoteProtocolError::new(
                    "SearchRequest datagram must open with a VersionRequest",
                ));
            }
        }

        for command in commands {
            match command {
                Command::RepeaterConfirmResponse { .. } => {
                    self.registered = true;
                    debug!("repeater registration confirmed");
                }
                Command::SearchResponse { cid, .. } => {
                    if let Some(name) = self.unanswered_searches.remove(cid) {
                        trace!(cid, name = %name, "search resolved");
                    } else {
                        warn!(cid, "SearchResponse for unknown search id");
                    }
                }
                Command::NotFoundResponse { cid, .. } => {
                    self.unanswered_searches.remove(cid);
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_id_is_not_reused_while_unanswered() {
        let mut broadcaster = Broadcaster::new(Role::Client);
        let Command::SearchRequest { cid: first, .. } =
            broadcaster.search("TST:pv1", 13, true).unwrap()
        else {
            unreachable!()
        };
        let Command::SearchRequest { cid: second, .. } =
            broadcaster.search("TST:pv2", 13, true).unwrap()
        else {
            unreachable!()
        };
        assert_ne!(first, second);
    }

    #[test]
    fn search_response_resolves_the_search() {
        let mut broadcaster = Broadcaster::new(Role::Client);
        let Command::SearchRequest { cid, .. } = broadcaster.search("TST:pv1", 13, true).unwrap()
        else {
            unreachable!()
        };
        assert!(broadcaster.unanswered_searches.contains_key(&cid));
        broadcaster
            .process_commands(&[Command::SearchResponse {
                port: 5064,
                cid,
                server_protocol_version: 13,
                address: 0,
            }])
            .unwrap();
        assert!(!broadcaster.unanswered_searches.contains_key(&cid));
    }

    #[test]
    fn repeater_confirm_sets_registered() {
        let mut broadcaster = Broadcaster::new(Role::Client);
        assert!(!broadcaster.registered());
        broadcaster
            .process_commands(&[Command::RepeaterConfirmResponse {
                repeater_address: 0,
            }])
            .unwrap();
        assert!(broadcaster.registered());
    }

    #[test]
    fn disconnect_clears_registered() {
        let mut broadcaster = Broadcaster::new(Role::Client);
        broadcaster
            .process_commands(&[Command::RepeaterConfirmResponse {
                repeater_address: 0,
            }])
            .unwrap();
        assert!(broadcaster.registered());
        broadcaster.disconnect();
        assert!(!broadcaster.registered());
    }

    #[test]
    fn server_cannot_send_search_request() {
        let mut broadcaster = Broadcaster::new(Role::Server);
        assert!(broadcaster.search("TST:pv1", 13, true).is_err());
    }

    #[test]
    fn strict_mode_rejects_bare_search_request() {
        let mut broadcaster = Broadcaster::new(Role::Server).with_strict(true);
        let search = Command::SearchRequest {
            name: "TST:pv1".to_string(),
            cid: 1,
            protocol_version: 13,
            reply_required: true,
        };
        assert!(broadcaster.process_commands(&[search]).is_err());
    }
}
