//! A single PV's state machine within a [`crate::circuit::VirtualCircuit`].
//!
//! Grounded on `original_source/caproto/_circuit.py`'s `ClientChannel`/
//! `ServerChannel`: a thin, mostly-data object whose methods build
//! commands without mutating anything — the owning `VirtualCircuit` is
//! what actually tracks and mutates state, once a command has been
//! validated and encoded, the same division of labor the teacher's
//! `ResourceRecord` types have from `servers.rs`.

use std::collections::HashMap;

use crate::commands::{AccessRights, Command};
use crate::dbr::ChannelType;
use crate::error::LocalProtocolError;
use crate::role::Role;

/// Where a channel sits in its create/use/destroy lifecycle (spec
/// &sect;3, Channel lifecycle). Client and server see almost the same
/// states; `MUST_CLOSE` only makes sense client-side (a server simply
/// drops the channel once it has sent `ServerDisconnResponse`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    SendCreateChanRequest,
    AwaitCreateChanResponse,
    Connected,
    MustClose,
    Closed,
    Disconnected,
}

/// What was actually negotiated for one open subscription: the
/// `EventAddRequest`'s own `data_type`/`data_count`/`mask`, recorded so a
/// later `EventAddResponse` can be checked against it instead of assumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub data_type: ChannelType,
    pub data_count: u32,
    pub mask: u16,
}

/// One PV as seen from one side of a [`crate::circuit::VirtualCircuit`].
#[derive(Debug, Clone)]
pub struct Channel {
    pub cid: u32,
    pub name: String,
    pub sid: Option<u32>,
    pub native_data_type: Option<ChannelType>,
    pub native_data_count: Option<u32>,
    pub access_rights: Option<AccessRights>,
    pub state: ChannelState,
    our_role: Role,
    subscriptions: HashMap<u32, SubscriptionInfo>,
}

impl Channel {
    pub fn new(cid: u32, name: impl Into<String>, our_role: Role) -> Self {
        Channel {
            cid,
            name: name.into(),
            sid: None,
            native_data_type: None,
            native_data_count: None,
            access_rights: None,
            state: ChannelState::SendCreateChanRequest,
            our_role,
            subscriptions: HashMap::new(),
        }
    }

    pub fn subscriptionids(&self) -> Vec<u32> {
        self.subscriptions.keys().copied().collect()
    }

    pub fn has_subscription(&self, subscriptionid: u32) -> bool {
        self.subscriptions.contains_key(&subscriptionid)
    }

    pub fn subscription(&self, subscriptionid: u32) -> Option<&SubscriptionInfo> {
        self.subscriptions.get(&subscriptionid)
    }

    /// Record a subscription's negotiated parameters. Called by
    /// `VirtualCircuit::apply` once an `EventAddRequest` has actually been
    /// sent — not by [`Channel::subscribe`] itself, which only builds the
    /// command.
    pub(crate) fn track_subscription(&mut self, subscriptionid: u32, info: SubscriptionInfo) {
        self.subscriptions.insert(subscriptionid, info);
    }

    /// Forget a subscription. Called by `VirtualCircuit::apply` once an
    /// `EventCancelRequest` has actually been sent.
    pub(crate) fn untrack_subscription(&mut self, subscriptionid: u32) {
        self.subscriptions.remove(&subscriptionid);
    }

    fn require_connected(&self) -> Result<u32, LocalProtocolError> {
        if self.state != ChannelState::Connected {
            return Err(LocalProtocolError::new(format!(
                "channel {} (cid {}) is not connected (state {:?})",
                self.name, self.cid, self.state
            )));
        }
        self.sid
            .ok_or_else(|| LocalProtocolError::new("connected channel has no sid"))
    }

    /// Build the `CreateChanRequest` that opens this channel. Only legal
    /// from `SEND_CREATE_CHAN_REQUEST`, and only for a client. Pure: does
    /// not transition `state` itself — hand the result to
    /// [`crate::circuit::VirtualCircuit::send`] to do that.
    pub fn create(&self, protocol_version: u16) -> Result<Command, LocalProtocolError> {
        if self.our_role != Role::Client {
            return Err(LocalProtocolError::new("only a client creates a channel"));
        }
        if self.state != ChannelState::SendCreateChanRequest {
            return Err(LocalProtocolError::new(format!(
                "cannot send CreateChanRequest from state {:?}",
                self.state
            )));
        }
        Ok(Command::CreateChanRequest {
            name: self.name.clone(),
            cid: self.cid,
            protocol_version,
        })
    }

    /// Build the `ClearChannelRequest`/`ClearChannelResponse` that closes
    /// this channel, per `our_role`. Pure.
    pub fn clear(&self) -> Result<Command, LocalProtocolError> {
        let sid = self.require_connected()?;
        Ok(match self.our_role {
            Role::Client => Command::ClearChannelRequest { cid: self.cid, sid },
            Role::Server => Command::ClearChannelResponse { cid: self.cid, sid },
        })
    }

    /// Build the `ServerDisconnResponse` a server uses to tear this
    /// channel down unilaterally (e.g. on an IOC reboot), distinct from
    /// the client-initiated `ClearChannelRequest`/`ClearChannelResponse`
    /// exchange that [`Channel::clear`] builds (spec &sect;3: `CONNECTED`
    /// -> `DISCONNECTED` vs. -> `CLOSED`). Pure.
    pub fn disconnect(&self) -> Result<Command, LocalProtocolError> {
        if self.our_role != Role::Server {
            return Err(LocalProtocolError::new(
                "only a server sends ServerDisconnResponse",
            ));
        }
        Ok(Command::ServerDisconnResponse { cid: self.cid })
    }

    /// Build a `ReadNotifyRequest` for this channel's current value. Pure.
    pub fn read(&self, data_type: ChannelType, data_count: u32, ioid: u32) -> Result<Command, LocalProtocolError> {
        let sid = self.require_connected()?;
        Ok(Command::ReadNotifyRequest {
            data_type,
            data_count,
            sid,
            ioid,
        })
    }

    /// Build a `WriteNotifyRequest` for this channel with `payload` already
    /// encoded by the caller (via [`crate::dbr::DbrPayload`]). Pure.
    pub fn write(
        &self,
        data_type: ChannelType,
        data_count: u32,
        ioid: u32,
        payload: crate::dbr::DbrPayload,
    ) -> Result<Command, LocalProtocolError> {
        let sid = self.require_connected()?;
        Ok(Command::WriteNotifyRequest {
            data_type,
            data_count,
            sid,
            ioid,
            payload,
        })
    }

    /// Build an `EventAddRequest` subscribing to this channel. Pure: does
    /// not record the subscription itself — [`crate::circuit::VirtualCircuit::apply`]
    /// does that via `track_subscription` once the request has actually
    /// been sent (spec &sect;4.4: command builders have no side effects).
    pub fn subscribe(
        &self,
        data_type: ChannelType,
        data_count: u32,
        subscriptionid: u32,
        mask: u16,
    ) -> Result<Command, LocalProtocolError> {
        let sid = self.require_connected()?;
        Ok(Command::EventAddRequest {
            data_type,
            data_count,
            sid,
            subscriptionid,
            mask,
        })
    }

    /// Build an `EventCancelRequest` for a subscription this channel
    /// actually holds. Pure.
    pub fn unsubscribe(
        &self,
        data_type: ChannelType,
        subscriptionid: u32,
    ) -> Result<Command, LocalProtocolError> {
        let sid = self.require_connected()?;
        if !self.subscriptions.contains_key(&subscriptionid) {
            return Err(LocalProtocolError::new(format!(
                "subscription {subscriptionid} does not belong to channel {}",
                self.name
            )));
        }
        Ok(Command::EventCancelRequest {
            data_type,
            sid,
            subscriptionid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_does_not_mutate_state() {
        let channel = Channel::new(1, "TST:pv1", Role::Client);
        channel.create(13).unwrap();
        assert_eq!(channel.state, ChannelState::SendCreateChanRequest);
    }

    #[test]
    fn read_before_connected_is_rejected() {
        let channel = Channel::new(1, "TST:pv1", Role::Client);
        assert!(channel.read(ChannelType::Double, 1, 5).is_err());
    }

    #[test]
    fn unsubscribe_unknown_id_is_rejected() {
        let mut channel = Channel::new(1, "TST:pv1", Role::Client);
        channel.state = ChannelState::Connected;
        channel.sid = Some(99);
        assert!(channel.unsubscribe(ChannelType::Double, 42).is_err());
    }

    #[test]
    fn subscribe_builds_command_without_recording_it() {
        let mut channel = Channel::new(1, "TST:pv1", Role::Client);
        channel.state = ChannelState::Connected;
        channel.sid = Some(99);
        channel.subscribe(ChannelType::Double, 1, 42, 1).unwrap();
        assert!(channel.subscriptionids().is_empty());
    }

    #[test]
    fn track_and_untrack_subscription_round_trip() {
        let mut channel = Channel::new(1, "TST:pv1", Role::Client);
        channel.state = ChannelState::Connected;
        channel.sid = Some(99);
        channel.track_subscription(
            42,
            SubscriptionInfo {
                data_type: ChannelType::Double,
                data_count: 1,
                mask: 1,
            },
        );
        assert_eq!(channel.subscriptionids(), vec![42]);
        channel.unsubscribe(ChannelType::Double, 42).unwrap();
        channel.untrack_subscription(42);
        assert!(channel.subscriptionids().is_empty());
    }

    #[test]
    fn only_server_disconnects() {
        let client_channel = Channel::new(1, "TST:pv1", Role::Client);
        assert!(client_channel.disconnect().is_err());

        let mut server_channel = Channel::new(1, "TST:pv1", Role::Server);
        server_channel.state = ChannelState::Connected;
        server_channel.sid = Some(7);
        assert!(server_channel.disconnect().is_ok());
    }
}
