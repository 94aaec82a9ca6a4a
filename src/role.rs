//! Peer roles. A [`Role`] is CLIENT or SERVER; every peer object tracks both
//! its own role and the role of the thing on the other end of the wire.

/// Which side of a Channel Access conversation a peer is playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// The role of whoever is on the other end of the wire from a peer with
    /// this role.
    pub fn opposite(self) -> Role {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }
}
