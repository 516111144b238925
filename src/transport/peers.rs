use std::collections::HashMap;

use raft::message::ServerRef;

use super::connection::{ConnId, Connection};

/// State of our own connection to a peer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outbound {
    None,
    Pending,
    Working,
}

/// Snapshot of what links exist with one peer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConnectionState {
    pub inbound: bool,
    pub outbound: Outbound,
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState {
            inbound: false,
            outbound: Outbound::None,
        }
    }
}

/// At most one connection per peer in each direction, plus the id of an outbound connect still in flight.
#[derive(Debug, Default)]
pub struct PeerSlot {
    pub pending: Option<ConnId>,
    pub working: Option<Connection>,
    pub inbound: Option<Connection>,
}

impl PeerSlot {
    pub fn state(&self) -> ConnectionState {
        let outbound = match (&self.working, self.pending) {
            (Some(_), _) => Outbound::Working,
            (None, Some(_)) => Outbound::Pending,
            (None, None) => Outbound::None,
        };
        ConnectionState {
            inbound: self.inbound.is_some(),
            outbound,
        }
    }

    /// Whether a message could be sent now or soon without opening anything new.
    pub fn is_linked(&self) -> bool {
        self.inbound.is_some() || self.working.is_some() || self.pending.is_some()
    }

    fn close_all(&mut self) {
        self.pending = None;
        for conn in self.working.take().into_iter().chain(self.inbound.take()) {
            conn.close();
        }
    }
}

#[derive(Debug, Default)]
pub struct Peers {
    slots: HashMap<ServerRef, PeerSlot>,
}

impl Peers {
    pub fn slot(&mut self, peer: &ServerRef) -> &mut PeerSlot {
        self.slots.entry(peer.clone()).or_default()
    }

    pub fn state(&self, peer: &ServerRef) -> ConnectionState {
        self.slots
            .get(peer)
            .map(PeerSlot::state)
            .unwrap_or_default()
    }

    pub fn close_all(&mut self) {
        for slot in self.slots.values_mut() {
            slot.close_all();
        }
        self.slots.clear();
    }
}
