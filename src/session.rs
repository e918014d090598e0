//! Per-socket session table
//!
//! A session is the protocol state for one peer of one local socket: an
//! optional sender half, an optional receiver half, or both (full duplex).
//! Peer identity is the IPv4 address and port.

use crate::receiver::ReceiverHalf;
use crate::sender::SenderHalf;
use std::collections::HashMap;
use std::net::SocketAddrV4;

/// Protocol state for one peer.
#[derive(Debug, Default)]
pub(crate) struct Session {
    pub sender: Option<SenderHalf>,
    pub receiver: Option<ReceiverHalf>,
}

impl Session {
    /// A session is finished when every half it has is finished. A socket
    /// close completes only once all its sessions are.
    pub fn finished(&self) -> bool {
        self.sender.as_ref().map_or(true, |s| s.finished)
            && self.receiver.as_ref().map_or(true, |r| r.finished)
    }
}

/// All sessions of one socket, keyed by peer address.
#[derive(Debug, Default)]
pub(crate) struct SessionTable {
    sessions: HashMap<SocketAddrV4, Session>,
}

impl SessionTable {
    pub fn get_mut(&mut self, peer: &SocketAddrV4) -> Option<&mut Session> {
        self.sessions.get_mut(peer)
    }

    /// Fetch the session for `peer`, creating an empty one when absent.
    pub fn get_or_insert(&mut self, peer: SocketAddrV4) -> &mut Session {
        self.sessions.entry(peer).or_default()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&SocketAddrV4, &mut Session)> {
        self.sessions.iter_mut()
    }

    /// `true` when every session is finished; vacuously true when empty.
    pub fn all_finished(&self) -> bool {
        self.sessions.values().all(Session::finished)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}
