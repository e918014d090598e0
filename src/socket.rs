//! Socket object and application callback types

use crate::reactor::{Reactor, SocketId};
use crate::session::SessionTable;
use crate::stack::RudpStack;
use std::net::{SocketAddr, SocketAddrV4};

/// Lifecycle notifications delivered to the event handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RudpEvent {
    /// The retry ceiling was exceeded for a packet to the named peer. The
    /// session is left in place; the application decides what to do.
    Timeout,
    /// A requested close has completed and the socket is gone. Emitted
    /// exactly once per socket.
    Closed,
}

/// Callback invoked for every in-order payload. The borrowed bytes are only
/// valid for the duration of the call.
pub type DataHandler<R> = Box<dyn FnMut(&mut RudpStack<R>, SocketId, SocketAddrV4, &[u8])>;

/// Callback invoked for lifecycle events. The peer is the one involved in
/// the event when known.
pub type EventHandler<R> = Box<dyn FnMut(&mut RudpStack<R>, SocketId, RudpEvent, Option<SocketAddrV4>)>;

/// One bound RUDP endpoint: a datagram descriptor, its peer sessions, and
/// the registered application callbacks.
pub(crate) struct RudpSocket<R: Reactor> {
    pub id: SocketId,
    pub local_addr: SocketAddr,
    /// `close()` was called; resources are released once every session has
    /// both halves finished.
    pub close_requested: bool,
    pub sessions: SessionTable,
    pub data_handler: Option<DataHandler<R>>,
    pub event_handler: Option<EventHandler<R>>,
    /// Last peer touched by traffic, reported with `Closed`
    pub last_peer: Option<SocketAddrV4>,
}

impl<R: Reactor> RudpSocket<R> {
    pub fn new(id: SocketId, local_addr: SocketAddr) -> Self {
        Self {
            id,
            local_addr,
            close_requested: false,
            sessions: SessionTable::default(),
            data_handler: None,
            event_handler: None,
            last_peer: None,
        }
    }
}
