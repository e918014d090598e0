//! Shared test harness: a deterministic in-memory reactor
//!
//! [`SimNet`] is a virtual network with a shared clock: datagrams between
//! bound endpoints are delivered instantly (or dropped by scripted rules),
//! timers fire in deadline order, and every transmission is recorded in a
//! wire trace the tests assert against. Each [`RudpStack`] under test gets
//! its own [`SimReactor`] handle onto the shared net; the [`pump`] driver
//! steps whichever stack owns the next event until the whole network goes
//! quiet.

#![allow(dead_code)]

use rudp_tokio::wire::{PacketType, RudpPacket};
use rudp_tokio::{Event, Reactor, RudpEvent, RudpStack, SocketId, TimerHandle, TimerToken};

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::rc::Rc;
use std::time::Duration;

/// One datagram handed to the virtual network, kept for trace assertions.
#[derive(Debug, Clone)]
pub struct SentPacket {
    pub at_ms: u64,
    pub from: SocketAddrV4,
    pub to: SocketAddrV4,
    pub ptype: Option<PacketType>,
    pub seqno: u32,
    pub payload_len: usize,
    /// Suppressed by a drop rule or sent to an unbound address
    pub dropped: bool,
}

/// Scripted loss: drop `remaining` datagrams matching the filters, after
/// letting `skip` matching ones through first.
#[derive(Debug, Clone)]
pub struct DropRule {
    pub from: Option<SocketAddrV4>,
    pub ptype: Option<PacketType>,
    pub seqno: Option<u32>,
    pub skip: u32,
    pub remaining: u32,
}

impl DropRule {
    pub fn all_of(ptype: PacketType) -> Self {
        Self {
            from: None,
            ptype: Some(ptype),
            seqno: None,
            skip: 0,
            remaining: u32::MAX,
        }
    }

    /// Drop the `nth` (1-based) datagram of `ptype`.
    pub fn nth_of(ptype: PacketType, nth: u32) -> Self {
        Self {
            from: None,
            ptype: Some(ptype),
            seqno: None,
            skip: nth - 1,
            remaining: 1,
        }
    }

    fn matches(&self, packet: &SentPacket) -> bool {
        self.from.map_or(true, |from| from == packet.from)
            && self.ptype.map_or(true, |t| Some(t) == packet.ptype)
            && self.seqno.map_or(true, |s| s == packet.seqno)
    }
}

struct Endpoint {
    addr: SocketAddrV4,
    owner: usize,
    watched: bool,
    queue: VecDeque<(SocketAddrV4, Vec<u8>)>,
}

struct SimTimer {
    deadline_ms: u64,
    handle: TimerHandle,
    token: TimerToken,
    owner: usize,
}

#[derive(Default)]
struct NetState {
    now_ms: u64,
    next_socket: u64,
    next_timer: u64,
    next_port: u16,
    endpoints: BTreeMap<SocketId, Endpoint>,
    timers: Vec<SimTimer>,
    drops: Vec<DropRule>,
    trace: Vec<SentPacket>,
}

impl NetState {
    fn endpoint_by_addr(&mut self, addr: SocketAddrV4) -> Option<&mut Endpoint> {
        self.endpoints.values_mut().find(|ep| ep.addr == addr)
    }

    fn should_drop(&mut self, packet: &SentPacket) -> bool {
        for rule in self.drops.iter_mut() {
            if !rule.matches(packet) {
                continue;
            }
            if rule.skip > 0 {
                rule.skip -= 1;
                continue;
            }
            if rule.remaining > 0 {
                rule.remaining -= 1;
                return true;
            }
        }
        false
    }
}

/// Cloneable handle to the shared virtual network.
#[derive(Clone, Default)]
pub struct SimNet {
    inner: Rc<RefCell<NetState>>,
}

impl SimNet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a reactor handle for the stack at index `owner` (the index
    /// used with [`pump`]).
    pub fn reactor(&self, owner: usize) -> SimReactor {
        SimReactor {
            net: self.inner.clone(),
            owner,
        }
    }

    /// Install a scripted loss rule.
    pub fn add_drop_rule(&self, rule: DropRule) {
        self.inner.borrow_mut().drops.push(rule);
    }

    /// Current virtual time in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.inner.borrow().now_ms
    }

    /// Snapshot of every datagram offered to the network so far.
    pub fn trace(&self) -> Vec<SentPacket> {
        self.inner.borrow().trace.clone()
    }

    /// Datagrams of `ptype` that actually went out (not dropped).
    pub fn delivered_of(&self, ptype: PacketType) -> Vec<SentPacket> {
        self.trace()
            .into_iter()
            .filter(|p| p.ptype == Some(ptype) && !p.dropped)
            .collect()
    }

    /// All transmissions of `ptype`, dropped or not.
    pub fn sent_of(&self, ptype: PacketType) -> Vec<SentPacket> {
        self.trace()
            .into_iter()
            .filter(|p| p.ptype == Some(ptype))
            .collect()
    }

    /// Queue a raw datagram at the endpoint bound to `to`, bypassing the
    /// drop rules and the trace. For malformed-input tests.
    pub fn inject_raw(&self, from: SocketAddrV4, to: SocketAddrV4, bytes: &[u8]) {
        let mut net = self.inner.borrow_mut();
        if let Some(endpoint) = net.endpoint_by_addr(to) {
            endpoint.queue.push_back((from, bytes.to_vec()));
        }
    }

    /// Advance the simulation to its next event and say which stack owns
    /// it. Queued datagrams win over timers; time only moves when nothing
    /// is deliverable now.
    fn advance(&self) -> Option<usize> {
        let mut net = self.inner.borrow_mut();

        for endpoint in net.endpoints.values() {
            if endpoint.watched && !endpoint.queue.is_empty() {
                return Some(endpoint.owner);
            }
        }

        let next = net
            .timers
            .iter()
            .min_by_key(|t| (t.deadline_ms, t.handle))
            .map(|t| (t.deadline_ms, t.owner))?;
        net.now_ms = net.now_ms.max(next.0);
        Some(next.1)
    }
}

/// Step whichever stack owns the next event until the network quiesces.
pub fn pump(net: &SimNet, stacks: &mut [&mut RudpStack<SimReactor>]) {
    for _ in 0..100_000 {
        let Some(owner) = net.advance() else {
            return;
        };
        stacks[owner]
            .step()
            .unwrap_or_else(|err| panic!("stack {owner} failed: {err}"));
    }
    panic!("simulation did not quiesce");
}

/// Per-stack [`Reactor`] handle onto a shared [`SimNet`].
pub struct SimReactor {
    net: Rc<RefCell<NetState>>,
    owner: usize,
}

impl Reactor for SimReactor {
    fn bind(&mut self, port: u16) -> io::Result<SocketId> {
        let mut net = self.net.borrow_mut();

        let port = if port == 0 {
            net.next_port += 1;
            40_000 + net.next_port
        } else {
            port
        };
        let addr = SocketAddrV4::new(Ipv4Addr::LOCALHOST, port);
        if net.endpoints.values().any(|ep| ep.addr == addr) {
            return Err(io::Error::new(io::ErrorKind::AddrInUse, "port in use"));
        }

        net.next_socket += 1;
        let id = SocketId::from_raw(net.next_socket);
        net.endpoints.insert(
            id,
            Endpoint {
                addr,
                owner: self.owner,
                watched: false,
                queue: VecDeque::new(),
            },
        );
        Ok(id)
    }

    fn unbind(&mut self, sock: SocketId) {
        self.net.borrow_mut().endpoints.remove(&sock);
    }

    fn register_readable(&mut self, sock: SocketId) -> io::Result<()> {
        let mut net = self.net.borrow_mut();
        let endpoint = net
            .endpoints
            .get_mut(&sock)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such socket"))?;
        endpoint.watched = true;
        Ok(())
    }

    fn unregister_readable(&mut self, sock: SocketId) {
        if let Some(endpoint) = self.net.borrow_mut().endpoints.get_mut(&sock) {
            endpoint.watched = false;
        }
    }

    fn schedule_timer(&mut self, after: Duration, token: TimerToken) -> TimerHandle {
        let mut net = self.net.borrow_mut();
        net.next_timer += 1;
        let handle = TimerHandle::from_raw(net.next_timer);
        let deadline_ms = net.now_ms + after.as_millis() as u64;
        let owner = self.owner;
        net.timers.push(SimTimer {
            deadline_ms,
            handle,
            token,
            owner,
        });
        handle
    }

    fn cancel_timer(&mut self, handle: TimerHandle) {
        self.net
            .borrow_mut()
            .timers
            .retain(|timer| timer.handle != handle);
    }

    fn send_to(&mut self, sock: SocketId, buf: &[u8], peer: SocketAddr) -> io::Result<usize> {
        let mut net = self.net.borrow_mut();
        let from = net
            .endpoints
            .get(&sock)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such socket"))?
            .addr;
        let SocketAddr::V4(to) = peer else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "IPv6 unsupported",
            ));
        };

        let decoded = RudpPacket::decode(buf);
        let mut record = SentPacket {
            at_ms: net.now_ms,
            from,
            to,
            ptype: decoded.as_ref().and_then(RudpPacket::packet_type),
            seqno: decoded.as_ref().map_or(0, |p| p.header.seqno),
            payload_len: decoded.as_ref().map_or(0, |p| p.payload.len()),
            dropped: false,
        };

        record.dropped = net.should_drop(&record);
        if !record.dropped {
            match net.endpoint_by_addr(to) {
                Some(endpoint) => endpoint.queue.push_back((from, buf.to_vec())),
                None => record.dropped = true,
            }
        }

        net.trace.push(record);
        Ok(buf.len())
    }

    fn recv_from(&mut self, sock: SocketId, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut net = self.net.borrow_mut();
        let endpoint = net
            .endpoints
            .get_mut(&sock)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such socket"))?;
        let (from, datagram) = endpoint
            .queue
            .pop_front()
            .ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))?;

        let len = datagram.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram[..len]);
        Ok((len, SocketAddr::V4(from)))
    }

    fn local_addr(&self, sock: SocketId) -> io::Result<SocketAddr> {
        let net = self.net.borrow();
        let endpoint = net
            .endpoints
            .get(&sock)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such socket"))?;
        Ok(SocketAddr::V4(endpoint.addr))
    }

    fn poll(&mut self) -> io::Result<Option<Event>> {
        let mut net = self.net.borrow_mut();
        let owner = self.owner;

        for (id, endpoint) in net.endpoints.iter() {
            if endpoint.owner == owner && endpoint.watched && !endpoint.queue.is_empty() {
                return Ok(Some(Event::Readable(*id)));
            }
        }

        let now = net.now_ms;
        let due = net
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.owner == owner && t.deadline_ms <= now)
            .min_by_key(|(_, t)| (t.deadline_ms, t.handle))
            .map(|(i, _)| i);
        if let Some(index) = due {
            let timer = net.timers.remove(index);
            return Ok(Some(Event::Timer {
                handle: timer.handle,
                token: timer.token,
            }));
        }

        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Handler recording helpers
// ---------------------------------------------------------------------------

pub type Deliveries = Rc<RefCell<Vec<(SocketAddrV4, Vec<u8>)>>>;
pub type Events = Rc<RefCell<Vec<(RudpEvent, Option<SocketAddrV4>)>>>;

/// Register a data handler that appends every delivery to a shared log.
pub fn record_data(stack: &mut RudpStack<SimReactor>, sock: SocketId) -> Deliveries {
    let log: Deliveries = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    stack
        .set_data_handler(sock, move |_, _, peer, bytes| {
            sink.borrow_mut().push((peer, bytes.to_vec()));
        })
        .expect("data handler");
    log
}

/// Register an event handler that appends every event to a shared log.
pub fn record_events(stack: &mut RudpStack<SimReactor>, sock: SocketId) -> Events {
    let log: Events = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    stack
        .set_event_handler(sock, move |_, _, event, peer| {
            sink.borrow_mut().push((event, peer));
        })
        .expect("event handler");
    log
}

/// Build a stack on a fresh reactor handle for slot `owner` of `net`.
pub fn sim_stack(net: &SimNet, owner: usize) -> RudpStack<SimReactor> {
    RudpStack::new(net.reactor(owner), rudp_tokio::RudpConfig::default()).expect("stack")
}

/// Peer address helper: the IPv4 form of a stack's local address.
pub fn v4(addr: SocketAddr) -> SocketAddrV4 {
    match addr {
        SocketAddr::V4(addr) => addr,
        SocketAddr::V6(addr) => panic!("unexpected IPv6 address {addr}"),
    }
}
