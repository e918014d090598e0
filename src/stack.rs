//! The RUDP engine: socket table, public API, and packet dispatch
//!
//! [`RudpStack`] owns every socket bound through it, the reactor driving
//! them, the RNG for initial sequence numbers, and the traffic counters.
//! All state mutation happens inside [`RudpStack::run`]'s dispatch of
//! reactor events or inside API calls made from the same thread; there is
//! no locking anywhere.
//!
//! Application callbacks receive `&mut RudpStack` and may re-enter the API
//! (send more data, request a close). While a callback runs it temporarily
//! owns its handler slot, so replacing a handler from within itself works.

use crate::config::RudpConfig;
use crate::error::{Result, RudpError};
use crate::metrics::StackMetrics;
use crate::reactor::{Event, Reactor, SocketId, TimerHandle, TimerKind, TimerToken};
use crate::receiver::{DataVerdict, ReceiverHalf, ReceiverState};
use crate::sender::{SenderHalf, SenderState};
use crate::socket::{RudpEvent, RudpSocket};
use crate::wire::{constants, PacketType, RudpHeader, RudpPacket, SeqNum};

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use tracing::{debug, info, trace, warn};

/// A multiplexing RUDP endpoint engine over a [`Reactor`].
pub struct RudpStack<R: Reactor> {
    reactor: R,
    config: RudpConfig,
    sockets: HashMap<SocketId, RudpSocket<R>>,
    rng: StdRng,
    metrics: StackMetrics,
}

/// Transmit one packet and, for SYN/DATA/FIN, arm its retransmission timer.
///
/// Send failures are logged and otherwise ignored: the armed timer retries.
/// The loss simulation also suppresses the datagram but keeps the timer, so
/// a "lost" packet recovers the same way a really lost one does.
fn transmit<R: Reactor>(
    reactor: &mut R,
    metrics: &mut StackMetrics,
    rng: &mut StdRng,
    config: &RudpConfig,
    sock: SocketId,
    peer: SocketAddrV4,
    packet: &RudpPacket,
) -> Option<TimerHandle> {
    debug!(
        sock = %sock,
        peer = %peer,
        ptype = packet.header.type_str(),
        seqno = packet.header.seqno,
        "sending packet"
    );

    let simulate_drop = config.loss_interval > 0 && rng.gen_range(0..config.loss_interval) == 0;
    if simulate_drop {
        metrics.simulated_drops += 1;
        debug!(sock = %sock, peer = %peer, "datagram suppressed by loss simulation");
    } else {
        let wire = packet.to_bytes();
        match reactor.send_to(sock, &wire, SocketAddr::V4(peer)) {
            Ok(_) => {
                metrics.packets_sent += 1;
                metrics.bytes_sent += packet.payload.len() as u64;
            }
            Err(err) => {
                warn!(sock = %sock, peer = %peer, %err, "datagram send failed");
            }
        }
    }

    let kind = match packet.packet_type() {
        Some(PacketType::Syn) => TimerKind::Syn,
        Some(PacketType::Fin) => TimerKind::Fin,
        Some(PacketType::Data) => TimerKind::Data(packet.header.seqno),
        _ => return None,
    };
    Some(reactor.schedule_timer(
        config.retransmit_timeout,
        TimerToken {
            socket: sock,
            peer,
            kind,
        },
    ))
}

impl<R: Reactor> RudpStack<R> {
    /// Create a stack over `reactor`, validating the configuration.
    pub fn new(reactor: R, config: RudpConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            reactor,
            config,
            sockets: HashMap::new(),
            rng: StdRng::from_entropy(),
            metrics: StackMetrics::default(),
        })
    }

    /// Bind a UDP endpoint on `port` (0 picks an ephemeral port) and start
    /// watching it for inbound datagrams.
    pub fn open(&mut self, port: u16) -> Result<SocketId> {
        let id = self.reactor.bind(port)?;
        if let Err(err) = self.reactor.register_readable(id) {
            self.reactor.unbind(id);
            return Err(err.into());
        }
        let local_addr = match self.reactor.local_addr(id) {
            Ok(addr) => addr,
            Err(err) => {
                self.reactor.unbind(id);
                return Err(err.into());
            }
        };

        info!(sock = %id, local = %local_addr, "socket opened");
        self.sockets.insert(id, RudpSocket::new(id, local_addr));
        Ok(id)
    }

    /// Local address of a bound socket.
    pub fn local_addr(&self, sock: SocketId) -> Result<SocketAddr> {
        self.sockets
            .get(&sock)
            .map(|socket| socket.local_addr)
            .ok_or(RudpError::UnknownSocket)
    }

    /// Number of live sockets.
    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    /// Traffic and drop counters.
    pub fn metrics(&self) -> &StackMetrics {
        &self.metrics
    }

    /// Register the callback for in-order payloads on `sock`.
    pub fn set_data_handler<F>(&mut self, sock: SocketId, handler: F) -> Result<()>
    where
        F: FnMut(&mut RudpStack<R>, SocketId, SocketAddrV4, &[u8]) + 'static,
    {
        let socket = self.sockets.get_mut(&sock).ok_or(RudpError::UnknownSocket)?;
        socket.data_handler = Some(Box::new(handler));
        Ok(())
    }

    /// Register the callback for lifecycle events on `sock`.
    pub fn set_event_handler<F>(&mut self, sock: SocketId, handler: F) -> Result<()>
    where
        F: FnMut(&mut RudpStack<R>, SocketId, RudpEvent, Option<SocketAddrV4>) + 'static,
    {
        let socket = self.sockets.get_mut(&sock).ok_or(RudpError::UnknownSocket)?;
        socket.event_handler = Some(Box::new(handler));
        Ok(())
    }

    /// Queue one application datagram for reliable in-order delivery to
    /// `peer`. The first send to a new peer creates the sender session and
    /// transmits its SYN. Never blocks.
    pub fn send_to(&mut self, sock: SocketId, data: &[u8], peer: SocketAddr) -> Result<()> {
        if data.len() > constants::RUDP_MAX_PAYLOAD {
            return Err(RudpError::PayloadTooLarge {
                len: data.len(),
                max: constants::RUDP_MAX_PAYLOAD,
            });
        }
        let SocketAddr::V4(peer) = peer else {
            return Err(RudpError::UnsupportedAddress { addr: peer });
        };

        let socket = self.sockets.get_mut(&sock).ok_or(RudpError::UnknownSocket)?;
        if socket.close_requested {
            return Err(RudpError::SocketClosing);
        }
        socket.last_peer = Some(peer);

        let payload = Bytes::copy_from_slice(data);
        let session = socket.sessions.get_or_insert(peer);
        match session.sender.as_mut() {
            None => {
                let mut sender = SenderHalf::new(self.rng.gen::<SeqNum>());
                sender.queue.push_back(payload);
                trace!(sock = %sock, peer = %peer, seqno = sender.initial_seqno, "created sender session");

                let syn = sender.syn_packet();
                sender.syn_timer = transmit(
                    &mut self.reactor,
                    &mut self.metrics,
                    &mut self.rng,
                    &self.config,
                    sock,
                    peer,
                    &syn,
                );
                session.sender = Some(sender);
            }
            Some(sender) => {
                if sender.state == SenderState::Open
                    && sender.queue.is_empty()
                    && sender.has_room(self.config.window)
                {
                    let packet = sender.next_data(payload);
                    let timer = transmit(
                        &mut self.reactor,
                        &mut self.metrics,
                        &mut self.rng,
                        &self.config,
                        sock,
                        peer,
                        &packet,
                    );
                    sender.push_slot(packet, timer);
                } else {
                    sender.queue.push_back(payload);
                    trace!(
                        sock = %sock,
                        peer = %peer,
                        queued = sender.queue.len(),
                        "window busy, payload queued"
                    );
                }
            }
        }

        Ok(())
    }

    /// Request an orderly close. Pending sends complete first: queues drain,
    /// FINs go out as sessions fall idle, and once every session is finished
    /// the socket emits a single [`RudpEvent::Closed`] and releases its
    /// descriptor. With no sessions outstanding that happens immediately.
    pub fn close(&mut self, sock: SocketId) -> Result<()> {
        let socket = self.sockets.get_mut(&sock).ok_or(RudpError::UnknownSocket)?;
        if socket.close_requested {
            return Ok(());
        }
        socket.close_requested = true;
        info!(sock = %sock, "close requested");

        self.sweep_pending_fins(sock);
        self.try_finish_close(sock);
        Ok(())
    }

    /// Process one reactor event. Returns `false` when the reactor has
    /// nothing left that could ever fire.
    pub fn step(&mut self) -> Result<bool> {
        match self.reactor.poll()? {
            Some(event) => {
                self.dispatch(event)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drive the engine until every socket has closed or the reactor runs
    /// dry. Receive errors abort the loop; send errors do not.
    pub fn run(&mut self) -> Result<()> {
        while !self.sockets.is_empty() {
            if !self.step()? {
                break;
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, event: Event) -> Result<()> {
        match event {
            Event::Readable(sock) => self.on_readable(sock),
            Event::Timer { handle, token } => {
                self.on_timer(handle, token);
                Ok(())
            }
        }
    }

    /// Read exactly one datagram, decode it, and route it to the session
    /// half its type addresses.
    fn on_readable(&mut self, sock: SocketId) -> Result<()> {
        if !self.sockets.contains_key(&sock) {
            return Ok(());
        }

        let mut buf = [0u8; RudpHeader::SIZE + constants::RUDP_MAX_PAYLOAD];
        let (len, from) = match self.reactor.recv_from(sock, &mut buf) {
            Ok(pair) => pair,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let Some(packet) = RudpPacket::decode(&buf[..len]) else {
            self.metrics.dropped_malformed += 1;
            trace!(sock = %sock, len, "dropping malformed datagram");
            return Ok(());
        };
        let SocketAddr::V4(peer) = from else {
            self.metrics.dropped_unexpected += 1;
            return Ok(());
        };

        self.metrics.packets_received += 1;
        debug!(
            sock = %sock,
            peer = %peer,
            ptype = packet.header.type_str(),
            seqno = packet.header.seqno,
            "received packet"
        );

        match packet.packet_type() {
            Some(PacketType::Syn) => self.handle_syn(sock, peer, packet.header.seqno),
            Some(PacketType::Ack) => self.handle_ack(sock, peer, packet.header.seqno),
            Some(PacketType::Data) => self.handle_data(sock, peer, packet),
            Some(PacketType::Fin) => self.handle_fin(sock, peer, packet.header.seqno),
            None => self.metrics.dropped_unknown_type += 1,
        }
        Ok(())
    }

    fn handle_syn(&mut self, sock: SocketId, peer: SocketAddrV4, seqno: SeqNum) {
        let Some(socket) = self.sockets.get_mut(&sock) else {
            return;
        };
        socket.last_peer = Some(peer);

        let session = socket.sessions.get_or_insert(peer);
        let ack = match session.receiver.as_mut() {
            None => {
                session.receiver = Some(ReceiverHalf::new(seqno));
                trace!(sock = %sock, peer = %peer, "created receiver session");
                Some(seqno.wrapping_add(1))
            }
            Some(receiver) if receiver.state == ReceiverState::Opening => {
                receiver.realign(seqno);
                Some(seqno.wrapping_add(1))
            }
            // SYN while the receiver is already open: spurious restart.
            Some(_) => None,
        };

        match ack {
            Some(ackno) => {
                let response = RudpPacket::ack(ackno);
                let _ = transmit(
                    &mut self.reactor,
                    &mut self.metrics,
                    &mut self.rng,
                    &self.config,
                    sock,
                    peer,
                    &response,
                );
            }
            None => self.metrics.dropped_unexpected += 1,
        }
    }

    fn handle_ack(&mut self, sock: SocketId, peer: SocketAddrV4, ackno: SeqNum) {
        let mut finish_close = false;
        {
            let Some(socket) = self.sockets.get_mut(&sock) else {
                return;
            };
            socket.last_peer = Some(peer);
            let Some(session) = socket.sessions.get_mut(&peer) else {
                self.metrics.dropped_no_session += 1;
                return;
            };
            let Some(sender) = session.sender.as_mut() else {
                self.metrics.dropped_unexpected += 1;
                return;
            };

            match sender.state {
                SenderState::SynSent => {
                    if !sender.accepts_syn_ack(ackno) {
                        self.metrics.dropped_unexpected += 1;
                        return;
                    }
                    if let Some(timer) = sender.syn_timer.take() {
                        self.reactor.cancel_timer(timer);
                    }
                    sender.state = SenderState::Open;
                    trace!(sock = %sock, peer = %peer, "handshake complete");

                    let reactor = &mut self.reactor;
                    let metrics = &mut self.metrics;
                    let rng = &mut self.rng;
                    let config = &self.config;
                    sender.refill(config.window, |packet| {
                        transmit(reactor, metrics, rng, config, sock, peer, packet)
                    });
                }
                SenderState::Open => {
                    // Only the ACK naming the head of the window advances it.
                    if !sender.ack_matches_head(ackno) {
                        self.metrics.dropped_unexpected += 1;
                        return;
                    }
                    if let Some(slot) = sender.pop_acked_head() {
                        if let Some(timer) = slot.timer {
                            self.reactor.cancel_timer(timer);
                        }
                    }

                    let reactor = &mut self.reactor;
                    let metrics = &mut self.metrics;
                    let rng = &mut self.rng;
                    let config = &self.config;
                    sender.refill(config.window, |packet| {
                        transmit(reactor, metrics, rng, config, sock, peer, packet)
                    });
                }
                SenderState::FinSent => {
                    if !sender.accepts_fin_ack(ackno) {
                        self.metrics.dropped_unexpected += 1;
                        return;
                    }
                    if let Some(timer) = sender.fin_timer.take() {
                        self.reactor.cancel_timer(timer);
                    }
                    sender.finished = true;
                    debug!(sock = %sock, peer = %peer, "teardown acknowledged");
                }
            }

            // A freed window slot or a finished session may unblock the
            // close: emit FINs for sessions that just fell idle, then see
            // whether the whole socket is done.
            if socket.close_requested {
                for (session_peer, session) in socket.sessions.iter_mut() {
                    let Some(sender) = session.sender.as_mut() else {
                        continue;
                    };
                    if sender.state == SenderState::Open && !sender.finished && sender.is_idle() {
                        let fin = sender.begin_fin();
                        sender.fin_timer = transmit(
                            &mut self.reactor,
                            &mut self.metrics,
                            &mut self.rng,
                            &self.config,
                            sock,
                            *session_peer,
                            &fin,
                        );
                    }
                }
                finish_close = socket.sessions.all_finished();
            }
        }

        if finish_close {
            self.finalize_close(sock);
        }
    }

    fn handle_data(&mut self, sock: SocketId, peer: SocketAddrV4, packet: RudpPacket) {
        let seqno = packet.header.seqno;
        let verdict = {
            let Some(socket) = self.sockets.get_mut(&sock) else {
                return;
            };
            socket.last_peer = Some(peer);
            let Some(session) = socket.sessions.get_mut(&peer) else {
                self.metrics.dropped_no_session += 1;
                return;
            };
            let Some(receiver) = session.receiver.as_mut() else {
                self.metrics.dropped_unexpected += 1;
                return;
            };
            receiver.on_data(seqno, self.config.window as u32)
        };

        match verdict {
            DataVerdict::Deliver { ack } => {
                let response = RudpPacket::ack(ack);
                let _ = transmit(
                    &mut self.reactor,
                    &mut self.metrics,
                    &mut self.rng,
                    &self.config,
                    sock,
                    peer,
                    &response,
                );
                self.metrics.bytes_received += packet.payload.len() as u64;
                self.deliver_data(sock, peer, packet.payload);
            }
            DataVerdict::Duplicate { ack } => {
                self.metrics.duplicate_data += 1;
                trace!(sock = %sock, peer = %peer, seqno, "re-acking duplicate data");
                let response = RudpPacket::ack(ack);
                let _ = transmit(
                    &mut self.reactor,
                    &mut self.metrics,
                    &mut self.rng,
                    &self.config,
                    sock,
                    peer,
                    &response,
                );
            }
            DataVerdict::Ignore => {
                self.metrics.dropped_unexpected += 1;
            }
        }
    }

    fn handle_fin(&mut self, sock: SocketId, peer: SocketAddrV4, seqno: SeqNum) {
        let mut finish_close = false;
        let ack = {
            let Some(socket) = self.sockets.get_mut(&sock) else {
                return;
            };
            socket.last_peer = Some(peer);
            let Some(session) = socket.sessions.get_mut(&peer) else {
                self.metrics.dropped_no_session += 1;
                return;
            };
            let Some(receiver) = session.receiver.as_mut() else {
                self.metrics.dropped_unexpected += 1;
                return;
            };

            match receiver.on_fin(seqno) {
                Some(ackno) => {
                    debug!(sock = %sock, peer = %peer, "session finished by peer");
                    finish_close = socket.close_requested && socket.sessions.all_finished();
                    Some(ackno)
                }
                None => {
                    self.metrics.dropped_unexpected += 1;
                    None
                }
            }
        };

        if let Some(ackno) = ack {
            let response = RudpPacket::ack(ackno);
            let _ = transmit(
                &mut self.reactor,
                &mut self.metrics,
                &mut self.rng,
                &self.config,
                sock,
                peer,
                &response,
            );
        }
        if finish_close {
            self.finalize_close(sock);
        }
    }

    /// Retransmission timer dispatch. A token whose socket, session, slot,
    /// or handle no longer matches live state is stale (the packet was
    /// acknowledged as the timer fired) and is ignored.
    fn on_timer(&mut self, handle: TimerHandle, token: TimerToken) {
        let TimerToken {
            socket: sock,
            peer,
            kind,
        } = token;

        let mut timed_out = false;
        {
            let Some(socket) = self.sockets.get_mut(&sock) else {
                return;
            };
            let Some(session) = socket.sessions.get_mut(&peer) else {
                return;
            };
            let Some(sender) = session.sender.as_mut() else {
                return;
            };

            match kind {
                TimerKind::Syn => {
                    if sender.state != SenderState::SynSent || sender.syn_timer != Some(handle) {
                        return;
                    }
                    sender.syn_timer = None;
                    if sender.syn_retries >= self.config.max_retrans {
                        timed_out = true;
                    } else {
                        sender.syn_retries += 1;
                        self.metrics.retransmissions += 1;
                        debug!(sock = %sock, peer = %peer, attempt = sender.syn_retries, "retransmitting SYN");
                        let packet = sender.syn_packet();
                        sender.syn_timer = transmit(
                            &mut self.reactor,
                            &mut self.metrics,
                            &mut self.rng,
                            &self.config,
                            sock,
                            peer,
                            &packet,
                        );
                    }
                }
                TimerKind::Fin => {
                    if sender.state != SenderState::FinSent || sender.fin_timer != Some(handle) {
                        return;
                    }
                    sender.fin_timer = None;
                    if sender.fin_retries >= self.config.max_retrans {
                        timed_out = true;
                    } else {
                        sender.fin_retries += 1;
                        self.metrics.retransmissions += 1;
                        debug!(sock = %sock, peer = %peer, attempt = sender.fin_retries, "retransmitting FIN");
                        let packet = sender.fin_packet();
                        sender.fin_timer = transmit(
                            &mut self.reactor,
                            &mut self.metrics,
                            &mut self.rng,
                            &self.config,
                            sock,
                            peer,
                            &packet,
                        );
                    }
                }
                TimerKind::Data(seqno) => {
                    let Some(slot) = sender.slot_mut(seqno) else {
                        return;
                    };
                    if slot.timer != Some(handle) {
                        return;
                    }
                    slot.timer = None;
                    if slot.retries >= self.config.max_retrans {
                        timed_out = true;
                    } else {
                        slot.retries += 1;
                        self.metrics.retransmissions += 1;
                        debug!(sock = %sock, peer = %peer, seqno, attempt = slot.retries, "retransmitting DATA");
                        slot.timer = transmit(
                            &mut self.reactor,
                            &mut self.metrics,
                            &mut self.rng,
                            &self.config,
                            sock,
                            peer,
                            &slot.packet,
                        );
                    }
                }
            }
        }

        if timed_out {
            self.emit_timeout(sock, peer);
        }
    }

    /// Hand a payload to the data callback. The handler is taken out of its
    /// slot for the duration of the call so it can re-enter the stack.
    fn deliver_data(&mut self, sock: SocketId, peer: SocketAddrV4, payload: Bytes) {
        let Some(mut handler) = self
            .sockets
            .get_mut(&sock)
            .and_then(|socket| socket.data_handler.take())
        else {
            return;
        };

        handler(self, sock, peer, &payload);

        if let Some(socket) = self.sockets.get_mut(&sock) {
            if socket.data_handler.is_none() {
                socket.data_handler = Some(handler);
            }
        }
    }

    fn emit_timeout(&mut self, sock: SocketId, peer: SocketAddrV4) {
        warn!(sock = %sock, peer = %peer, "retry ceiling reached");
        let Some(mut handler) = self
            .sockets
            .get_mut(&sock)
            .and_then(|socket| socket.event_handler.take())
        else {
            return;
        };

        handler(self, sock, RudpEvent::Timeout, Some(peer));

        if let Some(socket) = self.sockets.get_mut(&sock) {
            if socket.event_handler.is_none() {
                socket.event_handler = Some(handler);
            }
        }
    }

    /// Send FIN on every session of `sock` whose sender is open and idle.
    /// Called when a close is requested; the ACK path repeats the sweep as
    /// windows drain.
    fn sweep_pending_fins(&mut self, sock: SocketId) {
        let Some(socket) = self.sockets.get_mut(&sock) else {
            return;
        };
        if !socket.close_requested {
            return;
        }

        for (peer, session) in socket.sessions.iter_mut() {
            let Some(sender) = session.sender.as_mut() else {
                continue;
            };
            if sender.state == SenderState::Open && !sender.finished && sender.is_idle() {
                let fin = sender.begin_fin();
                sender.fin_timer = transmit(
                    &mut self.reactor,
                    &mut self.metrics,
                    &mut self.rng,
                    &self.config,
                    sock,
                    *peer,
                    &fin,
                );
            }
        }
    }

    fn try_finish_close(&mut self, sock: SocketId) {
        let ready = self
            .sockets
            .get(&sock)
            .is_some_and(|socket| socket.close_requested && socket.sessions.all_finished());
        if ready {
            self.finalize_close(sock);
        }
    }

    /// Tear the socket down and emit the one `Closed` event. Sessions are
    /// detached wholesale with the socket, never freed mid-traversal.
    fn finalize_close(&mut self, sock: SocketId) {
        let Some(mut socket) = self.sockets.remove(&sock) else {
            return;
        };
        self.reactor.unregister_readable(socket.id);
        self.reactor.unbind(socket.id);
        info!(sock = %sock, sessions = socket.sessions.len(), "socket closed");

        if let Some(mut handler) = socket.event_handler.take() {
            handler(self, sock, RudpEvent::Closed, socket.last_peer);
        }
    }
}
