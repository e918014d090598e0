//! Abstract event reactor for the RUDP engine
//!
//! The [`Reactor`] trait is the engine's single seam to the outside world:
//! datagram endpoints, readiness wakeups for them, and one-shot timers. The
//! engine holds opaque [`SocketId`] tokens; implementations own the real
//! sockets. Enable the `tokio` feature (on by default) for the built-in
//! [`TokioReactor`] implementation backed by a current-thread runtime.
//!
//! Timers are tagged with a [`TimerToken`] naming the session they belong
//! to. A fired timer whose handle no longer matches the handle stored in the
//! owning state is stale and must be ignored; [`Reactor::cancel_timer`] is
//! idempotent against timers that already fired.

use crate::wire::SeqNum;
use std::fmt;
use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;

/// Opaque handle to a bound datagram endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u64);

impl SocketId {
    /// Build a handle from a raw value. Intended for [`Reactor`]
    /// implementations; the engine treats handles as opaque.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Return the raw value backing this handle.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to one scheduled one-shot timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Build a handle from a raw value. Intended for [`Reactor`]
    /// implementations.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Return the raw value backing this handle.
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Which retransmission timer a token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// The SYN handshake timer
    Syn,
    /// The window-slot timer for the DATA packet with this seqno
    Data(SeqNum),
    /// The FIN teardown timer
    Fin,
}

/// Session identity carried by every timer so a callback that races a
/// cancel or a window shift can be recognized as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerToken {
    /// Socket the timed packet was sent from
    pub socket: SocketId,
    /// Peer the timed packet was sent to
    pub peer: SocketAddrV4,
    /// Which of the session's timers this is
    pub kind: TimerKind,
}

/// One occurrence delivered by [`Reactor::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A registered endpoint has at least one datagram to read
    Readable(SocketId),
    /// A scheduled timer expired without being cancelled
    Timer {
        handle: TimerHandle,
        token: TimerToken,
    },
}

/// Event reactor and datagram environment consumed by
/// [`RudpStack`](crate::stack::RudpStack).
///
/// All methods are called from the single thread that drives the engine;
/// implementations need no internal locking. `poll` blocks until something
/// is deliverable and callbacks (the engine's dispatch) run to completion
/// between polls.
pub trait Reactor {
    /// Bind a UDP endpoint on `port` (0 picks an ephemeral port).
    fn bind(&mut self, port: u16) -> io::Result<SocketId>;

    /// Release a bound endpoint. Safe to call on an unknown id.
    fn unbind(&mut self, sock: SocketId);

    /// Start delivering [`Event::Readable`] for `sock`.
    fn register_readable(&mut self, sock: SocketId) -> io::Result<()>;

    /// Stop delivering readable events for `sock`.
    fn unregister_readable(&mut self, sock: SocketId);

    /// Schedule a one-shot timer `after` from now.
    fn schedule_timer(&mut self, after: Duration, token: TimerToken) -> TimerHandle;

    /// Cancel a pending timer. Cancelling a handle that already fired or
    /// was never issued is a no-op.
    fn cancel_timer(&mut self, handle: TimerHandle);

    /// Send one datagram from `sock` to `peer`.
    fn send_to(&mut self, sock: SocketId, buf: &[u8], peer: SocketAddr) -> io::Result<usize>;

    /// Receive one datagram on `sock`. May return `WouldBlock` on a
    /// spurious wakeup.
    fn recv_from(&mut self, sock: SocketId, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Return the local address `sock` is bound to.
    fn local_addr(&self, sock: SocketId) -> io::Result<SocketAddr>;

    /// Block until the next event. Returns `None` when no endpoint is
    /// registered and no timer is pending, i.e. nothing can ever fire.
    fn poll(&mut self) -> io::Result<Option<Event>>;
}

// ---------------------------------------------------------------------------
// TokioReactor - default implementation on a current-thread runtime
// ---------------------------------------------------------------------------

#[cfg(feature = "tokio")]
mod tokio_impl {
    use super::*;
    use std::collections::{BinaryHeap, HashMap, HashSet};
    use std::future::poll_fn;
    use std::net::Ipv4Addr;
    use std::task::Poll;
    use tokio::net::UdpSocket;
    use tokio::runtime::{Builder, Runtime};
    use tokio::time::Instant;

    struct TimerEntry {
        deadline: Instant,
        handle: TimerHandle,
        token: TimerToken,
    }

    // Min-heap ordering by deadline, handle as a deterministic tiebreak.
    impl Ord for TimerEntry {
        fn cmp(&self, other: &Self) -> std::cmp::Ordering {
            other
                .deadline
                .cmp(&self.deadline)
                .then(other.handle.cmp(&self.handle))
        }
    }

    impl PartialOrd for TimerEntry {
        fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
            Some(self.cmp(other))
        }
    }

    impl PartialEq for TimerEntry {
        fn eq(&self, other: &Self) -> bool {
            self.handle == other.handle
        }
    }

    impl Eq for TimerEntry {}

    /// Default [`Reactor`] backed by a tokio current-thread runtime.
    ///
    /// `poll` parks the runtime on the earliest timer deadline and on
    /// receive-readiness of every registered socket; everything else is
    /// serviced with the non-blocking `try_*` socket calls, so the engine
    /// stays a single cooperative thread.
    pub struct TokioReactor {
        rt: Runtime,
        sockets: HashMap<SocketId, UdpSocket>,
        watched: HashSet<SocketId>,
        timers: BinaryHeap<TimerEntry>,
        next_socket: u64,
        next_timer: u64,
    }

    impl TokioReactor {
        /// Create a reactor with its own current-thread runtime.
        pub fn new() -> io::Result<Self> {
            let rt = Builder::new_current_thread().enable_all().build()?;
            Ok(Self {
                rt,
                sockets: HashMap::new(),
                watched: HashSet::new(),
                timers: BinaryHeap::new(),
                next_socket: 1,
                next_timer: 1,
            })
        }

        fn socket(&self, sock: SocketId) -> io::Result<&UdpSocket> {
            self.sockets
                .get(&sock)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such socket"))
        }
    }

    impl Reactor for TokioReactor {
        fn bind(&mut self, port: u16) -> io::Result<SocketId> {
            let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
            let socket = self.rt.block_on(UdpSocket::bind(addr))?;

            let id = SocketId::from_raw(self.next_socket);
            self.next_socket += 1;
            self.sockets.insert(id, socket);
            Ok(id)
        }

        fn unbind(&mut self, sock: SocketId) {
            self.sockets.remove(&sock);
            self.watched.remove(&sock);
        }

        fn register_readable(&mut self, sock: SocketId) -> io::Result<()> {
            self.socket(sock)?;
            self.watched.insert(sock);
            Ok(())
        }

        fn unregister_readable(&mut self, sock: SocketId) {
            self.watched.remove(&sock);
        }

        fn schedule_timer(&mut self, after: Duration, token: TimerToken) -> TimerHandle {
            let handle = TimerHandle::from_raw(self.next_timer);
            self.next_timer += 1;
            self.timers.push(TimerEntry {
                deadline: Instant::now() + after,
                handle,
                token,
            });
            handle
        }

        fn cancel_timer(&mut self, handle: TimerHandle) {
            self.timers.retain(|entry| entry.handle != handle);
        }

        fn send_to(&mut self, sock: SocketId, buf: &[u8], peer: SocketAddr) -> io::Result<usize> {
            self.socket(sock)?.try_send_to(buf, peer)
        }

        fn recv_from(
            &mut self,
            sock: SocketId,
            buf: &mut [u8],
        ) -> io::Result<(usize, SocketAddr)> {
            self.socket(sock)?.try_recv_from(buf)
        }

        fn local_addr(&self, sock: SocketId) -> io::Result<SocketAddr> {
            self.socket(sock)?.local_addr()
        }

        fn poll(&mut self) -> io::Result<Option<Event>> {
            loop {
                if let Some(entry) = self.timers.peek() {
                    if entry.deadline <= Instant::now() {
                        let entry = self.timers.pop().expect("peeked entry");
                        return Ok(Some(Event::Timer {
                            handle: entry.handle,
                            token: entry.token,
                        }));
                    }
                }

                if self.watched.is_empty() && self.timers.is_empty() {
                    return Ok(None);
                }

                let deadline = self.timers.peek().map(|entry| entry.deadline);
                let sockets = &self.sockets;
                let watched = &self.watched;

                let outcome = self.rt.block_on(async {
                    let sleep = async {
                        match deadline {
                            Some(at) => tokio::time::sleep_until(at).await,
                            None => std::future::pending::<()>().await,
                        }
                    };
                    tokio::pin!(sleep);

                    let readable = poll_fn(|cx| {
                        for id in watched.iter() {
                            let Some(socket) = sockets.get(id) else {
                                continue;
                            };
                            match socket.poll_recv_ready(cx) {
                                Poll::Ready(Ok(())) => return Poll::Ready(Ok(*id)),
                                Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
                                Poll::Pending => {}
                            }
                        }
                        Poll::Pending
                    });

                    tokio::select! {
                        _ = &mut sleep => None,
                        ready = readable => Some(ready),
                    }
                });

                match outcome {
                    Some(Ok(id)) => return Ok(Some(Event::Readable(id))),
                    Some(Err(err)) => return Err(err),
                    // Timer became due; the next loop iteration pops it.
                    None => continue,
                }
            }
        }
    }
}

#[cfg(feature = "tokio")]
pub use tokio_impl::TokioReactor;
