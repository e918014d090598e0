//! # RUDP - Reliable UDP transport
//!
//! A connection-oriented reliability layer over plain UDP datagrams:
//! bidirectional session establishment, ordered at-most-once delivery of
//! bounded payloads, a fixed sliding window, timeout-based retransmission
//! with a retry ceiling, and orderly teardown. One local socket multiplexes
//! any number of concurrent peer sessions.
//!
//! ## Features
//!
//! - **Single-threaded by design**: all state lives in one [`RudpStack`]
//!   driven by a cooperative event reactor; no locks, no atomics
//! - **Callback API**: register a data handler and an event handler, then
//!   `run()` the stack
//! - **Pluggable environment**: the [`Reactor`] trait abstracts sockets,
//!   readiness, and timers; tests drive the engine on a deterministic
//!   in-memory reactor with a virtual clock
//! - **Wire compatible**: 8-byte big-endian header, 16-bit-truncated
//!   sequence comparison, go-back-style head-of-window ACKs
//! - **Observability**: `tracing` spans every packet; per-stack counters
//!   account for every silently dropped datagram
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use rudp_tokio::{RudpConfig, RudpStack, TokioReactor};
//!
//! fn main() -> rudp_tokio::Result<()> {
//!     let mut stack = RudpStack::new(TokioReactor::new()?, RudpConfig::default())?;
//!     let sock = stack.open(0)?;
//!
//!     stack.set_data_handler(sock, |_stack, _sock, peer, bytes| {
//!         println!("{} bytes from {peer}", bytes.len());
//!     })?;
//!
//!     stack.send_to(sock, b"hello", "127.0.0.1:9000".parse().unwrap())?;
//!     stack.run()
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────┐
//! │  RudpStack            │  socket table, public API, dispatch
//! ├───────────────────────┤
//! │  Sessions             │  per-peer sender + receiver halves
//! ├───────────────────────┤
//! │  Wire                 │  packet codec, sequence arithmetic
//! ├───────────────────────┤
//! │  Reactor              │  datagram I/O, readiness, one-shot timers
//! └───────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod reactor;
pub mod stack;
pub mod wire;

mod receiver;
mod sender;
mod session;
mod socket;

// Re-exports
pub use config::RudpConfig;
pub use error::{Result, RudpError};
pub use metrics::StackMetrics;
pub use reactor::{Event, Reactor, SocketId, TimerHandle, TimerKind, TimerToken};
pub use socket::RudpEvent;
pub use stack::RudpStack;

#[cfg(feature = "tokio")]
pub use reactor::TokioReactor;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PROTOCOL_VERSION: u16 = 1;
