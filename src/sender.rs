//! Send-side session state machine
//!
//! [`SenderHalf`] is the per-peer transmit state: the SYN → OPEN → FIN
//! lifecycle, a sliding window of in-flight DATA packets, and a FIFO of
//! payloads waiting for a free slot. It owns no I/O; the stack transmits
//! packets and arms timers, handing the resulting [`TimerHandle`]s back for
//! storage so a later ACK can cancel them.
//!
//! # Window invariants
//!
//! - The window is left-packed: slots only leave from the front, on the ACK
//!   that names the head packet.
//! - Seqnos in the window are consecutive, assigned in queue order.
//! - Only the oldest in-flight packet can be acknowledged; ACKs for any
//!   other seqno are ignored by the stack.

use crate::reactor::TimerHandle;
use crate::wire::{RudpPacket, SeqNum};
use bytes::Bytes;
use std::collections::VecDeque;

/// Protocol state of a sender half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SenderState {
    /// SYN sent, waiting for its ACK
    SynSent,
    /// Handshake complete, moving data
    Open,
    /// FIN sent, waiting for its ACK
    FinSent,
}

/// One in-flight DATA packet occupying a window slot.
#[derive(Debug)]
pub(crate) struct WindowSlot {
    /// The packet as sent, kept for retransmission
    pub packet: RudpPacket,
    /// Retransmissions so far for this slot
    pub retries: u32,
    /// The pending retransmission timer
    pub timer: Option<TimerHandle>,
}

/// Send-side state for one peer.
#[derive(Debug)]
pub(crate) struct SenderHalf {
    pub state: SenderState,
    /// Seqno carried by the SYN; its ACK names `initial_seqno + 1`
    pub initial_seqno: SeqNum,
    /// Last seqno assigned to an outgoing SYN, DATA, or FIN
    pub next_seqno: SeqNum,
    /// In-flight packets in send order, oldest first
    pub window: VecDeque<WindowSlot>,
    /// Payloads not yet assigned a window slot
    pub queue: VecDeque<Bytes>,
    pub syn_timer: Option<TimerHandle>,
    pub syn_retries: u32,
    pub fin_timer: Option<TimerHandle>,
    pub fin_retries: u32,
    /// The FIN we sent has been ACKed
    pub finished: bool,
}

impl SenderHalf {
    /// Create a sender about to transmit SYN with `initial_seqno`.
    pub fn new(initial_seqno: SeqNum) -> Self {
        Self {
            state: SenderState::SynSent,
            initial_seqno,
            next_seqno: initial_seqno,
            window: VecDeque::new(),
            queue: VecDeque::new(),
            syn_timer: None,
            syn_retries: 0,
            fin_timer: None,
            fin_retries: 0,
            finished: false,
        }
    }

    /// The SYN packet for this session (initial transmission and retries).
    pub fn syn_packet(&self) -> RudpPacket {
        RudpPacket::syn(self.initial_seqno)
    }

    /// The FIN packet for this session. Only valid after [`begin_fin`].
    ///
    /// [`begin_fin`]: SenderHalf::begin_fin
    pub fn fin_packet(&self) -> RudpPacket {
        RudpPacket::fin(self.next_seqno)
    }

    /// `true` when there is room for another in-flight packet.
    pub fn has_room(&self, window: usize) -> bool {
        self.window.len() < window
    }

    /// `true` when nothing is in flight and nothing is queued.
    pub fn is_idle(&self) -> bool {
        self.window.is_empty() && self.queue.is_empty()
    }

    /// Does `ackno` acknowledge our SYN?
    pub fn accepts_syn_ack(&self, ackno: SeqNum) -> bool {
        self.state == SenderState::SynSent && ackno == self.initial_seqno.wrapping_add(1)
    }

    /// Does `ackno` acknowledge our FIN?
    pub fn accepts_fin_ack(&self, ackno: SeqNum) -> bool {
        self.state == SenderState::FinSent && ackno == self.next_seqno.wrapping_add(1)
    }

    /// Does `ackno` acknowledge the oldest in-flight packet?
    pub fn ack_matches_head(&self, ackno: SeqNum) -> bool {
        self.window
            .front()
            .is_some_and(|slot| slot.packet.header.seqno.wrapping_add(1) == ackno)
    }

    /// Remove and return the acknowledged head slot. The caller cancels the
    /// slot's timer.
    pub fn pop_acked_head(&mut self) -> Option<WindowSlot> {
        self.window.pop_front()
    }

    /// Assign the next seqno and build the DATA packet for `payload`.
    pub fn next_data(&mut self, payload: Bytes) -> RudpPacket {
        self.next_seqno = self.next_seqno.wrapping_add(1);
        RudpPacket::data(self.next_seqno, payload)
    }

    /// Place a just-transmitted DATA packet into the first free trailing
    /// slot.
    pub fn push_slot(&mut self, packet: RudpPacket, timer: Option<TimerHandle>) {
        self.window.push_back(WindowSlot {
            packet,
            retries: 0,
            timer,
        });
    }

    /// Greedily drain the queue into free trailing slots, assigning
    /// consecutive seqnos in queue order. `transmit` sends each packet and
    /// returns the armed retransmission timer.
    pub fn refill<F>(&mut self, window: usize, mut transmit: F)
    where
        F: FnMut(&RudpPacket) -> Option<TimerHandle>,
    {
        while self.window.len() < window {
            let Some(payload) = self.queue.pop_front() else {
                break;
            };
            let packet = self.next_data(payload);
            let timer = transmit(&packet);
            self.push_slot(packet, timer);
        }
    }

    /// Find the in-flight slot holding `seqno`, if it is still in flight.
    pub fn slot_mut(&mut self, seqno: SeqNum) -> Option<&mut WindowSlot> {
        self.window
            .iter_mut()
            .find(|slot| slot.packet.header.seqno == seqno)
    }

    /// Consume a seqno for the FIN and enter `FinSent`.
    pub fn begin_fin(&mut self) -> RudpPacket {
        self.next_seqno = self.next_seqno.wrapping_add(1);
        self.state = SenderState::FinSent;
        self.fin_packet()
    }
}
