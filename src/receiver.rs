//! Receive-side session state machine

use crate::wire::{seq_geq, seq_lt, SeqNum};

/// Protocol state of a receiver half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReceiverState {
    /// SYN has been ACKed, no DATA accepted yet
    Opening,
    /// First in-order DATA accepted
    Open,
}

/// What the stack should do with an incoming DATA packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DataVerdict {
    /// In-order: ACK `ack` and deliver the payload to the application
    Deliver { ack: SeqNum },
    /// Already delivered, its ACK was probably lost: re-ACK, do not deliver
    Duplicate { ack: SeqNum },
    /// Outside the window entirely: drop
    Ignore,
}

/// Receive-side state for one peer.
#[derive(Debug)]
pub(crate) struct ReceiverHalf {
    pub state: ReceiverState,
    /// Next in-order seqno we will accept for delivery
    pub expected_seqno: SeqNum,
    /// A FIN at the expected seqno has been ACKed
    pub finished: bool,
}

impl ReceiverHalf {
    /// Create a receiver for a SYN carrying `syn_seqno`.
    pub fn new(syn_seqno: SeqNum) -> Self {
        Self {
            state: ReceiverState::Opening,
            expected_seqno: syn_seqno.wrapping_add(1),
            finished: false,
        }
    }

    /// Re-align to a retransmitted or replacement SYN. Only meaningful
    /// while still `Opening`; the stack ignores SYNs once we are `Open`.
    pub fn realign(&mut self, syn_seqno: SeqNum) {
        self.state = ReceiverState::Opening;
        self.expected_seqno = syn_seqno.wrapping_add(1);
        self.finished = false;
    }

    /// Classify an incoming DATA packet and advance the expected seqno when
    /// it is the in-order one. `window` is the retrospective range in which
    /// duplicates are re-ACKed rather than dropped.
    pub fn on_data(&mut self, seqno: SeqNum, window: u32) -> DataVerdict {
        if seqno == self.expected_seqno {
            if self.state == ReceiverState::Opening {
                self.state = ReceiverState::Open;
            }
            self.expected_seqno = self.expected_seqno.wrapping_add(1);
            return DataVerdict::Deliver {
                ack: self.expected_seqno,
            };
        }

        if seq_geq(seqno, self.expected_seqno.wrapping_sub(window))
            && seq_lt(seqno, self.expected_seqno)
        {
            return DataVerdict::Duplicate {
                ack: seqno.wrapping_add(1),
            };
        }

        DataVerdict::Ignore
    }

    /// Handle a FIN. Returns the ACK seqno when the FIN is honored.
    ///
    /// `expected_seqno` is deliberately left in place so a retransmitted FIN
    /// (lost FIN-ACK) is re-ACKed identically.
    pub fn on_fin(&mut self, seqno: SeqNum) -> Option<SeqNum> {
        if self.state == ReceiverState::Open && seqno == self.expected_seqno {
            self.finished = true;
            Some(self.expected_seqno.wrapping_add(1))
        } else {
            None
        }
    }
}
