//! Traffic and drop counters for a RUDP stack
//!
//! The engine is single-threaded, so these are plain integers owned by the
//! stack rather than shared atomics. Every silently-dropped packet is
//! attributed to exactly one counter.

/// Counter set for one stack.
#[derive(Debug, Default, Clone)]
pub struct StackMetrics {
    /// Datagrams handed to the reactor for transmission
    pub packets_sent: u64,
    /// Payload bytes handed to the reactor for transmission
    pub bytes_sent: u64,
    /// Datagrams received and decoded
    pub packets_received: u64,
    /// Payload bytes received in accepted DATA packets
    pub bytes_received: u64,
    /// Retransmissions of SYN, DATA, or FIN packets
    pub retransmissions: u64,
    /// Outbound datagrams suppressed by the loss simulation
    pub simulated_drops: u64,
    /// Inbound datagrams that failed to decode
    pub dropped_malformed: u64,
    /// Inbound packets with an unknown type field
    pub dropped_unknown_type: u64,
    /// Inbound packets for peers with no matching session
    pub dropped_no_session: u64,
    /// Inbound packets that found a session in the wrong state, or a
    /// missing sender/receiver half
    pub dropped_unexpected: u64,
    /// DATA packets inside the retrospective window, re-ACKed not delivered
    pub duplicate_data: u64,
}

impl StackMetrics {
    /// Total inbound packets dropped without reaching a session half.
    pub fn total_dropped(&self) -> u64 {
        self.dropped_malformed
            + self.dropped_unknown_type
            + self.dropped_no_session
            + self.dropped_unexpected
    }

    /// Format counters for human-readable display
    pub fn summary(&self) -> String {
        format!(
            "RUDP metrics: {} pkts / {} bytes sent, {} pkts / {} bytes received, \
             {} retransmissions, {} simulated drops, {} dropped ({} malformed, \
             {} unknown type, {} no session, {} unexpected), {} duplicates re-acked",
            self.packets_sent,
            self.bytes_sent,
            self.packets_received,
            self.bytes_received,
            self.retransmissions,
            self.simulated_drops,
            self.total_dropped(),
            self.dropped_malformed,
            self.dropped_unknown_type,
            self.dropped_no_session,
            self.dropped_unexpected,
            self.duplicate_data,
        )
    }
}
