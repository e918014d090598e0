//! Configuration types for the RUDP stack

use crate::error::{Result, RudpError};
use crate::wire::constants;
use std::time::Duration;

// Window sizes are bounded far below the 2^15 sequence-comparison window so
// in-flight ranges can never be misordered by the i16 truncation.
const MAX_WINDOW: usize = 4096;

/// RUDP configuration builder
#[derive(Debug, Clone)]
pub struct RudpConfig {
    /// Max number of unacknowledged packets in flight per peer
    pub window: usize,
    /// Max number of retransmissions of any one packet
    pub max_retrans: u32,
    /// Delay before an unacknowledged packet is retransmitted
    pub retransmit_timeout: Duration,
    /// Artificial send-side loss for testing: drop roughly one datagram in
    /// `loss_interval`. 0 disables the simulation.
    pub loss_interval: u32,
}

impl Default for RudpConfig {
    fn default() -> Self {
        Self {
            window: constants::RUDP_WINDOW,
            max_retrans: constants::RUDP_MAX_RETRANS,
            retransmit_timeout: Duration::from_millis(constants::RUDP_TIMEOUT_MS),
            loss_interval: 0,
        }
    }
}

impl RudpConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sliding-window size
    pub fn window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    /// Set the retry ceiling
    pub fn max_retrans(mut self, max_retrans: u32) -> Self {
        self.max_retrans = max_retrans;
        self
    }

    /// Set the retransmission timeout
    pub fn retransmit_timeout(mut self, timeout: Duration) -> Self {
        self.retransmit_timeout = timeout;
        self
    }

    /// Enable send-side loss simulation, dropping about one datagram in
    /// `interval`. Only honored when `interval` is nonzero.
    pub fn simulate_loss(mut self, interval: u32) -> Self {
        self.loss_interval = interval;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            return Err(RudpError::config("Window size must be greater than 0"));
        }

        if self.window > MAX_WINDOW {
            return Err(RudpError::config(format!(
                "Window size must not exceed {MAX_WINDOW}"
            )));
        }

        if self.retransmit_timeout.is_zero() {
            return Err(RudpError::config(
                "Retransmission timeout must be greater than 0",
            ));
        }

        Ok(())
    }
}
