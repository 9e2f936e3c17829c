//! Session parameters and transport tunables.
//!
//! [`SessionParams`] are the four values both peers agree on before any data
//! flows (window width N, base timeout T, loss percentage P, adaptive flag).
//! [`TransportConfig`] holds the knobs that are local to one endpoint.

use std::time::Duration;

use crate::segment::MSS;
use crate::window::MAX_WIDTH;

/// Encoded size of [`SessionParams`] on the wire.
pub const PARAMS_WIRE_LEN: usize = 5;

/// Rejected parameter values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("window width {0} outside 1..=127")]
    WindowWidth(u8),
    #[error("loss percentage {0} above 100")]
    LossPercent(u8),
    #[error("retransmission timeout must be non-zero")]
    ZeroTimeout,
    #[error("ring capacity {0} cannot hold one full segment")]
    RingCapacity(usize),
    #[error("encoded parameters must be 5 bytes, got {0}")]
    WireLength(usize),
    #[error("adaptive flag byte {0} is neither 0 nor 1")]
    AdaptiveFlag(u8),
}

/// Values negotiated once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams {
    /// Fixed retransmission timeout T, in milliseconds.  Also the initial
    /// timeout when `adaptive` is set.
    pub timeout_ms: u16,
    /// Probability (percent) that the unreliable send drops a datagram.
    pub loss_percent: u8,
    /// Window width N, `1..=127`.
    pub window_width: u8,
    /// Adapt the timeout from RTT samples.
    pub adaptive: bool,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            loss_percent: 0,
            window_width: 8,
            adaptive: true,
        }
    }
}

impl SessionParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_width == 0 || self.window_width > MAX_WIDTH {
            return Err(ConfigError::WindowWidth(self.window_width));
        }
        if self.loss_percent > 100 {
            return Err(ConfigError::LossPercent(self.loss_percent));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.timeout_ms))
    }

    /// Drop probability in `[0, 1]`.
    pub fn loss_probability(&self) -> f64 {
        f64::from(self.loss_percent) / 100.0
    }

    /// `timeout_ms (u16 BE) | loss_percent | window_width | adaptive`.
    pub fn encode(&self) -> [u8; PARAMS_WIRE_LEN] {
        let t = self.timeout_ms.to_be_bytes();
        [
            t[0],
            t[1],
            self.loss_percent,
            self.window_width,
            u8::from(self.adaptive),
        ]
    }

    /// Parse and validate parameters received from the peer.
    pub fn decode(buf: &[u8]) -> Result<Self, ConfigError> {
        if buf.len() != PARAMS_WIRE_LEN {
            return Err(ConfigError::WireLength(buf.len()));
        }
        let adaptive = match buf[4] {
            0 => false,
            1 => true,
            other => return Err(ConfigError::AdaptiveFlag(other)),
        };
        let params = Self {
            timeout_ms: u16::from_be_bytes([buf[0], buf[1]]),
            loss_percent: buf[2],
            window_width: buf[3],
            adaptive,
        };
        params.validate()?;
        Ok(params)
    }
}

/// Endpoint-local tunables.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Bytes of storage in each ring buffer.
    pub ring_capacity: usize,
    /// Receiver gives up on the session after this long without a datagram.
    pub idle_timeout: Duration,
    /// How long the sender waits when nothing is in flight before it
    /// re-evaluates its state.
    pub idle_wait: Duration,
    /// Lower bound for the adaptive timeout.
    pub min_timeout: Duration,
    /// RTT estimate before the first sample.
    pub initial_rtt: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 5 * MSS,
            idle_timeout: Duration::from_secs(30),
            idle_wait: Duration::from_secs(15),
            min_timeout: Duration::from_millis(250),
            initial_rtt: Duration::from_secs(1),
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        // outbound packetizing claims whole segments
        if self.ring_capacity < MSS + 1 {
            return Err(ConfigError::RingCapacity(self.ring_capacity));
        }
        // a zero idle wait turns the sender's mailbox wait into a spin
        if self.min_timeout.is_zero() || self.idle_wait.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_are_valid() {
        assert_eq!(SessionParams::default().validate(), Ok(()));
        assert_eq!(TransportConfig::default().validate(), Ok(()));
    }

    #[test]
    fn width_bounds() {
        let mut p = SessionParams::default();
        p.window_width = 0;
        assert_eq!(p.validate(), Err(ConfigError::WindowWidth(0)));
        p.window_width = 128;
        assert_eq!(p.validate(), Err(ConfigError::WindowWidth(128)));
        p.window_width = 127;
        assert_eq!(p.validate(), Ok(()));
    }

    #[test]
    fn loss_and_timeout_bounds() {
        let p = SessionParams {
            loss_percent: 101,
            ..Default::default()
        };
        assert_eq!(p.validate(), Err(ConfigError::LossPercent(101)));
        let p = SessionParams {
            timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(p.validate(), Err(ConfigError::ZeroTimeout));
    }

    #[test]
    fn wire_encoding_layout() {
        let p = SessionParams {
            timeout_ms: 0x01f4,
            loss_percent: 20,
            window_width: 16,
            adaptive: false,
        };
        assert_eq!(p.encode(), [0x01, 0xf4, 20, 16, 0]);
        assert_eq!(SessionParams::decode(&p.encode()), Ok(p));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert_eq!(
            SessionParams::decode(&[0, 1, 0]),
            Err(ConfigError::WireLength(3))
        );
        assert_eq!(
            SessionParams::decode(&[0, 1, 0, 4, 7]),
            Err(ConfigError::AdaptiveFlag(7))
        );
        assert_eq!(
            SessionParams::decode(&[0, 1, 0, 200, 1]),
            Err(ConfigError::WindowWidth(200))
        );
    }

    #[test]
    fn ring_must_fit_a_segment() {
        let cfg = TransportConfig {
            ring_capacity: MSS,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::RingCapacity(MSS)));
    }

    #[test]
    fn timeout_floor_must_be_positive() {
        let cfg = TransportConfig {
            min_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroTimeout));
    }

    #[test]
    fn idle_wait_must_be_positive() {
        let cfg = TransportConfig {
            idle_wait: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroTimeout));
    }

    #[test]
    fn loss_probability_scales_percent() {
        let p = SessionParams {
            loss_percent: 25,
            ..Default::default()
        };
        assert!((p.loss_probability() - 0.25).abs() < f64::EPSILON);
    }
}
