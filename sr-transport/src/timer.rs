//! Retransmission timer queue and adaptive timeout estimation.
//!
//! Reliable delivery requires that unacknowledged segments are re-sent if no
//! ACK arrives within a bounded time.  This module provides:
//! - [`RetransmitQueue`] — in-flight packets ordered by expiry, so the sender
//!   loop always knows how long it may sleep.
//! - [`RttEstimator`] — the smoothed RTT / deviation pair that drives the
//!   adaptive timeout:
//!
//! ```text
//!   estimated = 7/8 · estimated + 1/8 · sample
//!   deviation = 3/4 · deviation + 1/4 · |sample − estimated|
//!   timeout   = max(estimated + 4 · deviation, floor)
//! ```
//!
//! Samples from retransmitted packets are discarded (Karn's algorithm): their
//! ack cannot be matched to one particular transmission.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::sender::Packet;

/// A reference to a packet in the sender's table, keyed by the expiry it was
/// queued with.  The queue never owns packet data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEntry {
    pub expire_at: Instant,
    pub seqnum: u8,
}

/// How long until the head of the queue expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// The earliest packet has already expired.
    Expired,
    /// Sleep this long (or the idle wait, if nothing is queued).
    In(Duration),
}

/// In-flight packets sorted ascending by expiry.
#[derive(Debug, Default)]
pub struct RetransmitQueue {
    entries: VecDeque<TimerEntry>,
}

impl RetransmitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert keeping ascending order.  Equal expiries keep insertion order.
    pub fn insert_sorted(&mut self, entry: TimerEntry) {
        let at = self
            .entries
            .partition_point(|e| e.expire_at <= entry.expire_at);
        self.entries.insert(at, entry);
    }

    pub fn peek_earliest(&self) -> Option<&TimerEntry> {
        self.entries.front()
    }

    pub fn pop_earliest(&mut self) -> Option<TimerEntry> {
        self.entries.pop_front()
    }

    /// Pop the head only if it has expired at `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<TimerEntry> {
        match self.peek_earliest() {
            Some(e) if e.expire_at <= now => self.pop_earliest(),
            _ => None,
        }
    }

    /// Remaining time until the earliest expiry; `idle_wait` when empty so
    /// the caller still wakes up periodically.
    pub fn time_until_earliest(&self, now: Instant, idle_wait: Duration) -> Deadline {
        match self.peek_earliest() {
            None => Deadline::In(idle_wait),
            Some(e) if now >= e.expire_at => Deadline::Expired,
            Some(e) => Deadline::In(e.expire_at - now),
        }
    }
}

/// Session-scoped RTT estimator.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    estimated: Duration,
    deviation: Duration,
    floor: Duration,
    timeout: Duration,
}

impl RttEstimator {
    /// `initial_rtt` seeds the estimate; `initial_timeout` is reported until
    /// the first sample arrives; `floor` bounds every computed timeout.
    pub fn new(initial_rtt: Duration, initial_timeout: Duration, floor: Duration) -> Self {
        Self {
            estimated: initial_rtt,
            deviation: Duration::ZERO,
            floor,
            timeout: initial_timeout,
        }
    }

    pub fn estimated_rtt(&self) -> Duration {
        self.estimated
    }

    pub fn deviation_rtt(&self) -> Duration {
        self.deviation
    }

    /// Current retransmission timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fold one round-trip sample in and return the new timeout.
    pub fn sample(&mut self, rtt: Duration) -> Duration {
        self.estimated = self.estimated * 7 / 8 + rtt / 8;
        self.deviation = self.deviation * 3 / 4 + abs_diff(rtt, self.estimated) / 4;
        self.timeout = (self.estimated + self.deviation * 4).max(self.floor);
        self.timeout
    }

    /// Sample the round trip of `packet`, acknowledged at `now`.
    ///
    /// Returns `None` and leaves the estimate untouched for retransmitted
    /// packets.
    pub fn on_ack(&mut self, packet: &Packet, now: Instant) -> Option<Duration> {
        if packet.retransmitted {
            return None;
        }
        let rtt = now.saturating_duration_since(packet.sent_at);
        Some(self.sample(rtt))
    }
}

fn abs_diff(a: Duration, b: Duration) -> Duration {
    if a > b {
        a - b
    } else {
        b - a
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(base: Instant, ms: u64, seqnum: u8) -> TimerEntry {
        TimerEntry {
            expire_at: base + Duration::from_millis(ms),
            seqnum,
        }
    }

    #[test]
    fn insert_keeps_ascending_order() {
        let now = Instant::now();
        let mut q = RetransmitQueue::new();
        for (ms, seq) in [(30, 3), (10, 1), (20, 2), (5, 0)] {
            q.insert_sorted(entry(now, ms, seq));
        }
        let order: Vec<u8> = std::iter::from_fn(|| q.pop_earliest())
            .map(|e| e.seqnum)
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn equal_expiries_are_stable() {
        let now = Instant::now();
        let mut q = RetransmitQueue::new();
        q.insert_sorted(entry(now, 10, 7));
        q.insert_sorted(entry(now, 10, 8));
        q.insert_sorted(entry(now, 10, 9));
        assert_eq!(q.pop_earliest().unwrap().seqnum, 7);
        assert_eq!(q.pop_earliest().unwrap().seqnum, 8);
        assert_eq!(q.pop_earliest().unwrap().seqnum, 9);
    }

    #[test]
    fn time_until_earliest_variants() {
        let now = Instant::now();
        let idle = Duration::from_secs(15);
        let mut q = RetransmitQueue::new();
        assert_eq!(q.time_until_earliest(now, idle), Deadline::In(idle));

        q.insert_sorted(entry(now, 40, 1));
        assert_eq!(
            q.time_until_earliest(now, idle),
            Deadline::In(Duration::from_millis(40))
        );
        let later = now + Duration::from_millis(40);
        assert_eq!(q.time_until_earliest(later, idle), Deadline::Expired);
    }

    #[test]
    fn pop_expired_only_takes_due_entries() {
        let now = Instant::now();
        let mut q = RetransmitQueue::new();
        q.insert_sorted(entry(now, 0, 1));
        q.insert_sorted(entry(now, 100, 2));
        assert_eq!(q.pop_expired(now).map(|e| e.seqnum), Some(1));
        assert_eq!(q.pop_expired(now), None);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn estimate_converges_to_repeated_sample() {
        let mut rtt = RttEstimator::new(
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_millis(250),
        );
        let x = Duration::from_millis(80);
        for _ in 0..200 {
            rtt.sample(x);
        }
        assert!(abs_diff(rtt.estimated_rtt(), x) < Duration::from_micros(10));
        assert!(rtt.deviation_rtt() < Duration::from_micros(10));
    }

    #[test]
    fn timeout_never_below_floor() {
        let floor = Duration::from_millis(250);
        let mut rtt = RttEstimator::new(Duration::from_secs(1), Duration::from_secs(1), floor);
        for _ in 0..500 {
            let t = rtt.sample(Duration::from_micros(50));
            assert!(t >= floor);
        }
        assert_eq!(rtt.timeout(), floor);
    }

    #[test]
    fn first_sample_follows_formula() {
        let mut rtt = RttEstimator::new(
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::ZERO,
        );
        let t = rtt.sample(Duration::from_millis(200));
        // est = 875ms + 25ms = 900ms, dev = |200 - 900| / 4 = 175ms
        assert_eq!(rtt.estimated_rtt(), Duration::from_millis(900));
        assert_eq!(rtt.deviation_rtt(), Duration::from_millis(175));
        assert_eq!(t, Duration::from_millis(1600));
    }

    #[test]
    fn retransmitted_packets_are_not_sampled() {
        let now = Instant::now();
        let mut rtt = RttEstimator::new(
            Duration::from_secs(1),
            Duration::from_millis(500),
            Duration::from_millis(250),
        );
        let mut pkt = Packet::new();
        pkt.sent_at = now;
        pkt.retransmitted = true;
        assert_eq!(rtt.on_ack(&pkt, now + Duration::from_millis(10)), None);
        assert_eq!(rtt.estimated_rtt(), Duration::from_secs(1));
        assert_eq!(rtt.timeout(), Duration::from_millis(500));

        pkt.retransmitted = false;
        assert!(rtt.on_ack(&pkt, now + Duration::from_millis(10)).is_some());
        assert!(rtt.estimated_rtt() < Duration::from_secs(1));
    }
}
