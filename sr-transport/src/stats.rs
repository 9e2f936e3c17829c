//! Per-session counters shared between the loops and the application.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters updated by the sender and receiver loops.
#[derive(Debug, Default)]
pub struct SessionStats {
    segments_sent: AtomicU64,
    retransmissions: AtomicU64,
    acks_received: AtomicU64,
    segments_received: AtomicU64,
    duplicates: AtomicU64,
    bytes_acked: AtomicU64,
    bytes_delivered: AtomicU64,
    discarded: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Data datagrams written, first transmissions and retransmissions.
    pub segments_sent: u64,
    pub retransmissions: u64,
    pub acks_received: u64,
    pub segments_received: u64,
    /// Data segments that were already received or already delivered.
    pub duplicates: u64,
    /// Payload bytes the peer acknowledged in order.
    pub bytes_acked: u64,
    /// Payload bytes handed to the inbound ring.
    pub bytes_delivered: u64,
    /// Malformed datagrams and out-of-range segments.
    pub discarded: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, retransmission: bool) {
        self.segments_sent.fetch_add(1, Ordering::Relaxed);
        if retransmission {
            self.retransmissions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_ack(&self) {
        self.acks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_acked_bytes(&self, bytes: u64) {
        self.bytes_acked.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_received(&self, duplicate: bool) {
        self.segments_received.fetch_add(1, Ordering::Relaxed);
        if duplicate {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_delivered(&self, bytes: u64) {
        self.bytes_delivered.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            segments_sent: self.segments_sent.load(Ordering::Relaxed),
            retransmissions: self.retransmissions.load(Ordering::Relaxed),
            acks_received: self.acks_received.load(Ordering::Relaxed),
            segments_received: self.segments_received.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            bytes_acked: self.bytes_acked.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}
