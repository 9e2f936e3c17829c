//! Selective-repeat send side.
//!
//! [`SenderLoop`] owns everything about outbound data once the application
//! has queued it: the packet table, the sender window, the retransmission
//! queue and the RTT estimator.  It is driven entirely by the session
//! mailbox, which carries "data queued" and "ack for seqnum" events.
//!
//! # Sequence-number layout
//!
//! ```text
//!   base            next_unsent        next_free        base + width
//!    │                   │                 │                  │
//!  ──┼───────────────────┼─────────────────┼──────────────────┼──▶ seq (mod 256)
//!    │ <── in flight ──▶ │ <─ packetized ─▶│ <── free slots ─▶│
//! ```
//!
//! - At most `width` sequence numbers are assigned past `base`.
//! - Every sent, unresolved packet has exactly one live entry in the
//!   retransmission queue.  Entries outside `[base, next_unsent)`, or whose
//!   expiry no longer matches the packet, are stale and skipped.
//! - Acks only mark; only an ack at `base` slides the window.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::{SessionParams, TransportConfig};
use crate::error::{Result, TransportError};
use crate::mailbox::{Event, EventMailbox, Wake};
use crate::ring_buffer::RingBuffer;
use crate::segment::{encode_data_into, MAX_DATAGRAM, MSS, SEQ_SPACE};
use crate::socket::{is_transient, Socket};
use crate::stats::SessionStats;
use crate::timer::{Deadline, RetransmitQueue, RttEstimator, TimerEntry};
use crate::window::{SlidingWindow, WindowError};

/// One slot of the packet table.
///
/// The payload buffer keeps its capacity when the slot is recycled, so the
/// steady state performs no per-segment allocation.
#[derive(Debug, Clone)]
pub struct Packet {
    pub payload: Vec<u8>,
    /// Time of the most recent transmission.
    pub sent_at: Instant,
    /// When the most recent transmission times out.
    pub expire_at: Instant,
    /// Set once the packet was sent more than once; excludes it from RTT
    /// sampling.
    pub retransmitted: bool,
}

impl Packet {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            payload: Vec::new(),
            sent_at: now,
            expire_at: now,
            retransmitted: false,
        }
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::new()
    }
}

/// The send-side state machine, run as its own task.
pub struct SenderLoop {
    socket: Arc<Socket>,
    outbound: Arc<RingBuffer>,
    mailbox: Arc<EventMailbox>,

    window: SlidingWindow,
    packets: Vec<Packet>,
    timers: RetransmitQueue,
    rtt: RttEstimator,
    adaptive: bool,
    fixed_timeout: Duration,
    idle_wait: Duration,

    /// Next sequence number to assign to a new packet.
    next_free: u8,
    /// Oldest assigned sequence number not yet transmitted.
    next_unsent: u8,

    /// Encode buffer reused for every datagram.
    scratch: Vec<u8>,
    acked_bytes: u64,
    progress: watch::Sender<u64>,
    stats: Arc<SessionStats>,
}

impl SenderLoop {
    /// `progress` receives the running total of payload bytes acknowledged
    /// in order.
    pub fn new(
        socket: Arc<Socket>,
        outbound: Arc<RingBuffer>,
        mailbox: Arc<EventMailbox>,
        params: &SessionParams,
        config: &TransportConfig,
        stats: Arc<SessionStats>,
        progress: watch::Sender<u64>,
    ) -> Result<Self, WindowError> {
        Ok(Self {
            socket,
            outbound,
            mailbox,
            window: SlidingWindow::new(params.window_width)?,
            packets: vec![Packet::new(); SEQ_SPACE],
            timers: RetransmitQueue::new(),
            rtt: RttEstimator::new(config.initial_rtt, params.timeout(), config.min_timeout),
            adaptive: params.adaptive,
            fixed_timeout: params.timeout(),
            idle_wait: config.idle_wait,
            next_free: 0,
            next_unsent: 0,
            scratch: Vec::with_capacity(MAX_DATAGRAM),
            acked_bytes: 0,
            progress,
            stats,
        })
    }

    /// Run until the session is cancelled.  Only socket failures are errors.
    pub async fn run(mut self) -> Result<()> {
        self.mailbox.reset();
        log::debug!(
            "[sr] sender up: width={} adaptive={} timeout={:?}",
            self.window.width(),
            self.adaptive,
            self.current_timeout()
        );

        loop {
            // also picks up bytes queued before the reset above swallowed
            // their event
            self.packetize();
            self.transmit_pending().await?;
            self.resend_expired().await?;

            let wait = match self
                .timers
                .time_until_earliest(Instant::now(), self.idle_wait)
            {
                Deadline::Expired => Duration::ZERO,
                Deadline::In(d) => d,
            };

            match self.mailbox.wait_and_consume(wait).await {
                Ok(Wake::TimedOut) => {}
                Ok(Wake::Event(Event::Data)) => {}
                Ok(Wake::Event(Event::Ack(seqnum))) => self.on_ack(seqnum),
                Err(TransportError::Cancelled) => {
                    log::debug!("[sr] sender cancelled; window {}", self.window);
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn current_timeout(&self) -> Duration {
        if self.adaptive {
            self.rtt.timeout()
        } else {
            self.fixed_timeout
        }
    }

    /// Sequence numbers `[base, next_unsent)` have been put on the wire.
    fn was_sent(&self, seqnum: u8) -> bool {
        self.window.distance(seqnum) < self.window.distance(self.next_unsent)
    }

    fn on_ack(&mut self, seqnum: u8) {
        self.stats.record_ack();

        if !self.was_sent(seqnum) {
            if self.window.in_prewindow(seqnum) {
                log::trace!("[sr] ← ACK seq={seqnum} behind base, ignored");
            } else {
                log::warn!(
                    "[sr] ← ACK seq={seqnum} for unsent data (base={} next={}), ignored",
                    self.window.base(),
                    self.next_unsent
                );
            }
            return;
        }
        if self.window.is_resolved(seqnum) {
            log::trace!("[sr] ← ACK seq={seqnum} duplicate");
            return;
        }

        if self.adaptive {
            let packet = &self.packets[usize::from(seqnum)];
            if let Some(timeout) = self.rtt.on_ack(packet, Instant::now()) {
                log::trace!(
                    "[sr] rtt est={:?} dev={:?} timeout={timeout:?}",
                    self.rtt.estimated_rtt(),
                    self.rtt.deviation_rtt()
                );
            }
        }

        let base = self.window.base();
        let slid = self.window.acknowledge(seqnum);
        if slid > 0 {
            let bytes: u64 = (0..slid)
                .map(|i| {
                    let seq = base.wrapping_add(i as u8);
                    self.packets[usize::from(seq)].payload.len() as u64
                })
                .sum();
            self.acked_bytes += bytes;
            self.stats.record_acked_bytes(bytes);
            self.progress.send_replace(self.acked_bytes);
        }
        log::debug!("[sr] ← ACK seq={seqnum} slid={slid} window {}", self.window);
    }

    /// Retransmit every packet whose timer has fired and that is still
    /// unacknowledged.
    async fn resend_expired(&mut self) -> Result<()> {
        let now = Instant::now();
        while let Some(entry) = self.timers.pop_expired(now) {
            let seqnum = entry.seqnum;
            // a recycled slot is back in the window before it is sent again;
            // its previous lap's entry must not resend old bytes
            if !self.was_sent(seqnum) {
                continue;
            }
            if self.packets[usize::from(seqnum)].expire_at != entry.expire_at {
                continue;
            }
            if self.window.is_resolved(seqnum) {
                continue;
            }
            self.transmit(seqnum, true).await?;
        }
        Ok(())
    }

    /// Move outbound bytes into free window slots, one MSS at most per
    /// packet.
    fn packetize(&mut self) {
        while self.window.distance(self.next_free) < usize::from(self.window.width()) {
            let packet = &mut self.packets[usize::from(self.next_free)];
            packet.payload.clear();
            if self.outbound.try_take(&mut packet.payload, MSS) == 0 {
                break;
            }
            packet.retransmitted = false;
            self.next_free = self.next_free.wrapping_add(1);
        }
    }

    async fn transmit_pending(&mut self) -> Result<()> {
        while self.next_unsent != self.next_free {
            let seqnum = self.next_unsent;
            self.transmit(seqnum, false).await?;
            self.next_unsent = self.next_unsent.wrapping_add(1);
        }
        Ok(())
    }

    async fn transmit(&mut self, seqnum: u8, retransmission: bool) -> Result<()> {
        let timeout = self.current_timeout();
        let now = Instant::now();

        let packet = &mut self.packets[usize::from(seqnum)];
        packet.sent_at = now;
        packet.expire_at = now + timeout;
        packet.retransmitted |= retransmission;
        let expire_at = packet.expire_at;
        let len = packet.payload.len();
        encode_data_into(seqnum, &packet.payload, &mut self.scratch);

        if let Err(e) = self.socket.send_unreliable(&self.scratch).await {
            if !is_transient(&e) {
                return Err(e.into());
            }
            log::debug!("[sr] send seq={seqnum} refused by peer: {e}");
        }

        self.timers.insert_sorted(TimerEntry { expire_at, seqnum });
        self.stats.record_sent(retransmission);
        if retransmission {
            log::debug!("[sr] → DATA seq={seqnum} len={len} (retransmit, timeout={timeout:?})");
        } else {
            log::debug!("[sr] → DATA seq={seqnum} len={len}");
        }
        Ok(())
    }
}
