//! Selective-repeat receive side.
//!
//! [`ReceiveWindow`] is the pure state machine: it buffers out-of-order
//! segments in per-sequence slots and releases the consecutive run at the
//! window base, in order.  [`ReceiverLoop`] is the task that reads the
//! socket, feeds data segments to the window, acknowledges them, and hands
//! acks for our own data to the sender through the mailbox.
//!
//! | Arrival                  | Stored | Acked | Delivered            |
//! |--------------------------|--------|-------|----------------------|
//! | in window, new           | yes    | yes   | run at base, if base |
//! | in window, already held  | no     | yes   | no                   |
//! | pre-window               | no     | yes   | no                   |
//! | anywhere else            | no     | no    | no                   |

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Result, TransportError};
use crate::mailbox::EventMailbox;
use crate::ring_buffer::RingBuffer;
use crate::segment::{encode_ack, Datagram, MAX_DATAGRAM, SEQ_SPACE};
use crate::socket::{is_transient, Socket};
use crate::stats::SessionStats;
use crate::window::{Position, SlidingWindow, WindowError};

/// What happened to one incoming data segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// Stored; `delivered` segments were released in order (0 unless the
    /// segment filled the base).
    Fresh { delivered: usize },
    /// Already held in the window.
    Duplicate,
    /// Already delivered; the peer missed our ack.
    Stale,
    /// Neither in the window nor just behind it.
    OutOfRange,
}

impl Arrival {
    /// Everything but out-of-range segments is acknowledged.
    pub fn needs_ack(&self) -> bool {
        !matches!(self, Arrival::OutOfRange)
    }
}

/// Receiver-side window plus the payloads held for reassembly.
#[derive(Debug)]
pub struct ReceiveWindow {
    window: SlidingWindow,
    slots: Vec<Vec<u8>>,
}

impl ReceiveWindow {
    pub fn new(width: u8) -> Result<Self, WindowError> {
        Ok(Self {
            window: SlidingWindow::new(width)?,
            slots: vec![Vec::new(); SEQ_SPACE],
        })
    }

    /// Next sequence number to be delivered.
    pub fn base(&self) -> u8 {
        self.window.base()
    }

    pub fn window(&self) -> &SlidingWindow {
        &self.window
    }

    /// Process a data segment.  In-order bytes released by this arrival are
    /// appended to `out`.
    pub fn accept(&mut self, seqnum: u8, payload: &[u8], out: &mut Vec<u8>) -> Arrival {
        let offset = match self.window.classify(seqnum) {
            Position::InWindow(offset) => offset,
            Position::PreWindow => return Arrival::Stale,
            Position::OutOfRange => return Arrival::OutOfRange,
        };
        if self.window.is_duplicate(offset) {
            return Arrival::Duplicate;
        }

        let slot = &mut self.slots[usize::from(seqnum)];
        slot.clear();
        slot.extend_from_slice(payload);
        if self.window.mark(seqnum).is_err() {
            return Arrival::OutOfRange;
        }

        if offset != 0 {
            return Arrival::Fresh { delivered: 0 };
        }
        let run = self.window.consecutive_run();
        let base = self.window.base();
        for i in 0..run {
            let seq = base.wrapping_add(i as u8);
            out.extend_from_slice(&self.slots[usize::from(seq)]);
        }
        self.window.advance(run);
        Arrival::Fresh { delivered: run }
    }
}

/// Why the receiver loop stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverExit {
    /// Nothing arrived within the idle timeout.
    IdleTimeout,
    /// The session was cancelled.
    Cancelled,
}

/// The receive-side task.
pub struct ReceiverLoop {
    socket: Arc<Socket>,
    inbound: Arc<RingBuffer>,
    mailbox: Arc<EventMailbox>,
    window: ReceiveWindow,
    idle_timeout: Duration,
    stats: Arc<SessionStats>,
    cancel: CancellationToken,
}

impl ReceiverLoop {
    pub fn new(
        socket: Arc<Socket>,
        inbound: Arc<RingBuffer>,
        mailbox: Arc<EventMailbox>,
        width: u8,
        idle_timeout: Duration,
        stats: Arc<SessionStats>,
        cancel: CancellationToken,
    ) -> Result<Self, WindowError> {
        Ok(Self {
            socket,
            inbound,
            mailbox,
            window: ReceiveWindow::new(width)?,
            idle_timeout,
            stats,
            cancel,
        })
    }

    pub async fn run(mut self) -> Result<ReceiverExit> {
        // one spare byte so an oversized datagram shows up as a length error
        let mut buf = vec![0u8; MAX_DATAGRAM + 1];
        let mut deliver = Vec::new();

        loop {
            let recv = tokio::select! {
                r = tokio::time::timeout(self.idle_timeout, self.socket.recv(&mut buf)) => r,
                _ = self.cancel.cancelled() => return Ok(ReceiverExit::Cancelled),
            };
            let n = match recv {
                Err(_elapsed) => {
                    log::info!("[sr] no datagram for {:?}; closing", self.idle_timeout);
                    return Ok(ReceiverExit::IdleTimeout);
                }
                Ok(Ok(n)) => n,
                Ok(Err(e)) if is_transient(&e) => {
                    log::debug!("[sr] recv: peer unreachable: {e}");
                    continue;
                }
                Ok(Err(e)) => return Err(e.into()),
            };

            let outcome = match Datagram::decode(&buf[..n]) {
                Ok(Datagram::Ack(seqnum)) => self.mailbox.post_ack(seqnum).await,
                Ok(Datagram::Data { seqnum, payload }) => {
                    self.on_data(seqnum, payload, &mut deliver).await
                }
                Err(e) => {
                    log::warn!("[sr] discarding {n} byte datagram: {e}");
                    self.stats.record_discarded();
                    Ok(())
                }
            };
            match outcome {
                Ok(()) => {}
                Err(TransportError::Cancelled | TransportError::Closed) => {
                    return Ok(ReceiverExit::Cancelled)
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn on_data(&mut self, seqnum: u8, payload: &[u8], deliver: &mut Vec<u8>) -> Result<()> {
        deliver.clear();
        let arrival = self.window.accept(seqnum, payload, deliver);
        log::debug!(
            "[sr] ← DATA seq={seqnum} len={} {arrival:?} base={}",
            payload.len(),
            self.window.base()
        );

        match arrival {
            Arrival::Fresh { .. } => self.stats.record_received(false),
            Arrival::Duplicate | Arrival::Stale => self.stats.record_received(true),
            Arrival::OutOfRange => {
                log::warn!(
                    "[sr] seq={seqnum} outside window base={}, dropped",
                    self.window.base()
                );
                self.stats.record_discarded();
            }
        }

        if arrival.needs_ack() {
            if let Err(e) = self.socket.send_unreliable(&encode_ack(seqnum)).await {
                if !is_transient(&e) {
                    return Err(e.into());
                }
                log::debug!("[sr] ack seq={seqnum} refused by peer: {e}");
            }
            log::trace!("[sr] → ACK seq={seqnum}");
        }

        if !deliver.is_empty() {
            self.inbound.put(deliver).await?;
            self.stats.record_delivered(deliver.len() as u64);
        }
        Ok(())
    }
}
