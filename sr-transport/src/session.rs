//! One reliable byte-stream session over a connected UDP socket.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │ send()                                         recv() ▲
//!      ▼                                                       │
//!  ┌──────────────┐   post_data   ┌─────────┐         ┌──────────────┐
//!  │ outbound ring│ ─────────────▶│ mailbox │         │ inbound ring │
//!  └──────┬───────┘               └────┬────┘         └──────▲───────┘
//!         │ try_take                   │ wait_and_consume    │ put
//!         ▼                            ▼                     │
//!  ┌─────────────────────────────────────────┐  post_ack ┌───┴──────────┐
//!  │ SenderLoop (window, timers, RTT)        │◀──────────│ ReceiverLoop │
//!  └───────────────────┬─────────────────────┘           └──────▲───────┘
//!                      │ send_unreliable                         │ recv
//!                      ▼                                         │
//!                 ───────────────── Arc<Socket> ──────────────────
//! ```
//!
//! The two loops run as separate tokio tasks and share nothing but the two
//! rings, the mailbox and the socket.  A session-wide
//! [`CancellationToken`] reaches every place either loop can wait, so
//! [`TransportSession::close`] never has to tear the socket down underneath
//! them.
//!
//! # Usage
//!
//! ```ignore
//! let socket = Socket::bind(local).await?;
//! socket.connect(peer).await?;
//! let session = TransportSession::start(socket, params, TransportConfig::default())?;
//! session.send(b"hello").await?;
//! session.flush().await?;
//! session.close().await?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::config::{SessionParams, TransportConfig};
use crate::error::{Result, TransportError};
use crate::mailbox::EventMailbox;
use crate::receiver::{ReceiverExit, ReceiverLoop};
use crate::ring_buffer::RingBuffer;
use crate::segment::MSS;
use crate::sender::SenderLoop;
use crate::simulator;
use crate::socket::Socket;
use crate::state::SessionState;
use crate::stats::{SessionStats, StatsSnapshot};

/// Handle to a running session.
///
/// Dropping the handle cancels both loops; [`close`](Self::close) also
/// waits for them.
pub struct TransportSession {
    socket: Arc<Socket>,
    outbound: Arc<RingBuffer>,
    inbound: Arc<RingBuffer>,
    mailbox: Arc<EventMailbox>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<SessionState>>,
    stats: Arc<SessionStats>,
    progress: watch::Receiver<u64>,
    /// Bytes accepted by `send` so far.
    queued: AtomicU64,
    /// Largest write handed to the outbound ring in one piece.
    chunk_len: usize,
    sender: JoinHandle<Result<()>>,
    receiver: JoinHandle<Result<()>>,
    _guard: DropGuard,
}

impl TransportSession {
    /// Wire both loops to `socket`, which must already be connected to the
    /// peer, and spawn them on the current runtime.
    ///
    /// A non-zero `params.loss_percent` installs a random loss model on the
    /// socket; at zero the socket keeps whatever model it already has.
    pub fn start(socket: Socket, params: SessionParams, config: TransportConfig) -> Result<Self> {
        params.validate()?;
        config.validate()?;

        if params.loss_percent > 0 {
            socket.set_loss(simulator::from_percent(params.loss_percent));
        }
        let socket = Arc::new(socket);
        let cancel = CancellationToken::new();
        let outbound = Arc::new(RingBuffer::new(config.ring_capacity, cancel.clone()));
        let inbound = Arc::new(RingBuffer::new(config.ring_capacity, cancel.clone()));
        let mailbox = Arc::new(EventMailbox::new(cancel.clone()));
        let stats = Arc::new(SessionStats::new());
        let (state, _) = watch::channel(SessionState::Established);
        let state = Arc::new(state);
        let (progress_tx, progress) = watch::channel(0);

        let sender_loop = SenderLoop::new(
            socket.clone(),
            outbound.clone(),
            mailbox.clone(),
            &params,
            &config,
            stats.clone(),
            progress_tx,
        )?;
        let receiver_loop = ReceiverLoop::new(
            socket.clone(),
            inbound.clone(),
            mailbox.clone(),
            params.window_width,
            config.idle_timeout,
            stats.clone(),
            cancel.clone(),
        )?;

        let teardown = Teardown {
            outbound: outbound.clone(),
            inbound: inbound.clone(),
            cancel: cancel.clone(),
            state: state.clone(),
        };

        let sender = tokio::spawn({
            let teardown = teardown.clone();
            async move {
                let result = sender_loop.run().await;
                if let Err(e) = &result {
                    log::error!("[sr] sender loop failed: {e}");
                    teardown.finish(SessionState::Failed);
                }
                result
            }
        });
        let receiver = tokio::spawn(async move {
            match receiver_loop.run().await {
                Ok(ReceiverExit::IdleTimeout) => {
                    teardown.finish(SessionState::IdleClosed);
                    Ok(())
                }
                Ok(ReceiverExit::Cancelled) => Ok(()),
                Err(e) => {
                    log::error!("[sr] receiver loop failed: {e}");
                    teardown.finish(SessionState::Failed);
                    Err(e)
                }
            }
        });

        log::info!(
            "[sr] session {} ↔ {:?} established (width={} timeout={}ms loss={}% adaptive={})",
            socket.local_addr,
            socket.peer_addr().ok(),
            params.window_width,
            params.timeout_ms,
            params.loss_percent,
            params.adaptive
        );

        let chunk_len = (config.ring_capacity - 1) / MSS * MSS;
        Ok(Self {
            socket,
            outbound,
            inbound,
            mailbox,
            _guard: cancel.clone().drop_guard(),
            cancel,
            state,
            stats,
            progress,
            queued: AtomicU64::new(0),
            chunk_len,
            sender,
            receiver,
        })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.socket.local_addr
    }

    /// Queue all of `data` for delivery.  Returns once every byte is in the
    /// outbound ring, not when it has been acknowledged.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(self.chunk_len) {
            self.outbound
                .put_segmented(chunk, MSS)
                .await
                .map_err(|e| self.lifecycle_error(e))?;
            self.queued.fetch_add(chunk.len() as u64, Ordering::AcqRel);
            self.mailbox
                .post_data()
                .await
                .map_err(|e| self.lifecycle_error(e))?;
        }
        Ok(())
    }

    /// Read whatever is available, up to `buf.len()` bytes.  `Ok(0)` means
    /// the session ended and everything received was read.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        self.inbound
            .get(buf)
            .await
            .map_err(|e| self.lifecycle_error(e))
    }

    /// Fill `buf` completely.
    pub async fn recv_exact(&self, buf: &mut [u8]) -> Result<()> {
        self.inbound
            .get_exact(buf)
            .await
            .map_err(|e| self.lifecycle_error(e))
    }

    /// Read a zero-terminated string of at most `max` bytes.  An empty string
    /// is returned when the stream is already at its end.
    pub async fn recv_terminated_string(&self, max: usize) -> Result<String> {
        let bytes = self
            .inbound
            .read_terminated(max)
            .await
            .map_err(|e| self.lifecycle_error(e))?;
        Ok(String::from_utf8(bytes)?)
    }

    /// Wait until the peer acknowledged every byte passed to
    /// [`send`](Self::send) before this call.
    pub async fn flush(&self) -> Result<()> {
        let target = self.queued.load(Ordering::Acquire);
        let mut progress = self.progress.clone();
        let outcome = tokio::select! {
            biased;
            r = progress.wait_for(|&acked| acked >= target) => {
                r.map(|_| ()).map_err(|_| self.lifecycle_error(TransportError::Closed))
            }
            _ = self.cancel.cancelled() => Err(self.lifecycle_error(TransportError::Cancelled)),
        };
        outcome
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Wait for the session to reach a terminal state.
    pub async fn closed(&self) -> SessionState {
        let mut rx = self.state.subscribe();
        let reached = match rx.wait_for(|s| s.is_terminal()).await {
            Ok(s) => *s,
            Err(_) => self.state(),
        };
        reached
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Cancel both loops and wait for them to stop.  Unacknowledged data is
    /// abandoned; call [`flush`](Self::flush) first to avoid that.
    pub async fn close(self) -> Result<()> {
        Teardown {
            outbound: self.outbound.clone(),
            inbound: self.inbound.clone(),
            cancel: self.cancel.clone(),
            state: self.state.clone(),
        }
        .finish(SessionState::Cancelled);

        let (sender, receiver) = tokio::join!(self.sender, self.receiver);
        let stats = self.stats.snapshot();
        log::info!(
            "[sr] session {} closed: sent={} retransmitted={} delivered={}B",
            self.socket.local_addr,
            stats.segments_sent,
            stats.retransmissions,
            stats.bytes_delivered
        );
        join_result(sender)?;
        join_result(receiver)?;
        Ok(())
    }

    /// Ring and mailbox errors only say "the session ended"; report which
    /// way it ended.
    fn lifecycle_error(&self, e: TransportError) -> TransportError {
        if !e.is_lifecycle() {
            return e;
        }
        match self.state() {
            SessionState::IdleClosed => TransportError::Closed,
            SessionState::Failed => TransportError::TaskFailed("socket I/O failed".into()),
            _ => e,
        }
    }
}

/// End-of-session actions shared by the loop tasks and `close`.
#[derive(Clone)]
struct Teardown {
    outbound: Arc<RingBuffer>,
    inbound: Arc<RingBuffer>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<SessionState>>,
}

impl Teardown {
    /// Record `terminal` unless another terminal state won, close the rings
    /// so readers drain and then see end-of-stream, and cancel every wait.
    fn finish(&self, terminal: SessionState) {
        let changed = self.state.send_if_modified(|s| {
            if s.is_terminal() {
                return false;
            }
            *s = terminal;
            true
        });
        if changed {
            log::debug!("[sr] session → {terminal}");
        }
        self.inbound.close();
        self.outbound.close();
        self.cancel.cancel();
    }
}

fn join_result(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(TransportError::TaskFailed(e.to_string())),
    }
}
