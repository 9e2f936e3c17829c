//! Single-slot event mailbox between the receive path and the sender loop.
//!
//! The sender loop is the only reader.  Writers are the application (posting
//! "new data queued") and the receiver loop (posting "ack for seqnum").  At
//! most one event is ever pending: a writer that finds the slot occupied
//! parks until the reader consumes it.  Events are never merged or dropped,
//! which throttles the network-reading side to the sender's pace.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TransportError};

/// A pending notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// New bytes were queued in the outbound ring.
    Data,
    /// The peer acknowledged this sequence number.
    Ack(u8),
}

/// Outcome of [`EventMailbox::wait_and_consume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Event(Event),
    TimedOut,
}

pub struct EventMailbox {
    slot: Mutex<Option<Event>>,
    posted: Notify,
    vacated: Notify,
    cancel: CancellationToken,
}

impl EventMailbox {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            slot: Mutex::new(None),
            posted: Notify::new(),
            vacated: Notify::new(),
            cancel,
        }
    }

    /// Peek at the pending event without consuming it.
    pub fn pending(&self) -> Option<Event> {
        *self.lock()
    }

    /// Clear the slot and release any parked writer.
    pub fn reset(&self) {
        *self.lock() = None;
        self.vacated.notify_waiters();
    }

    /// Wait up to `timeout` for an event, then take it and clear the slot.
    pub async fn wait_and_consume(&self, timeout: Duration) -> Result<Wake> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.posted.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let taken = self.lock().take();
            if let Some(event) = taken {
                self.vacated.notify_waiters();
                return Ok(Wake::Event(event));
            }
            if self.cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(Wake::TimedOut),
                _ = self.cancel.cancelled() => return Err(TransportError::Cancelled),
            }
        }
    }

    pub async fn post_data(&self) -> Result<()> {
        self.post(Event::Data).await
    }

    pub async fn post_ack(&self, seqnum: u8) -> Result<()> {
        self.post(Event::Ack(seqnum)).await
    }

    /// Park until the slot is empty, then store `event` and wake the reader.
    pub async fn post(&self, event: Event) -> Result<()> {
        loop {
            let notified = self.vacated.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            if self.try_post(event) {
                self.posted.notify_waiters();
                return Ok(());
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.cancel.cancelled() => return Err(TransportError::Cancelled),
            }
        }
    }

    fn try_post(&self, event: Event) -> bool {
        let mut slot = self.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(event);
        true
    }

    fn lock(&self) -> MutexGuard<'_, Option<Event>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
