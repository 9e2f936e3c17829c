//! Bounded byte ring shared between the application and a session loop.
//!
//! Each session owns two: the outbound ring (application → sender loop) and
//! the inbound ring (receiver loop → application).  A ring is a monitor: all
//! access goes through one `std::sync::Mutex` that is never held across an
//! `.await`, and the two sides park on `tokio::sync::Notify` ("not empty",
//! "not full") while the ring is empty or full.
//!
//! One slot is always kept unused so that `start == end` unambiguously means
//! empty:
//!
//! ```text
//!   available = (end − start) mod capacity
//!   free      = capacity − 1 − available
//! ```
//!
//! Exactly one producer and one consumer per ring are supported.

use std::ops::Range;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TransportError};

/// Bytes readable in a ring of `capacity` with the given indices.
pub fn available(start: usize, end: usize, capacity: usize) -> usize {
    (end + capacity - start) % capacity
}

/// Bytes writable in a ring of `capacity` with the given indices.
pub fn free(start: usize, end: usize, capacity: usize) -> usize {
    capacity - 1 - available(start, end, capacity)
}

/// Physical ranges touched by an `n`-byte copy beginning at `begin`.  The
/// second range is empty unless the copy crosses the end of storage.
pub fn wrap_ranges(begin: usize, n: usize, capacity: usize) -> (Range<usize>, Range<usize>) {
    let first = n.min(capacity - begin);
    (begin..begin + first, 0..n - first)
}

struct Ring {
    start: usize,
    end: usize,
    closed: bool,
    storage: Box<[u8]>,
}

impl Ring {
    fn capacity(&self) -> usize {
        self.storage.len()
    }

    fn available(&self) -> usize {
        available(self.start, self.end, self.capacity())
    }

    fn free(&self) -> usize {
        free(self.start, self.end, self.capacity())
    }

    /// Caller guarantees `data.len() <= self.free()`.
    fn write(&mut self, data: &[u8]) {
        let (a, b) = wrap_ranges(self.end, data.len(), self.capacity());
        let split = a.len();
        self.storage[a].copy_from_slice(&data[..split]);
        self.storage[b].copy_from_slice(&data[split..]);
        self.end = (self.end + data.len()) % self.capacity();
    }

    fn read(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.available());
        let (a, b) = wrap_ranges(self.start, n, self.capacity());
        let split = a.len();
        out[..split].copy_from_slice(&self.storage[a]);
        out[split..n].copy_from_slice(&self.storage[b]);
        self.start = (self.start + n) % self.capacity();
        n
    }

    fn pop(&mut self) -> u8 {
        let byte = self.storage[self.start];
        self.start = (self.start + 1) % self.capacity();
        byte
    }
}

/// Blocking bounded byte FIFO.
pub struct RingBuffer {
    ring: Mutex<Ring>,
    not_empty: Notify,
    not_full: Notify,
    cancel: CancellationToken,
}

impl RingBuffer {
    /// Create a ring holding at most `capacity − 1` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity < 2`.
    pub fn new(capacity: usize, cancel: CancellationToken) -> Self {
        assert!(capacity >= 2, "ring capacity must be at least 2");
        Self {
            ring: Mutex::new(Ring {
                start: 0,
                end: 0,
                closed: false,
                storage: vec![0u8; capacity].into_boxed_slice(),
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            cancel,
        }
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    pub fn available(&self) -> usize {
        self.lock().available()
    }

    pub fn free(&self) -> usize {
        self.lock().free()
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Mark end-of-stream.  Readers drain what is left and then see EOF;
    /// writers fail with [`TransportError::Closed`].
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    /// Write all of `data`, waiting for space as needed.  Each round writes
    /// as much as currently fits.
    pub async fn put(&self, data: &[u8]) -> Result<()> {
        self.put_segmented(data, 1).await
    }

    /// Write all of `data` in multiples of `quantum`.
    ///
    /// While at least one quantum remains, each round waits for room for one
    /// quantum and then claims as many whole quanta as fit.  A remainder
    /// smaller than one quantum is written in a single piece.
    pub async fn put_segmented(&self, data: &[u8], quantum: usize) -> Result<()> {
        let quantum = quantum.max(1);
        let capacity = self.capacity();
        if quantum > capacity - 1 {
            return Err(TransportError::Oversized {
                len: quantum,
                capacity,
            });
        }

        let mut left = data;
        while !left.is_empty() {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_put_chunk(left, quantum)? {
                Some(n) => {
                    left = &left[n..];
                    self.not_empty.notify_waiters();
                }
                None => self.park(notified).await,
            }
        }
        Ok(())
    }

    /// Read up to `buf.len()` bytes, waiting while the ring is empty.
    ///
    /// Returns `Ok(0)` only once the ring is closed and drained (or when
    /// `buf` is empty).
    pub async fn get(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(n) = self.try_get_chunk(buf)? {
                if n > 0 {
                    self.not_full.notify_waiters();
                }
                return Ok(n);
            }
            self.park(notified).await;
        }
    }

    /// Fill `buf` completely, looping over [`get`](Self::get).
    pub async fn get_exact(&self, buf: &mut [u8]) -> Result<()> {
        let mut read = 0;
        while read < buf.len() {
            match self.get(&mut buf[read..]).await? {
                0 => return Err(TransportError::Closed),
                n => read += n,
            }
        }
        Ok(())
    }

    /// Read a zero-terminated string of at most `max` bytes (terminator not
    /// counted, not returned).
    ///
    /// Returns an empty vector when the stream is already at end-of-stream.
    /// Fails with [`TransportError::Unterminated`] when `max` bytes pass
    /// without a terminator and with [`TransportError::Closed`] when the
    /// stream ends mid-string.
    pub async fn read_terminated(&self, max: usize) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_scan_terminated(&mut out, max)? {
                Scan::Terminated => return Ok(out),
                Scan::Eof if out.is_empty() => return Ok(out),
                Scan::Eof => return Err(TransportError::Closed),
                Scan::Capped => return Err(TransportError::Unterminated { max }),
                Scan::Progress => self.not_full.notify_waiters(),
                Scan::Empty => self.park(notified).await,
            }
        }
    }

    /// Move up to `max` bytes into `out` without waiting.  Returns the number
    /// of bytes moved.
    pub fn try_take(&self, out: &mut Vec<u8>, max: usize) -> usize {
        let n = {
            let mut ring = self.lock();
            let n = max.min(ring.available());
            let old = out.len();
            out.resize(old + n, 0);
            ring.read(&mut out[old..])
        };
        if n > 0 {
            self.not_full.notify_waiters();
        }
        n
    }

    fn try_put_chunk(&self, left: &[u8], quantum: usize) -> Result<Option<usize>> {
        let mut ring = self.lock();
        if ring.closed {
            return Err(TransportError::Closed);
        }
        if self.cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        let free = ring.free();
        let n = if left.len() < quantum {
            left.len()
        } else {
            (left.len() / quantum).min(free / quantum) * quantum
        };
        if n == 0 || n > free {
            return Ok(None);
        }
        ring.write(&left[..n]);
        Ok(Some(n))
    }

    fn try_get_chunk(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        let mut ring = self.lock();
        if ring.available() > 0 {
            return Ok(Some(ring.read(buf)));
        }
        if ring.closed {
            return Ok(Some(0));
        }
        if self.cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        Ok(None)
    }

    fn try_scan_terminated(&self, out: &mut Vec<u8>, max: usize) -> Result<Scan> {
        let mut ring = self.lock();
        if ring.available() == 0 {
            if ring.closed {
                return Ok(Scan::Eof);
            }
            if self.cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            return Ok(Scan::Empty);
        }
        while ring.available() > 0 {
            let byte = ring.pop();
            if byte == 0 {
                return Ok(Scan::Terminated);
            }
            if out.len() == max {
                return Ok(Scan::Capped);
            }
            out.push(byte);
        }
        Ok(Scan::Progress)
    }

    /// Wait for a wake-up or cancellation.  The caller re-checks state either
    /// way, so a cancelled session still lets readers drain buffered bytes.
    async fn park(&self, notified: Pin<&mut Notified<'_>>) {
        tokio::select! {
            _ = notified => {}
            _ = self.cancel.cancelled() => {}
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Scan {
    Terminated,
    Eof,
    Capped,
    Progress,
    Empty,
}
