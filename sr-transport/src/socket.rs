//! Connected async UDP socket with the unreliable-send primitive.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket`.  Once
//! [`Socket::connect`]ed it only exchanges datagrams with one peer.  All
//! protocol logic lives elsewhere; this module owns byte I/O and the loss
//! model applied to outbound datagrams.

use std::io;
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};

use tokio::net::UdpSocket;

use crate::simulator::{LossModel, NoLoss};

/// An async, datagram-oriented UDP socket.
///
/// All methods are `&self` so the socket can be shared between the sender
/// and receiver tasks behind an `Arc`.
pub struct Socket {
    /// Address this socket is bound to (filled in after the OS assigns an
    /// ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
    loss: Mutex<Box<dyn LossModel>>,
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `127.0.0.1:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self {
            local_addr,
            inner,
            loss: Mutex::new(Box::new(NoLoss)),
        })
    }

    /// Restrict the socket to `peer`.  Datagrams from anyone else are
    /// filtered by the OS.
    pub async fn connect(&self, peer: SocketAddr) -> io::Result<()> {
        self.inner.connect(peer).await
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }

    /// Replace the loss model applied by [`Socket::send_unreliable`].
    pub fn with_loss(self, model: Box<dyn LossModel>) -> Self {
        *self.loss.lock().unwrap_or_else(PoisonError::into_inner) = model;
        self
    }

    pub fn set_loss(&self, model: Box<dyn LossModel>) {
        *self.loss.lock().unwrap_or_else(PoisonError::into_inner) = model;
    }

    /// Send `bytes` to the connected peer unless the loss model drops it.
    ///
    /// A dropped datagram still reports `Ok(bytes.len())`: the caller cannot
    /// tell loss on the wire from simulated loss.
    pub async fn send_unreliable(&self, bytes: &[u8]) -> io::Result<usize> {
        let dropped = self
            .loss
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drop_next();
        if dropped {
            log::trace!("[socket] dropped {} byte datagram", bytes.len());
            return Ok(bytes.len());
        }
        self.inner.send(bytes).await
    }

    /// Receive the next datagram from the connected peer into `buf`.
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.recv(buf).await
    }
}

/// ICMP "port unreachable" replies surface on a connected UDP socket as
/// refused/reset errors on a later send or receive.  They only mean the peer
/// is not listening right now.
pub fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::EveryNth;

    async fn pair() -> (Socket, Socket) {
        let a = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        a.connect(b.local_addr).await.unwrap();
        b.connect(a.local_addr).await.unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn datagrams_reach_the_peer() {
        let (a, b) = pair().await;
        assert_eq!(a.send_unreliable(b"ping").await.unwrap(), 4);
        let mut buf = [0u8; 16];
        let n = b.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(a.peer_addr().unwrap(), b.local_addr);
    }

    #[tokio::test]
    async fn dropped_datagrams_report_success() {
        let (a, b) = pair().await;
        let a = a.with_loss(Box::new(EveryNth::new(2)));
        for i in 0..4u8 {
            assert_eq!(a.send_unreliable(&[i]).await.unwrap(), 1);
        }
        let mut buf = [0u8; 4];
        let mut got = Vec::new();
        for _ in 0..2 {
            let n = b.recv(&mut buf).await.unwrap();
            got.extend_from_slice(&buf[..n]);
        }
        // second and fourth were dropped
        assert_eq!(got, vec![0, 2]);
    }

    #[test]
    fn refusals_are_transient() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionRefused)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
