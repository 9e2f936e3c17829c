//! Wire-format definitions for data segments and acknowledgements.
//!
//! Two kinds of datagram travel between peers, told apart by their length:
//!
//! ```text
//!  data segment                                   ack
//! +--------+----------------+-------------+      +--------+
//! | seqnum |      size      | payload ... |      | seqnum |
//! |  (u8)  |  (u16, big-e)  | size bytes  |      |  (u8)  |
//! +--------+----------------+-------------+      +--------+
//! ```
//!
//! A data datagram is exactly [`SEGMENT_HEADER_LEN`] + `size` bytes long with
//! `1 ≤ size ≤ MSS`; an ack is exactly one byte.  Anything else is a protocol
//! violation.
//!
//! Pure data transformation; no I/O happens here.

/// Link MTU the segment size is derived from.
pub const MTU: usize = 1500;

/// IPv4 + UDP header overhead.
pub const UDPIP_HEADER_LEN: usize = 28;

/// seqnum(1) + size(2).
pub const SEGMENT_HEADER_LEN: usize = 3;

/// Maximum segment payload.
pub const MSS: usize = MTU - UDPIP_HEADER_LEN - SEGMENT_HEADER_LEN;

/// Largest datagram the protocol ever produces.
pub const MAX_DATAGRAM: usize = SEGMENT_HEADER_LEN + MSS;

/// Size of the sequence-number space.
pub const SEQ_SPACE: usize = 1 << 8;

// Byte offsets within a data datagram.
const OFF_SEQ: usize = 0;
const OFF_SIZE: usize = 1;

/// Write a data datagram for `seqnum`/`payload` into `buf`, replacing its
/// contents.  The sender uses this to reuse one scratch buffer for every
/// transmission.
pub fn encode_data_into(seqnum: u8, payload: &[u8], buf: &mut Vec<u8>) {
    buf.clear();
    buf.push(seqnum);
    buf.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    buf.extend_from_slice(payload);
}

/// A decoded datagram, borrowing the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datagram<'a> {
    /// A data segment.
    Data { seqnum: u8, payload: &'a [u8] },
    /// An acknowledgement of `seqnum`.
    Ack(u8),
}

impl<'a> Datagram<'a> {
    /// Classify and parse a raw datagram.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is empty or too short to hold a segment header,
    /// - the `size` field disagrees with `buf.len()`, or
    /// - `size` is zero or exceeds [`MSS`].
    pub fn decode(buf: &'a [u8]) -> Result<Self, SegmentError> {
        match buf.len() {
            0 => Err(SegmentError::Empty),
            1 => Ok(Datagram::Ack(buf[OFF_SEQ])),
            n if n < SEGMENT_HEADER_LEN + 1 => Err(SegmentError::UnexpectedLength(n)),
            n => {
                let size = u16::from_be_bytes([buf[OFF_SIZE], buf[OFF_SIZE + 1]]) as usize;
                check_size(size)?;
                if n != SEGMENT_HEADER_LEN + size {
                    return Err(SegmentError::LengthMismatch {
                        declared: size,
                        actual: n - SEGMENT_HEADER_LEN,
                    });
                }
                Ok(Datagram::Data {
                    seqnum: buf[OFF_SEQ],
                    payload: &buf[SEGMENT_HEADER_LEN..],
                })
            }
        }
    }
}

/// Encode an acknowledgement.
pub fn encode_ack(seqnum: u8) -> [u8; 1] {
    [seqnum]
}

fn check_size(size: usize) -> Result<(), SegmentError> {
    if size == 0 {
        Err(SegmentError::EmptyPayload)
    } else if size > MSS {
        Err(SegmentError::Oversized(size))
    } else {
        Ok(())
    }
}

/// Errors that can arise when building or parsing a datagram.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SegmentError {
    #[error("empty datagram")]
    Empty,
    #[error("datagram of unexpected length {0}")]
    UnexpectedLength(usize),
    #[error("size field says {declared} bytes but {actual} follow")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("segment carries no payload")]
    EmptyPayload,
    #[error("payload of {0} bytes exceeds MSS")]
    Oversized(usize),
}
