//! `sr-transport` — a reliable, ordered byte stream over lossy UDP using
//! selective-repeat ARQ.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐  data segments  ┌──────────────┐
//!  │  SenderLoop  │────────────────▶│ ReceiverLoop │   (peer)
//!  └──────▲───────┘                 └──────┬───────┘
//!         │               1-byte ACKs      │
//!         │◀───────────────────────────────┘
//!         │
//!  ┌──────┴─────────────────────────────────────┐
//!  │             TransportSession               │
//!  │  outbound ring · inbound ring · mailbox    │
//!  └──────┬─────────────────────────────────────┘
//!         │ raw UDP datagrams
//!  ┌──────▼──────┐
//!  │   Socket    │  (connected tokio UdpSocket + loss model)
//!  └─────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`segment`]      — wire format of data segments and acks
//! - [`bitmap`]       — 128-bit acknowledgement bitmap
//! - [`window`]       — mod-256 sliding window
//! - [`ring_buffer`]  — bounded blocking byte ring
//! - [`mailbox`]      — single-slot sender notification
//! - [`timer`]        — retransmission queue and RTT estimation
//! - [`sender`]       — selective-repeat send loop
//! - [`receiver`]     — selective-repeat receive loop and reassembly
//! - [`session`]      — wiring, application API, teardown
//! - [`socket`]       — async UDP socket with unreliable send
//! - [`simulator`]    — loss models for the unreliable send
//! - [`config`]       — session parameters and tunables
//! - [`state`]        — session lifecycle states
//! - [`stats`]        — per-session counters
//! - [`error`]        — error types

pub mod bitmap;
pub mod config;
pub mod error;
pub mod mailbox;
pub mod receiver;
pub mod ring_buffer;
pub mod segment;
pub mod sender;
pub mod session;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod stats;
pub mod timer;
pub mod window;

pub use config::{SessionParams, TransportConfig};
pub use error::{Result, TransportError};
pub use session::TransportSession;
pub use socket::Socket;
pub use state::SessionState;
