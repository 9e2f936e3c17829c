//! Entry point for `sr-transport`.
//!
//! Pushes one file (or stdin) from a `send` process to a `recv` process over a
//! single session.  Both sides are given the same session parameters on the
//! command line; there is no handshake.
//!
//! Stream layout: `name \0 | length (u64 BE) | bytes`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use sr_transport::simulator::Bernoulli;
use sr_transport::{SessionParams, Socket, TransportConfig, TransportSession};

/// Longest file name accepted on the wire.
const MAX_NAME: usize = 255;

/// Reliable file push over lossy UDP (selective repeat).
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send a file (stdin when omitted) to the peer.
    Send {
        #[command(flatten)]
        net: NetArgs,
        /// File to send.
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Receive one file from the peer.
    Recv {
        #[command(flatten)]
        net: NetArgs,
        /// Where to write the file (stdout when omitted).
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Keep acknowledging retransmissions this long after the last byte.
        #[arg(long, default_value_t = 3)]
        linger_secs: u64,
    },
}

#[derive(Args)]
struct NetArgs {
    /// Local address to bind (e.g. 127.0.0.1:9000).
    #[arg(short, long)]
    bind: SocketAddr,
    /// Remote peer address.
    #[arg(short, long)]
    peer: SocketAddr,
    /// Window width N (1..=127).
    #[arg(short, long, default_value_t = 8)]
    window: u8,
    /// Retransmission timeout T in milliseconds (initial value when adaptive).
    #[arg(short, long, default_value_t = 1000)]
    timeout_ms: u16,
    /// Simulated loss percentage P applied to every outbound datagram.
    #[arg(short, long, default_value_t = 0)]
    loss: u8,
    /// Seed for the simulated loss (random when omitted).
    #[arg(long)]
    seed: Option<u64>,
    /// Keep T fixed instead of adapting it from RTT samples.
    #[arg(long)]
    fixed_timeout: bool,
    /// Close the session after this many seconds without a datagram.
    #[arg(long, default_value_t = 30)]
    idle_secs: u64,
}

impl NetArgs {
    async fn open(&self) -> anyhow::Result<TransportSession> {
        let mut params = SessionParams {
            timeout_ms: self.timeout_ms,
            loss_percent: self.loss,
            window_width: self.window,
            adaptive: !self.fixed_timeout,
        };
        params.validate().context("invalid session parameters")?;

        let mut socket = Socket::bind(self.bind)
            .await
            .with_context(|| format!("binding {}", self.bind))?;
        socket
            .connect(self.peer)
            .await
            .with_context(|| format!("connecting to {}", self.peer))?;
        if let Some(seed) = self.seed.filter(|_| params.loss_percent > 0) {
            socket = socket.with_loss(Box::new(Bernoulli::seeded(params.loss_probability(), seed)));
            // the seeded model replaces the one `start` would install
            params.loss_percent = 0;
        }

        let config = TransportConfig::default().with_idle_timeout(Duration::from_secs(self.idle_secs));
        Ok(TransportSession::start(socket, params, config)?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    match cli.mode {
        Mode::Send { net, file } => send(net, file).await,
        Mode::Recv {
            net,
            out,
            linger_secs,
        } => recv(net, out, Duration::from_secs(linger_secs)).await,
    }
}

async fn send(net: NetArgs, file: Option<PathBuf>) -> anyhow::Result<()> {
    let (name, data) = match &file {
        Some(path) => {
            let data = tokio::fs::read(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            (name, data)
        }
        None => {
            let mut data = Vec::new();
            tokio::io::stdin().read_to_end(&mut data).await?;
            ("stdin".to_owned(), data)
        }
    };
    if name.len() > MAX_NAME || name.as_bytes().contains(&0) {
        bail!("file name {name:?} cannot be sent");
    }

    let session = net.open().await?;
    let started = tokio::time::Instant::now();

    let mut header = name.into_bytes();
    header.push(0);
    header.extend_from_slice(&(data.len() as u64).to_be_bytes());
    session.send(&header).await?;
    session.send(&data).await?;
    session.flush().await.context("waiting for acknowledgements")?;

    let stats = session.stats();
    log::info!(
        "sent {} bytes in {:?} ({} segments, {} retransmitted)",
        data.len(),
        started.elapsed(),
        stats.segments_sent,
        stats.retransmissions
    );
    session.close().await?;
    Ok(())
}

async fn recv(net: NetArgs, out: Option<PathBuf>, linger: Duration) -> anyhow::Result<()> {
    let session = net.open().await?;

    let name = session.recv_terminated_string(MAX_NAME).await?;
    if name.is_empty() {
        bail!("peer closed before sending a file");
    }
    let mut len = [0u8; 8];
    session.recv_exact(&mut len).await?;
    let len = usize::try_from(u64::from_be_bytes(len)).context("file too large")?;
    let mut data = vec![0u8; len];
    session.recv_exact(&mut data).await?;
    log::info!("received {name:?}: {len} bytes");

    match out {
        Some(path) => tokio::fs::write(&path, &data)
            .await
            .with_context(|| format!("writing {}", path.display()))?,
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&data).await?;
            stdout.flush().await?;
        }
    }

    // the peer may still be retransmitting segments whose acks were lost
    let _ = tokio::time::timeout(linger, session.closed()).await;
    session.close().await?;
    Ok(())
}
