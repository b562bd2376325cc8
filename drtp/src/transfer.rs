//! Data phase and whole-transfer entry points.
//!
//! # Architecture
//!
//! ```text
//!  run_client_transfer                      run_server_transfer / serve
//!      │                                          │
//!      ▼                                          ▼
//!  Connection::connect                      Connection::accept
//!      │                                          │
//!  send_payload ──────────────────┐         receive_payload
//!    ├── ChunkFeed  (seq, FIN)    │           └── Box<dyn ReceiveStrategy>
//!    ├── Box<dyn SendStrategy>    │ select!
//!    └── RetransmitTimer ─────────┘ socket vs timer
//!      │                                          │
//!  Connection::close (FIN, retry)           FIN → FIN-ACK, CLOSED
//! ```
//!
//! The send loop is the same for every mode.  Each turn it
//! 1. fills the window from the feed while the strategy allows;
//! 2. re-keys the timer to [`SendStrategy::timer_key`];
//! 3. waits for an ACK or the timer, whichever comes first.
//!
//! ACKs that arrive after a timeout are still fed to the strategy; the
//! strategies treat them idempotently.

use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::TransferConfig;
use crate::connection::{ConnError, Connection, Event};
use crate::packet::Packet;
use crate::payload::{ChunkFeed, PayloadSource};
use crate::sender::SendStrategy;
use crate::socket::Socket;
use crate::state::{ConnectionState, Role};

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Sender-side summary of one completed data phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferStats {
    /// Payload bytes handed to the wire (first transmissions only).
    pub bytes_sent: u64,
    /// Data packets sent for the first time.
    pub packets_sent: u64,
    /// Sequence number of every retransmission, in the order sent.
    pub retransmitted: Vec<u32>,
    /// ACKs that acknowledged nothing new.
    pub duplicate_acks: u64,
    /// Most transmissions any single data packet needed; 1 on a clean
    /// channel, 0 when nothing was sent.
    pub max_transmissions: u32,
    /// Time from the first data packet to the last ACK.
    pub elapsed: Duration,
}

impl TransferStats {
    pub fn retransmissions(&self) -> usize {
        self.retransmitted.len()
    }

    /// Goodput in megabits per second.
    pub fn throughput_mbps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        (self.bytes_sent as f64 * 8.0) / secs / 1_000_000.0
    }
}

impl std::fmt::Display for TransferStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} bytes in {} packets, {:.3}s, {:.2} Mbps, {} retransmission(s) \
             (worst packet sent {}x), {} duplicate ACK(s)",
            self.bytes_sent,
            self.packets_sent,
            self.elapsed.as_secs_f64(),
            self.throughput_mbps(),
            self.retransmissions(),
            self.max_transmissions,
            self.duplicate_acks,
        )
    }
}

// ---------------------------------------------------------------------------
// Data phase
// ---------------------------------------------------------------------------

impl Connection {
    /// Deliver every chunk of `feed` to the server using the configured
    /// reliability mode.  Returns once the last data packet is acknowledged;
    /// call [`Connection::close`] afterwards.
    pub async fn send_payload(&mut self, mut feed: ChunkFeed) -> Result<TransferStats, ConnError> {
        if self.role != Role::Client || self.state != ConnectionState::Established {
            return Err(ConnError::BadState(self.state));
        }

        let mut strategy: Box<dyn SendStrategy> = self.config.mode.sender(self.config.window);
        let tag = strategy.name();
        let mut stats = TransferStats::default();
        let started = Instant::now();
        log::debug!(
            "[{tag}] data phase to {} (window={})",
            self.peer(),
            self.config.window
        );

        loop {
            while strategy.can_send() {
                let Some(chunk) = feed.next_chunk()? else {
                    break;
                };
                let len = chunk.payload.len();
                let pkt = Packet::data(chunk.seq, chunk.payload, chunk.last);
                self.transmit(&pkt).await?;
                strategy.record_sent(pkt);
                stats.packets_sent += 1;
                stats.bytes_sent += len as u64;
                stats.max_transmissions = stats.max_transmissions.max(1);
                log::debug!(
                    "[{tag}] → DATA seq={} len={len}{} in_flight={}",
                    chunk.seq,
                    if chunk.last { " FIN" } else { "" },
                    strategy.in_flight()
                );
            }

            self.timer.track(strategy.timer_key());
            if !strategy.has_unacked() && feed.is_exhausted() {
                break;
            }

            match self.next_event().await? {
                Event::Packet(pkt) if pkt.is_data_ack() => {
                    let ack = pkt.header.ack;
                    let newly = strategy.on_ack(ack);
                    if newly == 0 {
                        stats.duplicate_acks += 1;
                        log::trace!("[{tag}] ← ACK ack={ack} (nothing new)");
                    } else {
                        log::debug!(
                            "[{tag}] ← ACK ack={ack} newly_acked={newly} in_flight={}",
                            strategy.in_flight()
                        );
                    }
                }
                Event::Packet(pkt) => self.ignore(&pkt),
                Event::Timeout(key) => {
                    let resend = strategy.on_timeout();
                    log::debug!(
                        "[{tag}] timeout on seq={key}; retransmitting {} packet(s)",
                        resend.len()
                    );
                    for pkt in &resend {
                        let seq = pkt.header.seq;
                        self.transmit(pkt).await?;
                        stats.retransmitted.push(seq);
                        let tx = strategy.tx_count(seq).unwrap_or(1);
                        stats.max_transmissions = stats.max_transmissions.max(tx);
                        log::debug!("[{tag}] → DATA seq={seq} (transmission #{tx})");
                    }
                    self.timer.restart();
                }
            }
        }

        self.timer.cancel();
        stats.elapsed = started.elapsed();
        log::info!(
            "[{tag}] {} → {}: all data acknowledged: {stats}",
            self.local_addr(),
            self.peer()
        );
        Ok(stats)
    }

    /// Reassemble the client's payload until its teardown FIN arrives, then
    /// answer FIN-ACK, close, and return the bytes.
    pub async fn receive_payload(&mut self) -> Result<Vec<u8>, ConnError> {
        if self.role != Role::Server || self.state != ConnectionState::Established {
            return Err(ConnError::BadState(self.state));
        }

        let mut strategy = self.config.mode.receiver(self.config.window);
        let tag = strategy.name();
        let window = self.config.advertised_window();
        let mut pending = self.early.take();
        self.timer.cancel();

        loop {
            let pkt = match pending.take() {
                Some(pkt) => pkt,
                None => match self.next_event().await? {
                    Event::Packet(pkt) => pkt,
                    // The receiver never arms the timer.
                    Event::Timeout(_) => continue,
                },
            };

            if pkt.is_data() {
                let seq = pkt.header.seq;
                let ack = strategy.on_data(seq, &pkt.payload, pkt.flags().fin);
                log::debug!(
                    "[{tag}] ← DATA seq={seq} len={}; → ACK ack={ack}",
                    pkt.payload.len()
                );
                self.transmit(&Packet::data_ack(ack, window)).await?;
                continue;
            }

            if self.state.on_control(self.role, pkt.flags()) == Some(ConnectionState::Closed) {
                self.transmit(&Packet::fin_ack()).await?;
                if !strategy.is_complete() {
                    log::warn!(
                        "[{tag}] FIN before the final chunk; keeping {} bytes",
                        strategy.delivered()
                    );
                }
                log::debug!("[conn] ← FIN; → FIN-ACK");
                self.transition(ConnectionState::Closed);
                return Ok(strategy.take_output());
            }

            self.ignore(&pkt);
        }
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Connect to `server_addr`, send everything `source` yields, and close.
pub async fn run_client_transfer(
    socket: impl Into<Arc<Socket>>,
    server_addr: SocketAddr,
    config: TransferConfig,
    source: impl PayloadSource + 'static,
) -> Result<TransferStats, ConnError> {
    let mut conn = Connection::connect(socket, server_addr, config).await?;
    let stats = conn.send_payload(ChunkFeed::new(source)).await?;
    conn.close().await?;
    Ok(stats)
}

/// Accept one client on `socket` and return the payload it sent.
pub async fn run_server_transfer(
    socket: impl Into<Arc<Socket>>,
    config: TransferConfig,
) -> Result<Vec<u8>, ConnError> {
    let mut conn = Connection::accept(socket, config).await?;
    conn.receive_payload().await
}

/// Accept transfers one after another on a single socket, handing each
/// reassembled payload to `handler` with the client's address.
///
/// A failed handshake is logged and the next client is awaited.  The loop
/// ends when `handler` returns [`ControlFlow::Break`], the socket fails, or
/// `config` is invalid.
pub async fn serve<F>(
    socket: Arc<Socket>,
    config: TransferConfig,
    mut handler: F,
) -> Result<(), ConnError>
where
    F: FnMut(SocketAddr, Vec<u8>) -> ControlFlow<()>,
{
    log::info!(
        "[serve] listening on {} ({} mode)",
        socket.local_addr,
        config.mode
    );
    loop {
        let mut conn = match Connection::accept(Arc::clone(&socket), config.clone()).await {
            Ok(conn) => conn,
            Err(e @ (ConnError::Socket(_) | ConnError::BadConfig(_))) => return Err(e),
            Err(e) => {
                log::warn!("[serve] handshake failed: {e}");
                continue;
            }
        };

        let peer = conn.peer();
        match conn.receive_payload().await {
            Ok(data) => {
                log::info!("[serve] received {} bytes from {peer}", data.len());
                if handler(peer, data).is_break() {
                    return Ok(());
                }
            }
            Err(e @ ConnError::Socket(_)) => return Err(e),
            Err(e) => log::warn!("[serve] transfer from {peer} failed: {e}"),
        }
    }
}
