//! Per-connection lifecycle manager.
//!
//! A [`Connection`] owns the complete state for one logical client/server
//! session:
//! - the FSM state (see [`crate::state`]), asserted legal on every step;
//! - the peer address, fixed by the handshake;
//! - the [`RetransmitTimer`] shared by handshake, data phase and teardown;
//! - the [`FaultInjector`] every outgoing packet passes through.
//!
//! Handshake and teardown live here, independent of the reliability mode.
//! The data phase ([`Connection::send_payload`] /
//! [`Connection::receive_payload`]) lives in [`crate::transfer`].
//!
//! ```text
//!  client                                server
//!    │ ── SYN (0x8) ───────────────────▶  │  LISTEN → SYN_RCVD
//!    │ ◀─────────────────── SYN-ACK (0xC) │
//!    │ ── ACK (0x4) ───────────────────▶  │  SYN_RCVD → ESTABLISHED
//!    │        ... data phase ...          │
//!    │ ── FIN (0x2) ───────────────────▶  │
//!    │ ◀─────────────────── FIN-ACK (0x6) │  ESTABLISHED → CLOSED
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{ConfigError, TransferConfig};
use crate::fault::{FaultInjector, Verdict};
use crate::packet::{Flags, Packet};
use crate::socket::{Socket, SocketError};
use crate::state::{ConnectionState, Role};
use crate::timer::RetransmitTimer;

/// Key the timer is armed with while waiting on a control packet.
const CONTROL_KEY: u32 = 0;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConnError {
    /// No SYN-ACK (client) or handshake ACK (server) within one timeout.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// The FIN went unanswered for every allowed attempt.
    #[error("teardown timed out after {attempts} FIN attempt(s)")]
    TeardownTimeout { attempts: u32 },

    /// A packet that has no meaning in the current state.  Logged and
    /// ignored by the connection; never returned from a public call.
    #[error("unexpected {flags} packet in {state}")]
    Unexpected {
        state: ConnectionState,
        flags: Flags,
    },

    #[error(transparent)]
    Socket(#[from] SocketError),

    /// Reading the outbound payload failed.
    #[error("payload source error: {0}")]
    Payload(#[from] std::io::Error),

    /// The config was rejected before anything was sent.
    #[error("invalid config: {0}")]
    BadConfig(#[from] ConfigError),

    /// The call is not valid for this connection's role or state.
    #[error("operation not valid in state {0}")]
    BadState(ConnectionState),
}

/// What woke the connection up.
#[derive(Debug)]
pub(crate) enum Event {
    /// A well-formed datagram from the peer.
    Packet(Packet),
    /// The retransmission timer fired for this key.
    Timeout(u32),
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A handle to a single DRTP connection.
#[derive(Debug)]
pub struct Connection {
    /// Current FSM state.
    pub state: ConnectionState,
    pub role: Role,
    pub(crate) socket: Arc<Socket>,
    peer: SocketAddr,
    pub(crate) timer: RetransmitTimer,
    pub(crate) config: TransferConfig,
    faults: FaultInjector,
    /// Data packet that arrived in SYN_RCVD and stood in for the lost ACK.
    pub(crate) early: Option<Packet>,
}

impl Connection {
    fn new(socket: Arc<Socket>, peer: SocketAddr, role: Role, config: TransferConfig) -> Self {
        let state = match role {
            Role::Client => ConnectionState::Closed,
            Role::Server => ConnectionState::Listen,
        };
        if !config.faults.is_clean() {
            log::info!("[conn] fault injection enabled: {:?}", config.faults);
        }
        Self {
            state,
            role,
            socket,
            peer,
            timer: RetransmitTimer::new(config.timer.timeout()),
            faults: FaultInjector::new(&config.faults),
            config,
            early: None,
        }
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    /// Active open: send SYN, wait one timeout for SYN-ACK, reply ACK.
    ///
    /// A missing SYN-ACK is fatal; the SYN is never retransmitted.
    pub async fn connect(
        socket: impl Into<Arc<Socket>>,
        peer: SocketAddr,
        config: TransferConfig,
    ) -> Result<Self, ConnError> {
        config.validate()?;
        let mut conn = Self::new(socket.into(), peer, Role::Client, config);

        conn.transmit(&Packet::syn()).await?;
        conn.transition(ConnectionState::SynSent);
        conn.timer.arm(CONTROL_KEY);
        log::debug!(
            "[conn] {} → SYN to {peer} (timeout {:?})",
            conn.local_addr(),
            conn.timer.timeout()
        );

        loop {
            match conn.next_event().await? {
                Event::Timeout(_) => {
                    conn.timer.cancel();
                    conn.transition(ConnectionState::Closed);
                    log::warn!("[conn] no SYN-ACK from {peer}");
                    return Err(ConnError::HandshakeTimeout);
                }
                Event::Packet(pkt) => {
                    if conn.state.on_control(conn.role, pkt.flags())
                        == Some(ConnectionState::Established)
                    {
                        log::debug!("[conn] ← SYN-ACK; → ACK");
                        conn.transmit(&Packet::handshake_ack()).await?;
                        conn.timer.cancel();
                        conn.transition(ConnectionState::Established);
                        return Ok(conn);
                    }
                    conn.ignore(&pkt);
                }
            }
        }
    }

    /// Passive open: wait (without a deadline) for a SYN from anyone, reply
    /// SYN-ACK, then wait one timeout for the handshake ACK.
    ///
    /// In SYN_RCVD a repeated SYN gets a fresh SYN-ACK, and a data packet
    /// counts as the ACK: it is kept and handed to the receive loop.
    pub async fn accept(
        socket: impl Into<Arc<Socket>>,
        config: TransferConfig,
    ) -> Result<Self, ConnError> {
        config.validate()?;
        let socket = socket.into();
        log::debug!("[conn] LISTEN on {}", socket.local_addr);

        let peer = loop {
            match socket.recv_from().await {
                Ok((pkt, addr)) => {
                    let state = ConnectionState::Listen;
                    if state.on_control(Role::Server, pkt.flags())
                        == Some(ConnectionState::SynReceived)
                    {
                        break addr;
                    }
                    let err = ConnError::Unexpected {
                        state,
                        flags: pkt.flags(),
                    };
                    log::debug!("[conn] ignoring {err} from {addr}");
                }
                Err(SocketError::Packet(e)) => log::warn!("[conn] discarding datagram: {e}"),
                Err(e) => return Err(e.into()),
            }
        };

        let mut conn = Self::new(socket, peer, Role::Server, config);
        conn.transition(ConnectionState::SynReceived);
        conn.transmit(&Packet::syn_ack()).await?;
        conn.timer.arm(CONTROL_KEY);
        log::debug!("[conn] ← SYN from {peer}; → SYN-ACK");

        loop {
            match conn.next_event().await? {
                Event::Timeout(_) => {
                    conn.timer.cancel();
                    conn.transition(ConnectionState::Closed);
                    log::warn!("[conn] no handshake ACK from {peer}");
                    return Err(ConnError::HandshakeTimeout);
                }
                Event::Packet(pkt) if pkt.is_data() => {
                    log::debug!(
                        "[conn] ← DATA seq={} before ACK; treating as implicit ACK",
                        pkt.header.seq
                    );
                    conn.timer.cancel();
                    conn.transition(ConnectionState::Established);
                    conn.early = Some(pkt);
                    return Ok(conn);
                }
                Event::Packet(pkt) => {
                    let f = pkt.flags();
                    if f.syn && !f.ack {
                        log::debug!("[conn] ← duplicate SYN; → SYN-ACK");
                        conn.transmit(&Packet::syn_ack()).await?;
                        conn.timer.restart();
                    } else if conn.state.on_control(conn.role, f)
                        == Some(ConnectionState::Established)
                    {
                        log::debug!("[conn] ← ACK; connection established");
                        conn.timer.cancel();
                        conn.transition(ConnectionState::Established);
                        return Ok(conn);
                    } else {
                        conn.ignore(&pkt);
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Client-side close: send FIN and wait for an ACK-flagged reply with
    /// `ack = 0`, resending on every timeout up to `teardown_retries` times.
    ///
    /// Closing an already-closed connection is a no-op.
    pub async fn close(&mut self) -> Result<(), ConnError> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        if self.role != Role::Client || self.state != ConnectionState::Established {
            return Err(ConnError::BadState(self.state));
        }

        self.transition(ConnectionState::FinWait);
        let budget = self.config.teardown_retries.max(1);
        let fin = Packet::fin();

        for attempt in 1..=budget {
            self.transmit(&fin).await?;
            self.timer.arm(CONTROL_KEY);
            log::debug!("[conn] → FIN (attempt {attempt}/{budget})");

            loop {
                match self.next_event().await? {
                    Event::Timeout(_) => break,
                    Event::Packet(pkt) => {
                        let closes = self.state.on_control(self.role, pkt.flags())
                            == Some(ConnectionState::Closed);
                        if closes && pkt.header.ack == 0 {
                            log::debug!("[conn] ← {}; closed", pkt.flags());
                            self.timer.cancel();
                            self.transition(ConnectionState::Closed);
                            return Ok(());
                        }
                        // Late data ACKs still trickle in here.
                        log::trace!(
                            "[conn] ignoring {} ack={} in FIN_WAIT",
                            pkt.flags(),
                            pkt.header.ack
                        );
                    }
                }
            }
        }

        log::warn!("[conn] FIN unanswered after {budget} attempt(s); giving up");
        self.timer.cancel();
        self.transition(ConnectionState::Closed);
        Err(ConnError::TeardownTimeout { attempts: budget })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Move the FSM to `next`, asserting the edge is legal.
    pub(crate) fn transition(&mut self, next: ConnectionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} → {}",
            self.state,
            next
        );
        log::debug!("[conn] {} → {}", self.state, next);
        self.state = next;
    }

    /// Send `packet` to the peer through the fault injector.
    pub(crate) async fn transmit(&mut self, packet: &Packet) -> Result<(), ConnError> {
        match self.faults.judge(packet) {
            Verdict::Drop => {}
            Verdict::Send => self.socket.send_to(packet, self.peer).await?,
            Verdict::Duplicate => {
                self.socket.send_to(packet, self.peer).await?;
                self.socket.send_to(packet, self.peer).await?;
            }
        }
        Ok(())
    }

    /// Wait for the next datagram from the peer or the timer, whichever
    /// comes first.
    ///
    /// Malformed datagrams and datagrams from other addresses are dropped
    /// here; only socket I/O failures surface as errors.
    pub(crate) async fn next_event(&self) -> Result<Event, ConnError> {
        loop {
            tokio::select! {
                res = self.socket.recv_from() => match res {
                    Ok((pkt, addr)) if addr == self.peer => return Ok(Event::Packet(pkt)),
                    Ok((pkt, addr)) => {
                        log::debug!("[conn] ignoring {} from stranger {addr}", pkt.flags());
                    }
                    Err(SocketError::Packet(e)) => log::warn!("[conn] discarding datagram: {e}"),
                    Err(e) => return Err(e.into()),
                },
                key = self.timer.expired() => return Ok(Event::Timeout(key)),
            }
        }
    }

    /// Log a packet that does not fit the current state and move on.
    pub(crate) fn ignore(&self, pkt: &Packet) {
        let err = ConnError::Unexpected {
            state: self.state,
            flags: pkt.flags(),
        };
        log::debug!(
            "[conn] ignoring {err} (seq={} ack={})",
            pkt.header.seq,
            pkt.header.ack
        );
    }
}
