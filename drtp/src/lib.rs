//! `drtp` — a small reliable data transfer protocol over UDP.
//!
//! One client pushes a byte payload to one server using stop-and-wait,
//! Go-Back-N or Selective-Repeat, chosen identically on both ends.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐   DATA (seq 1..)   ┌────────────────┐
//!  │ SendStrategy │───────────────────▶│ ReceiveStrategy│
//!  └──────┬───────┘                    └───────┬────────┘
//!         │            ACK (ack = seq)         │
//!         │◀───────────────────────────────────┘
//!         │
//!  ┌──────▼────────────────────────────────────┐
//!  │                Connection                 │
//!  │  (FSM + handshake/teardown + timer +      │
//!  │   fault injector; data phase: transfer)   │
//!  └──────┬────────────────────────────────────┘
//!         │ 12-byte header + ≤1460-byte payload
//!  ┌──────▼──────┐
//!  │   Socket    │  (thin async wrapper around tokio UdpSocket)
//!  └─────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]       — wire format (serialise / deserialise)
//! - [`state`]        — finite-state-machine types
//! - [`timer`]        — retransmission timer
//! - [`fault`]        — send-side drop / duplicate hooks
//! - [`socket`]       — async UDP socket abstraction
//! - [`payload`]      — numbered, FIN-aware chunking of the outbound bytes
//! - [`sender`]       — send strategy trait + stop-and-wait
//! - [`gbn_sender`]   — Go-Back-N outbound window
//! - [`sr_sender`]    — Selective-Repeat outbound window
//! - [`receiver`]     — receive strategy trait + in-order receiver
//! - [`sr_receiver`]  — Selective-Repeat reassembly buffer
//! - [`config`]       — reliability mode and transfer settings
//! - [`connection`]   — handshake, teardown, per-connection state
//! - [`transfer`]     — data phase, statistics, client/server entry points

pub mod config;
pub mod connection;
pub mod fault;
pub mod gbn_sender;
pub mod packet;
pub mod payload;
pub mod receiver;
pub mod sender;
pub mod socket;
pub mod sr_receiver;
pub mod sr_sender;
pub mod state;
pub mod timer;
pub mod transfer;

pub use config::{ConfigError, ReliabilityMode, TransferConfig};
pub use connection::{ConnError, Connection};
pub use transfer::{run_client_transfer, run_server_transfer, serve, TransferStats};
