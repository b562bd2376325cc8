//! Send-side fault injection for exercising retransmission paths.
//!
//! Real networks drop and duplicate packets, but not on cue.  A
//! [`FaultInjector`] sits in front of every outgoing datagram and applies a
//! [`FaultConfig`]:
//!
//! | Fault            | Description                                          |
//! |------------------|------------------------------------------------------|
//! | `drop_seq`       | Drop the first transmission of one data packet.      |
//! | `drop_ack`       | Drop the first data ACK carrying one ack number.     |
//! | `duplicate_seq`  | Send a second, stale copy of one data packet.        |
//! | `loss_rate`      | Drop data packets / data ACKs with this probability. |
//!
//! The named faults fire at most once each.  Random loss uses a seeded RNG
//! so failures are reproducible, and never touches control packets (SYN,
//! SYN-ACK, handshake ACK, FIN, FIN-ACK), since a lost handshake packet
//! aborts the connection.
//!
//! Nothing here changes what the protocol decides to send, only whether
//! and how often it reaches the socket.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::packet::Packet;

/// Configuration for the fault-injection model.  All faults are off by
/// default, making the injector a transparent pass-through.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaultConfig {
    /// Sequence number of the data packet to drop once.
    pub drop_seq: Option<u32>,
    /// Ack number of the data acknowledgement to drop once.
    pub drop_ack: Option<u32>,
    /// Sequence number to transmit twice back-to-back, once.
    pub duplicate_seq: Option<u32>,
    /// Probability in `[0.0, 1.0]` that a data packet or data ACK is dropped.
    pub loss_rate: f64,
    /// Seed for the random-loss RNG.
    pub seed: u64,
}

impl FaultConfig {
    /// `true` when no fault would ever fire.
    pub fn is_clean(&self) -> bool {
        self.drop_seq.is_none()
            && self.drop_ack.is_none()
            && self.duplicate_seq.is_none()
            && self.loss_rate <= 0.0
    }
}

/// What to do with one outgoing packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Transmit normally.
    Send,
    /// Pretend it was sent.
    Drop,
    /// Transmit, then transmit the same bytes again.
    Duplicate,
}

/// Stateful filter applying a [`FaultConfig`] to outgoing packets.
#[derive(Debug)]
pub struct FaultInjector {
    drop_seq: Option<u32>,
    drop_ack: Option<u32>,
    duplicate_seq: Option<u32>,
    loss_rate: f64,
    rng: StdRng,
}

impl FaultInjector {
    pub fn new(config: &FaultConfig) -> Self {
        Self {
            drop_seq: config.drop_seq,
            drop_ack: config.drop_ack,
            duplicate_seq: config.duplicate_seq,
            loss_rate: config.loss_rate.clamp(0.0, 1.0),
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    /// Decide the fate of `packet`.  One-shot faults are consumed here.
    pub fn judge(&mut self, packet: &Packet) -> Verdict {
        if packet.is_data() {
            let seq = packet.header.seq;
            if self.drop_seq == Some(seq) {
                self.drop_seq = None;
                log::debug!("[fault] dropping DATA seq={seq}");
                return Verdict::Drop;
            }
            if self.lose() {
                log::trace!("[fault] random loss of DATA seq={seq}");
                return Verdict::Drop;
            }
            if self.duplicate_seq == Some(seq) {
                self.duplicate_seq = None;
                log::debug!("[fault] duplicating DATA seq={seq}");
                return Verdict::Duplicate;
            }
        } else if packet.is_data_ack() && packet.header.ack != 0 {
            let ack = packet.header.ack;
            if self.drop_ack == Some(ack) {
                self.drop_ack = None;
                log::debug!("[fault] dropping ACK ack={ack}");
                return Verdict::Drop;
            }
            if self.lose() {
                log::trace!("[fault] random loss of ACK ack={ack}");
                return Verdict::Drop;
            }
        }
        Verdict::Send
    }

    fn lose(&mut self) -> bool {
        self.loss_rate > 0.0 && self.rng.random_bool(self.loss_rate)
    }
}
