//! Send-side reliability strategies.
//!
//! A [`SendStrategy`] tracks which data packets are in flight and decides
//! what to retransmit.  It does **not** touch the socket or the timer;
//! [`crate::transfer`] owns the loop, asks [`SendStrategy::can_send`] before
//! pulling the next chunk, feeds ACK numbers in, and re-arms the timer for
//! whatever [`SendStrategy::timer_key`] reports.
//!
//! This module holds the trait and the stop-and-wait variant; Go-Back-N and
//! Selective-Repeat live in [`crate::gbn_sender`] and [`crate::sr_sender`].
//!
//! # Stop-and-Wait contract
//! - At most **one** packet is in flight at any moment (`unacked`).
//! - A new packet may only be sent once `unacked` is `None`.
//! - On an ACK equal to the in-flight seq: clear `unacked`.
//! - On timeout: increment `tx_count`; resend the same packet unchanged.

use crate::packet::Packet;

/// Sender half of a reliability mode.
pub trait SendStrategy: Send + std::fmt::Debug {
    /// Short tag used in log lines.
    fn name(&self) -> &'static str;

    /// `true` when the window has room for one more new packet.
    fn can_send(&self) -> bool;

    /// Take ownership of a packet that was just transmitted for the first time.
    fn record_sent(&mut self, packet: Packet);

    /// Process an inbound acknowledgement number.
    ///
    /// Returns the number of packets newly acknowledged; `0` for a
    /// duplicate, stale, or out-of-range ACK.
    fn on_ack(&mut self, ack: u32) -> usize;

    /// Packets to retransmit because the timer fired.
    fn on_timeout(&mut self) -> Vec<Packet>;

    /// Sequence number the retransmission timer should be armed for, or
    /// `None` when nothing is outstanding.
    fn timer_key(&self) -> Option<u32>;

    /// Number of packets sent but not yet acknowledged.
    fn in_flight(&self) -> usize;

    /// Transmissions so far of the unacknowledged packet `seq`, or `None`
    /// once it is acknowledged or was never sent.
    fn tx_count(&self, seq: u32) -> Option<u32>;

    /// `true` when at least one packet is awaiting acknowledgement.
    fn has_unacked(&self) -> bool {
        self.in_flight() > 0
    }
}

/// A packet that has been sent but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetransmitEntry {
    /// The packet on the wire.
    pub packet: Packet,
    /// How many times this packet has been transmitted (1 = first send).
    pub tx_count: u32,
}

impl RetransmitEntry {
    pub fn new(packet: Packet) -> Self {
        Self {
            packet,
            tx_count: 1,
        }
    }

    pub fn seq(&self) -> u32 {
        self.packet.header.seq
    }
}

/// Stop-and-wait send-side state for one connection.
#[derive(Debug, Default)]
pub struct StopAndWaitSender {
    /// The in-flight packet, or `None` when the sender is idle.
    pub unacked: Option<RetransmitEntry>,
}

impl StopAndWaitSender {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SendStrategy for StopAndWaitSender {
    fn name(&self) -> &'static str {
        "saw"
    }

    fn can_send(&self) -> bool {
        self.unacked.is_none()
    }

    fn record_sent(&mut self, packet: Packet) {
        debug_assert!(
            self.unacked.is_none(),
            "record_sent called while a packet is already in flight"
        );
        self.unacked = Some(RetransmitEntry::new(packet));
    }

    fn on_ack(&mut self, ack: u32) -> usize {
        match self.unacked {
            Some(ref entry) if entry.seq() == ack => {
                self.unacked = None;
                1
            }
            _ => 0,
        }
    }

    fn on_timeout(&mut self) -> Vec<Packet> {
        match self.unacked {
            Some(ref mut e) => {
                e.tx_count += 1;
                vec![e.packet.clone()]
            }
            None => Vec::new(),
        }
    }

    fn timer_key(&self) -> Option<u32> {
        self.unacked.as_ref().map(RetransmitEntry::seq)
    }

    fn in_flight(&self) -> usize {
        usize::from(self.unacked.is_some())
    }

    fn tx_count(&self, seq: u32) -> Option<u32> {
        self.unacked
            .as_ref()
            .filter(|e| e.seq() == seq)
            .map(|e| e.tx_count)
    }
}
