//! Go-Back-N send-side state machine.
//!
//! [`GbnSender`] maintains a sliding window of up to `N` in-flight packets.
//! Unlike stop-and-wait, multiple packets may be outstanding simultaneously.
//!
//! # Protocol contract
//!
//! - At most `window_size` packets may be in flight at once.
//! - ACKs are **cumulative**: `ack = K` means the receiver has accepted every
//!   packet up to and including sequence number `K`.
//! - One timer covers the whole window and is keyed to `send_base`; every
//!   ACK that slides the window therefore restarts it.
//! - On timeout, **all** unacked packets from `send_base` onwards are
//!   retransmitted (go back to N).
//!
//! This module only manages state; all socket I/O is the caller's responsibility.

use std::collections::VecDeque;

use crate::packet::Packet;
use crate::sender::{RetransmitEntry, SendStrategy};

/// Go-Back-N send-side state for one connection.
///
/// # Sequence-number layout
///
/// ```text
///  send_base          next_seq
///      │                  │
///  ────┼──────────────────┼──────────────────▶ seq space
///      │ <── in flight ──▶│ <── sendable ───▶
/// ```
#[derive(Debug)]
pub struct GbnSender {
    /// Sequence number of the **oldest** unacked packet (left window edge).
    pub send_base: u32,

    /// Sequence number the **next** new packet will carry.
    pub next_seq: u32,

    /// Maximum number of packets that may be in flight simultaneously (N).
    window_size: usize,

    /// In-flight packets ordered by sequence number (front = oldest).
    window: VecDeque<RetransmitEntry>,
}

impl GbnSender {
    /// Create a new [`GbnSender`] whose first data packet is seq 1.
    ///
    /// `window_size` is the GBN window size N (≥ 1).
    pub fn new(window_size: usize) -> Self {
        assert!(window_size >= 1, "window_size must be at least 1");
        Self {
            send_base: 1,
            next_seq: 1,
            window_size,
            window: VecDeque::with_capacity(window_size),
        }
    }
}

impl SendStrategy for GbnSender {
    fn name(&self) -> &'static str {
        "gbn"
    }

    fn can_send(&self) -> bool {
        self.window.len() < self.window_size
    }

    /// Place a just-transmitted packet into the window and advance `next_seq`.
    fn record_sent(&mut self, packet: Packet) {
        debug_assert!(
            self.can_send(),
            "record_sent called on a full GBN window ({} / {})",
            self.window.len(),
            self.window_size
        );
        debug_assert_eq!(packet.header.seq, self.next_seq);
        self.next_seq = packet.header.seq + 1;
        self.window.push_back(RetransmitEntry::new(packet));
    }

    /// Removes every window entry with seq ≤ `ack`, advances `send_base`,
    /// and returns the number of newly-acknowledged packets.
    fn on_ack(&mut self, ack: u32) -> usize {
        // Behind the window (duplicate) or beyond anything sent (spurious).
        if ack < self.send_base || ack >= self.next_seq {
            return 0;
        }

        let mut acked = 0usize;
        while let Some(front) = self.window.front() {
            if front.seq() <= ack {
                self.window.pop_front();
                acked += 1;
            } else {
                break;
            }
        }
        self.send_base = ack + 1;
        acked
    }

    /// Every in-flight packet, oldest first; bumps each `tx_count`.
    fn on_timeout(&mut self) -> Vec<Packet> {
        self.window
            .iter_mut()
            .map(|e| {
                e.tx_count += 1;
                e.packet.clone()
            })
            .collect()
    }

    fn timer_key(&self) -> Option<u32> {
        self.window.front().map(RetransmitEntry::seq)
    }

    fn in_flight(&self) -> usize {
        self.window.len()
    }

    fn tx_count(&self, seq: u32) -> Option<u32> {
        let offset = seq.checked_sub(self.send_base)? as usize;
        self.window.get(offset).map(|e| e.tx_count)
    }
}
