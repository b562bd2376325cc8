//! Selective-Repeat send-side state machine.
//!
//! Like [`crate::gbn_sender::GbnSender`], [`SrSender`] keeps up to `N`
//! packets in flight, but ACKs are **selective**: `ack = K` confirms packet
//! `K` only.  Each window slot carries its own `acked` flag.
//!
//! # Protocol contract
//!
//! - An ACK for a sent seq in `[base, base + N)` marks that slot; repeats are
//!   no-ops.
//! - While the left-edge slot is acked, it is evicted and `base` advances,
//!   freeing room for the next chunk.  A non-base ACK never moves `base`.
//! - The timer is keyed to the oldest **unacked** packet.  On timeout only
//!   that packet is resent; acked packets further right are never resent.

use std::collections::VecDeque;

use crate::packet::Packet;
use crate::sender::{RetransmitEntry, SendStrategy};

/// One window slot: a sent packet plus whether its ACK has arrived.
#[derive(Debug, Clone)]
pub struct SrSlot {
    pub entry: RetransmitEntry,
    pub acked: bool,
}

/// Selective-Repeat send-side state for one connection.
#[derive(Debug)]
pub struct SrSender {
    /// Sequence number of the left window edge (oldest unacked packet).
    pub base: u32,

    /// Sequence number the next new packet will carry.
    pub next_seq: u32,

    window_size: usize,

    /// `window[i]` holds seq `base + i`.  The front is never acked.
    window: VecDeque<SrSlot>,
}

impl SrSender {
    /// Create a new [`SrSender`] whose first data packet is seq 1.
    pub fn new(window_size: usize) -> Self {
        assert!(window_size >= 1, "window_size must be at least 1");
        Self {
            base: 1,
            next_seq: 1,
            window_size,
            window: VecDeque::with_capacity(window_size),
        }
    }

    fn slot(&self, seq: u32) -> Option<&SrSlot> {
        let offset = seq.checked_sub(self.base)? as usize;
        self.window.get(offset)
    }

    /// Slide the window over every acked slot at its left edge.
    fn slide(&mut self) -> usize {
        let mut slid = 0;
        while self.window.front().is_some_and(|s| s.acked) {
            self.window.pop_front();
            self.base += 1;
            slid += 1;
        }
        slid
    }
}

impl SendStrategy for SrSender {
    fn name(&self) -> &'static str {
        "sr"
    }

    fn can_send(&self) -> bool {
        self.window.len() < self.window_size
    }

    fn record_sent(&mut self, packet: Packet) {
        debug_assert!(self.can_send(), "record_sent called on a full SR window");
        debug_assert_eq!(packet.header.seq, self.next_seq);
        self.next_seq = packet.header.seq + 1;
        self.window.push_back(SrSlot {
            entry: RetransmitEntry::new(packet),
            acked: false,
        });
    }

    fn on_ack(&mut self, ack: u32) -> usize {
        if ack < self.base || ack >= self.next_seq {
            return 0;
        }
        let offset = (ack - self.base) as usize;
        let Some(slot) = self.window.get_mut(offset) else {
            return 0;
        };
        if slot.acked {
            return 0;
        }
        slot.acked = true;

        let slid = self.slide();
        if slid > 0 {
            log::trace!("[sr] window slid by {slid}; base={}", self.base);
        }
        1
    }

    /// Resend the oldest unacked packet only.
    fn on_timeout(&mut self) -> Vec<Packet> {
        self.window
            .iter_mut()
            .find(|s| !s.acked)
            .map(|s| {
                s.entry.tx_count += 1;
                vec![s.entry.packet.clone()]
            })
            .unwrap_or_default()
    }

    fn timer_key(&self) -> Option<u32> {
        self.window
            .iter()
            .find(|s| !s.acked)
            .map(|s| s.entry.seq())
    }

    fn in_flight(&self) -> usize {
        self.window.iter().filter(|s| !s.acked).count()
    }

    fn tx_count(&self, seq: u32) -> Option<u32> {
        self.slot(seq)
            .filter(|s| !s.acked)
            .map(|s| s.entry.tx_count)
    }

    /// Eviction keeps the front unacked, so a non-empty window always has
    /// something outstanding.
    fn has_unacked(&self) -> bool {
        !self.window.is_empty()
    }
}
