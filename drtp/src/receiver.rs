//! Receive-side reliability strategies.
//!
//! A [`ReceiveStrategy`] takes every inbound data packet, decides whether its
//! payload joins the output stream, and returns the acknowledgement number
//! the connection should send back.  It never sends ACKs itself.
//!
//! [`InOrderReceiver`] serves both Stop-and-Wait and Go-Back-N:
//!
//! - Only **in-order** packets are accepted (`seq == expected_next`).
//! - Out-of-order and duplicate packets are **discarded**, never buffered.
//! - Every packet, accepted or not, is answered with the cumulative ACK
//!   `expected_next - 1`, so a gap shows up at the sender as duplicate ACKs.
//!
//! Selective-Repeat buffering lives in [`crate::sr_receiver`].

/// Receiver half of a reliability mode.
pub trait ReceiveStrategy: Send + std::fmt::Debug {
    /// Short tag used in log lines.
    fn name(&self) -> &'static str;

    /// Process one data packet; returns the ack number to send back.
    fn on_data(&mut self, seq: u32, payload: &[u8], fin: bool) -> u32;

    /// `true` once the FIN-flagged final chunk has been delivered in order.
    fn is_complete(&self) -> bool;

    /// Number of payload bytes delivered in order so far.
    fn delivered(&self) -> usize;

    /// Hand over the reassembled stream, leaving the receiver empty.
    fn take_output(&mut self) -> Vec<u8>;
}

/// Cumulative-ACK, in-order-only receive state for one connection.
#[derive(Debug)]
pub struct InOrderReceiver {
    /// Next expected sequence number.
    pub expected_next: u32,

    /// In-order payload bytes, ready for the application.
    output: Vec<u8>,

    complete: bool,
}

impl Default for InOrderReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl InOrderReceiver {
    pub fn new() -> Self {
        Self {
            expected_next: 1,
            output: Vec::new(),
            complete: false,
        }
    }

    /// Cumulative ACK number: last sequence number received in order.
    pub fn ack_number(&self) -> u32 {
        self.expected_next - 1
    }
}

impl ReceiveStrategy for InOrderReceiver {
    fn name(&self) -> &'static str {
        "in-order"
    }

    fn on_data(&mut self, seq: u32, payload: &[u8], fin: bool) -> u32 {
        if seq == self.expected_next && !self.complete {
            self.output.extend_from_slice(payload);
            self.expected_next += 1;
            self.complete = fin;
        }
        self.ack_number()
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn delivered(&self) -> usize {
        self.output.len()
    }

    fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }
}
