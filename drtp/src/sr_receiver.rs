//! Selective-Repeat receive-side state machine.
//!
//! [`SrReceiver`] accepts any packet inside `[base, base + N)`, buffers it
//! at offset `seq - base`, and ACKs it individually with `ack = seq`.  While
//! the slot at offset 0 is filled it is moved to the output stream and the
//! buffer shifts left, so one arrival can release a whole run of packets that
//! came in out of order.
//!
//! Packets from the previous window (`[base - N, base)`) are already
//! delivered, but their ACK may have been lost and the sender's window may
//! still be waiting on them, so they are re-ACKed with their own seq.
//! Anything further out is answered with `base - 1` and dropped.

use std::collections::VecDeque;

use crate::receiver::ReceiveStrategy;

#[derive(Debug, Clone)]
struct Buffered {
    payload: Vec<u8>,
    fin: bool,
}

/// Selective-Repeat receive state for one connection.
#[derive(Debug)]
pub struct SrReceiver {
    /// Next contiguous sequence number expected.
    pub base: u32,

    window_size: usize,

    /// `buffer[i]` holds seq `base + i` once it has arrived.
    buffer: VecDeque<Option<Buffered>>,

    output: Vec<u8>,
    complete: bool,
}

impl SrReceiver {
    pub fn new(window_size: usize) -> Self {
        assert!(window_size >= 1, "window_size must be at least 1");
        Self {
            base: 1,
            window_size,
            buffer: (0..window_size).map(|_| None).collect(),
            output: Vec::new(),
            complete: false,
        }
    }

    /// Number of out-of-order packets held back waiting for a gap to fill.
    pub fn buffered(&self) -> usize {
        self.buffer.iter().filter(|b| b.is_some()).count()
    }

    fn in_window(&self, seq: u32) -> bool {
        seq >= self.base && ((seq - self.base) as usize) < self.window_size
    }

    fn in_previous_window(&self, seq: u32) -> bool {
        seq < self.base && ((self.base - seq) as usize) <= self.window_size
    }

    /// Deliver every contiguous buffered packet from the left edge.
    fn deliver(&mut self) {
        while let Some(Some(_)) = self.buffer.front() {
            let Some(Some(b)) = self.buffer.pop_front() else {
                break;
            };
            self.buffer.push_back(None);
            self.output.extend_from_slice(&b.payload);
            self.base += 1;
            if b.fin {
                self.complete = true;
            }
        }
    }
}

impl ReceiveStrategy for SrReceiver {
    fn name(&self) -> &'static str {
        "sr"
    }

    fn on_data(&mut self, seq: u32, payload: &[u8], fin: bool) -> u32 {
        if self.in_window(seq) {
            let offset = (seq - self.base) as usize;
            let slot = &mut self.buffer[offset];
            if slot.is_none() && !self.complete {
                *slot = Some(Buffered {
                    payload: payload.to_vec(),
                    fin,
                });
                self.deliver();
            }
            seq
        } else if self.in_previous_window(seq) {
            seq
        } else {
            self.base - 1
        }
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
