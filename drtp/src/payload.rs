//! Outbound payload chunking.
//!
//! The sender pulls data one chunk at a time through [`ChunkFeed`], which
//! numbers chunks from 1 and looks one chunk ahead so the final chunk can be
//! flagged with FIN when it is first sent.

use std::io::{self, Read};

use crate::packet::MAX_PAYLOAD;

/// A finite byte sequence that can be consumed in bounded pieces.
pub trait PayloadSource: Send {
    /// Produce the next chunk of at most `max_len` bytes, or `None` at end
    /// of data.  Returned chunks are never empty.
    fn next_chunk(&mut self, max_len: usize) -> io::Result<Option<Vec<u8>>>;
}

impl<R: Read + Send> PayloadSource for R {
    fn next_chunk(&mut self, max_len: usize) -> io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; max_len];
        let mut filled = 0;
        // Short reads are legal for files and pipes; keep going until full or EOF.
        while filled < max_len {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        Ok(Some(buf))
    }
}

/// One numbered piece of the outbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub seq: u32,
    pub payload: Vec<u8>,
    /// `true` for the final chunk of the transfer.
    pub last: bool,
}

/// Numbered, FIN-aware view over a [`PayloadSource`].
pub struct ChunkFeed {
    source: Box<dyn PayloadSource>,
    chunk_len: usize,
    lookahead: Option<Vec<u8>>,
    primed: bool,
    next_seq: u32,
}

impl ChunkFeed {
    /// Feed producing chunks of up to [`MAX_PAYLOAD`] bytes.
    pub fn new(source: impl PayloadSource + 'static) -> Self {
        Self::with_chunk_len(source, MAX_PAYLOAD)
    }

    /// Feed producing chunks of up to `chunk_len` bytes (clamped to
    /// `1..=MAX_PAYLOAD`).
    pub fn with_chunk_len(source: impl PayloadSource + 'static, chunk_len: usize) -> Self {
        Self {
            source: Box::new(source),
            chunk_len: chunk_len.clamp(1, MAX_PAYLOAD),
            lookahead: None,
            primed: false,
            next_seq: 1,
        }
    }

    /// Feed over an in-memory buffer.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self::new(io::Cursor::new(data))
    }

    fn prime(&mut self) -> io::Result<()> {
        if !self.primed {
            self.lookahead = self.source.next_chunk(self.chunk_len)?;
            self.primed = true;
        }
        Ok(())
    }

    /// Take the next chunk, or `None` once the source is drained.
    pub fn next_chunk(&mut self) -> io::Result<Option<Chunk>> {
        self.prime()?;
        let Some(payload) = self.lookahead.take() else {
            return Ok(None);
        };
        self.lookahead = self.source.next_chunk(self.chunk_len)?;

        let chunk = Chunk {
            seq: self.next_seq,
            payload,
            last: self.lookahead.is_none(),
        };
        self.next_seq += 1;
        Ok(Some(chunk))
    }

    /// `true` once every chunk has been handed out.
    pub fn is_exhausted(&self) -> bool {
        self.primed && self.lookahead.is_none()
    }
}

impl std::fmt::Debug for ChunkFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkFeed")
            .field("chunk_len", &self.chunk_len)
            .field("next_seq", &self.next_seq)
            .field("exhausted", &self.is_exhausted())
            .finish()
    }
}
