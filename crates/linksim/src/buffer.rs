//! Ordered chunk queue owned by a transport.

use bytes::{Bytes, BytesMut};

/// FIFO of pending byte chunks.
///
/// Chunks are appended as they are written and drained all at once,
/// concatenated in write order. Draining hands ownership of the bytes to the
/// caller and leaves the queue empty.
#[derive(Debug, Clone, Default)]
pub struct ChunkQueue {
    chunks: Vec<Bytes>,
}

impl ChunkQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk. Empty chunks are dropped.
    pub fn push(&mut self, chunk: Bytes) {
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Number of pending chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Total number of pending bytes.
    pub fn byte_len(&self) -> usize {
        self.chunks.iter().map(Bytes::len).sum()
    }

    /// Take every pending chunk, concatenated. `None` if the queue is empty.
    pub fn drain_concat(&mut self) -> Option<Bytes> {
        match self.chunks.len() {
            0 => None,
            // Single chunk: hand it over without copying
            1 => self.chunks.pop(),
            _ => {
                let mut out = BytesMut::with_capacity(self.byte_len());
                for chunk in self.chunks.drain(..) {
                    out.extend_from_slice(&chunk);
                }
                Some(out.freeze())
            },
        }
    }

    /// Take every pending chunk individually, in write order.
    pub fn drain(&mut self) -> impl Iterator<Item = Bytes> + '_ {
        self.chunks.drain(..)
    }
}
