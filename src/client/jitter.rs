//! Audio jitter buffer
//!
//! A short FIFO of decoded PCM blocks between the network and the audio
//! output. Arrivals beyond the capacity push out the oldest block, so latency
//! stays bounded; an empty buffer plays silence instead of stalling.

use std::collections::VecDeque;

use crate::media::pcm::to_f32;

/// Default number of blocks held
pub const DEFAULT_CAPACITY: usize = 5;

/// Bounded FIFO of PCM16 blocks
#[derive(Debug)]
pub struct JitterBuffer {
    /// Maximum number of blocks
    capacity: usize,
    /// Buffered blocks, oldest first
    blocks: VecDeque<Vec<i16>>,
}

impl JitterBuffer {
    /// Create a buffer with the default capacity (5 blocks)
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a buffer holding at most `capacity` blocks
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            blocks: VecDeque::with_capacity(capacity + 1),
        }
    }

    /// Append a block
    ///
    /// Returns the number of old blocks dropped to make room.
    pub fn push(&mut self, block: Vec<i16>) -> usize {
        self.blocks.push_back(block);

        let mut dropped = 0;
        while self.blocks.len() > self.capacity {
            self.blocks.pop_front();
            dropped += 1;
        }
        dropped
    }

    /// Fill `out` from the oldest block
    ///
    /// Samples are rescaled to `[-1.0, 1.0)`. Positions past the end of the
    /// block, or the whole of `out` when nothing is buffered, are zeroed.
    /// Returns true if a block was consumed.
    pub fn pull_into(&mut self, out: &mut [f32]) -> bool {
        match self.blocks.pop_front() {
            Some(block) => {
                for (i, slot) in out.iter_mut().enumerate() {
                    *slot = block.get(i).copied().map(to_f32).unwrap_or(0.0);
                }
                true
            }
            None => {
                out.fill(0.0);
                false
            }
        }
    }

    /// Drop every buffered block
    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    /// Number of buffered blocks
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Check if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Maximum number of blocks
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for JitterBuffer {
    fn default() -> Self {
        Self::new()
    }
}
