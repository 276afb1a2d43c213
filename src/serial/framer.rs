//! Splits a serial byte stream into 16-byte frames.
//!
//! A serial bridge forwards notifications as a raw stream, so frame
//! boundaries have to be recovered from the 0xAA header. Bytes before a
//! header are discarded; a frame is emitted once 16 bytes from a header
//! are buffered. Checksums are left to the codec.

use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;

use crate::protocol::frame::{FRAME_HEADER, FRAME_LENGTH};

#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: BytesMut,
    discarded: u64,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes, returning every complete frame in order
    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();

        loop {
            match self.buffer.iter().position(|&b| b == FRAME_HEADER) {
                Some(0) => {}
                Some(offset) => self.discard(offset),
                None => {
                    let all = self.buffer.len();
                    self.discard(all);
                    break;
                }
            }

            if self.buffer.len() < FRAME_LENGTH {
                break;
            }
            frames.push(self.buffer.split_to(FRAME_LENGTH).freeze());
        }

        frames
    }

    /// Bytes dropped while searching for a header
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn discard(&mut self, count: usize) {
        if count > 0 {
            trace!("Discarding {} bytes before frame header", count);
            self.buffer.advance(count);
            self.discarded += count as u64;
        }
    }
}
