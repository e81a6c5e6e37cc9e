//! Fragment reassembly.
//!
//! A logical frame may arrive as several transport chunks; only the chunk
//! flagged `end_of_message` completes it. The buffer is zeroized as soon as
//! a frame is handed out so no decrypted remnants linger between frames.

use zeroize::{Zeroize, Zeroizing};

use crate::codec::Frame;
use crate::error::{ChatLinkError, Result};

/// Accumulates chunks into complete frames
pub struct FrameAssembler {
    buffer: Zeroizing<Vec<u8>>,
    max_frame_bytes: usize,
}

impl FrameAssembler {
    /// Create an assembler that rejects frames above `max_frame_bytes`
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: Zeroizing::new(Vec::new()),
            max_frame_bytes,
        }
    }

    /// Add a chunk. Returns the frame when `end_of_message` completes it.
    pub fn push(&mut self, chunk: &[u8], end_of_message: bool) -> Result<Option<Frame>> {
        if self.buffer.len() + chunk.len() > self.max_frame_bytes {
            let total = self.buffer.len() + chunk.len();
            self.reset();
            return Err(ChatLinkError::Decode(format!(
                "frame exceeds {} bytes ({total} buffered)",
                self.max_frame_bytes
            )));
        }

        self.buffer.extend_from_slice(chunk);
        if !end_of_message {
            return Ok(None);
        }

        let frame = Frame::new(self.buffer.to_vec());
        self.buffer.zeroize();
        Ok(Some(frame))
    }

    /// Bytes buffered for the frame in progress
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Discard any partial frame
    pub fn reset(&mut self) {
        self.buffer.zeroize();
    }
}

impl std::fmt::Debug for FrameAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameAssembler")
            .field("pending", &self.buffer.len())
            .field("max_frame_bytes", &self.max_frame_bytes)
            .finish()
    }
}
