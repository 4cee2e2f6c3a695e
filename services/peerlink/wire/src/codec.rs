//! Streaming frame decoder.
//!
//! Bytes arrive from the transport in arbitrary chunks. [`FrameCodec`]
//! accumulates them and hands back each payload as soon as its frame is
//! complete.

use crate::frame::{peek_frame_len, HARD_MAX_FRAME_SIZE, LEN_PREFIX_SIZE};
use crate::WireError;
use bytes::{Buf, Bytes, BytesMut};
use tracing::warn;

/// Partial-frame accumulator for one inbound byte stream
#[derive(Debug)]
pub struct FrameCodec {
    buf: BytesMut,
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a new codec accepting payloads up to `max_frame_size` bytes
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
            max_frame_size: max_frame_size.min(HARD_MAX_FRAME_SIZE),
        }
    }

    /// Largest payload this codec accepts
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Number of bytes held back waiting for the rest of a frame
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop any partial frame.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Append `data` and iterate over every frame completed so far.
    ///
    /// Each payload is removed from the buffer as it is yielded. Frames left
    /// unread when the iterator is dropped stay buffered for the next call.
    pub fn feed(&mut self, data: &[u8]) -> Frames<'_> {
        self.buf.extend_from_slice(data);
        Frames {
            codec: self,
            failed: false,
        }
    }

    /// Decode one frame from the buffer
    pub fn decode(&mut self) -> Result<Option<Bytes>, WireError> {
        let Some(len) = peek_frame_len(&self.buf) else {
            return Ok(None);
        };

        if len > self.max_frame_size {
            // The stream cannot be resynchronised past a bad length.
            warn!(
                "Rejecting frame of {} bytes (limit {}), discarding {} buffered bytes",
                len,
                self.max_frame_size,
                self.buf.len()
            );
            self.buf.clear();
            return Err(WireError::Size {
                len,
                max: self.max_frame_size,
            });
        }

        if self.buf.len() < LEN_PREFIX_SIZE + len {
            self.buf.reserve(LEN_PREFIX_SIZE + len - self.buf.len());
            return Ok(None);
        }

        self.buf.advance(LEN_PREFIX_SIZE);
        Ok(Some(self.buf.split_to(len).freeze()))
    }
}

/// Lazy sequence of payloads produced by [`FrameCodec::feed`]
#[derive(Debug)]
pub struct Frames<'a> {
    codec: &'a mut FrameCodec,
    failed: bool,
}

impl Iterator for Frames<'_> {
    type Item = Result<Bytes, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.codec.decode() {
            Ok(Some(payload)) => Some(Ok(payload)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
