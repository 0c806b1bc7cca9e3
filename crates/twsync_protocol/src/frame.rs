//! Streaming frame decoder.

use crate::decoder::{frame_length, MessageDecoder};
use crate::error::CodecResult;
use crate::limits::{CodecLimits, LENGTH_PREFIX_SIZE};
use crate::message::Message;
use bytes::{Buf, BytesMut};

/// Accumulates bytes from a stream and yields complete messages.
///
/// Feed bytes with [`extend`](Self::extend) as they arrive and call
/// [`decode_next`](Self::decode_next) until it returns `Ok(None)`.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    decoder: MessageDecoder,
}

impl FrameDecoder {
    /// Creates an empty frame decoder.
    pub fn new(limits: CodecLimits) -> Self {
        Self {
            buffer: BytesMut::new(),
            decoder: MessageDecoder::new(limits),
        }
    }

    /// Appends received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Returns the next complete message, or `None` while one is still
    /// arriving.
    ///
    /// # Errors
    ///
    /// A `Framing` error leaves the buffer unusable; the stream must be
    /// abandoned. Other errors consume the offending frame.
    pub fn decode_next(&mut self) -> CodecResult<Option<Message>> {
        let declared = match frame_length(&self.buffer, self.decoder.limits()) {
            Ok(declared) => declared,
            Err(e) if e.is_incomplete() => return Ok(None),
            Err(e) => return Err(e),
        };
        if self.buffer.len() < declared {
            return Ok(None);
        }

        let mut frame = self.buffer.split_to(declared);
        frame.advance(LENGTH_PREFIX_SIZE);
        self.decoder.decode_payload(&frame).map(Some)
    }

    /// Returns the number of buffered bytes not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if part of a frame has been received.
    pub fn is_mid_frame(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Discards all buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
