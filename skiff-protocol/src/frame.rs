//! Framed transport: every message travels as one length-prefixed frame.
//!
//! ```text
//! +-------------+---------------------+
//! | payload_len | payload             |
//! | 4 bytes BE  | payload_len bytes   |
//! +-------------+---------------------+
//! ```

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the frame length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Default maximum frame payload size (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Prefixes `payload` with its length.
pub fn encode_frame(payload: &[u8], max_frame_size: usize) -> Result<BytesMut, ProtocolError> {
    let size = payload.len();
    if size > max_frame_size || u32::try_from(size).is_err() {
        return Err(ProtocolError::FrameTooLarge {
            size,
            max: max_frame_size,
        });
    }

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + size);
    buf.put_u32(size as u32);
    buf.put_slice(payload);
    Ok(buf)
}

/// Takes one complete frame off the front of `buf`.
///
/// Returns `Ok(None)` if more data is needed. An oversize length prefix is
/// rejected before any of its payload is buffered.
pub fn decode_frame(buf: &mut BytesMut, max_frame_size: usize) -> Result<Option<Bytes>, ProtocolError> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }

    let size = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if size > max_frame_size {
        return Err(ProtocolError::FrameTooLarge {
            size,
            max: max_frame_size,
        });
    }

    if buf.len() < FRAME_HEADER_SIZE + size {
        buf.reserve(FRAME_HEADER_SIZE + size - buf.len());
        return Ok(None);
    }

    buf.advance(FRAME_HEADER_SIZE);
    Ok(Some(buf.split_to(size).freeze()))
}

/// Accumulates bytes read from a stream and yields complete frame payloads.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            max_frame_size,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        decode_frame(&mut self.buffer, self.max_frame_size)
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
