//! Codec for encoding and decoding Beacon frames.
//!
//! This module provides JSON serialization with newline-delimited framing.
//! JSON string escaping guarantees that a payload never contains a raw
//! newline, so one line is always exactly one frame.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::frames::Frame;

/// Default maximum frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Frame delimiter.
pub const DELIMITER: u8 = b'\n';

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size exceeds maximum {0}")]
    FrameTooLarge(usize),

    /// The line is not a valid frame record.
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(serde_json::Error),

    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encode a frame to bytes.
///
/// The encoded format is one JSON object followed by a single `\n`.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf, MAX_FRAME_SIZE)?;
    Ok(buf.freeze())
}

/// Encode a frame into an existing buffer.
///
/// # Errors
///
/// Returns an error if the frame is larger than `max_size` or encoding fails.
pub fn encode_into(frame: &Frame, buf: &mut BytesMut, max_size: usize) -> Result<(), ProtocolError> {
    let line = serde_json::to_vec(frame).map_err(ProtocolError::Encode)?;

    if line.len() > max_size {
        return Err(ProtocolError::FrameTooLarge(max_size));
    }

    buf.reserve(line.len() + 1);
    buf.extend_from_slice(&line);
    buf.put_u8(DELIMITER);

    Ok(())
}

/// Decode a frame from one line.
///
/// A trailing `\n` (and `\r`) is tolerated.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] if the line is not a valid frame.
pub fn decode(line: &[u8]) -> Result<Frame, ProtocolError> {
    let line = trim_line_end(line);
    if line.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(MAX_FRAME_SIZE));
    }
    Ok(serde_json::from_slice(line)?)
}

fn trim_line_end(mut line: &[u8]) -> &[u8] {
    while let [rest @ .., b'\n' | b'\r'] = line {
        line = rest;
    }
    line
}

/// Streaming codec for `tokio_util` framed readers and writers.
///
/// Blank lines are skipped; anything else that fails to parse is an error,
/// which callers treat as fatal for the connection.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
    next_index: usize,
}

impl FrameCodec {
    /// Create a codec with the default size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Create a codec accepting lines of at most `max_frame_size` bytes.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            next_index: 0,
        }
    }

    /// The configured size limit.
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        loop {
            let newline = src[self.next_index..]
                .iter()
                .position(|b| *b == DELIMITER)
                .map(|offset| self.next_index + offset);

            let Some(end) = newline else {
                if src.len() > self.max_frame_size {
                    return Err(ProtocolError::FrameTooLarge(self.max_frame_size));
                }
                self.next_index = src.len();
                return Ok(None);
            };

            self.next_index = 0;
            let line = src.split_to(end + 1);
            if end > self.max_frame_size {
                return Err(ProtocolError::FrameTooLarge(self.max_frame_size));
            }

            let line = trim_line_end(&line);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(serde_json::from_slice(line)?));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        self.next_index = 0;
        if src.iter().all(u8::is_ascii_whitespace) {
            src.clear();
            return Ok(None);
        }
        let rest = src.split();
        Ok(Some(decode(&rest)?))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        encode_into(&frame, dst, self.max_frame_size)
    }
}
