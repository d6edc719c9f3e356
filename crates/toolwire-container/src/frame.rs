//! Container engine stream multiplexing.
//!
//! When an exec session is attached without a TTY, the engine interleaves
//! stdout and stderr on a single connection. Every chunk is prefixed with an
//! 8-byte header:
//!
//! ```text
//! +------+-----------+---------------------------+
//! | kind | 0 | 0 | 0 | payload length (u32, BE)  |  payload ...
//! +------+-----------+---------------------------+
//! ```
//!
//! `kind` is 0 for stdin, 1 for stdout and 2 for stderr.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Size of the frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// Largest payload accepted by [`FrameCodec::default`].
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

/// Stream a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
    /// Any other kind byte. Consumed but carries no meaning for us.
    Other(u8),
}

impl StreamKind {
    /// Map a header byte to a stream kind.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => Self::Stdin,
            1 => Self::Stdout,
            2 => Self::Stderr,
            other => Self::Other(other),
        }
    }

    /// The header byte for this stream kind.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Stdin => 0,
            Self::Stdout => 1,
            Self::Stderr => 2,
            Self::Other(byte) => byte,
        }
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: StreamKind,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(kind: StreamKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }
}

/// Codec for the multiplexed stream format.
///
/// Decoding never consumes a partial frame: if the buffer does not yet hold
/// the full header and payload, `decode` returns `Ok(None)` and leaves the
/// buffer untouched.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_payload_len: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject frames announcing a payload larger than `max` bytes.
    pub fn with_max_payload_len(max: usize) -> Self {
        Self {
            max_payload_len: max,
        }
    }

    pub fn max_payload_len(&self) -> usize {
        self.max_payload_len
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
        if len > self.max_payload_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "frame payload of {len} bytes exceeds limit of {} bytes",
                    self.max_payload_len
                ),
            ));
        }

        let total = HEADER_LEN + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let kind = StreamKind::from_byte(src[0]);
        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();

        Ok(Some(Frame { kind, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), io::Error> {
        let len = u32::try_from(frame.payload.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "frame payload does not fit a 32-bit length",
            )
        })?;

        dst.reserve(HEADER_LEN + frame.payload.len());
        dst.put_u8(frame.kind.as_byte());
        dst.put_bytes(0, 3);
        dst.put_u32(len);
        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}

/// Encode a single frame into a fresh buffer.
///
/// Fails only when the payload is longer than `u32::MAX` bytes.
pub fn encode_frame(kind: StreamKind, payload: &[u8]) -> io::Result<Bytes> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    FrameCodec::default().encode(Frame::new(kind, Bytes::copy_from_slice(payload)), &mut buf)?;
    Ok(buf.freeze())
}
