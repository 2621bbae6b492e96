//! Frame codec for the ticknet wire format
//!
//! Handles framing: the fixed 4-byte header, incremental decoding of complete
//! frames out of a byte stream, and building finalized send buffers.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{Message, PacketKind, HEADER_SIZE};

/// Read chunk size for the frame reader
const READ_CHUNK_SIZE: usize = 4096;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("stream ended inside a frame header")]
    IncompleteHeader,

    #[error("stream ended inside a frame payload")]
    IncompletePayload,

    #[error("malformed header: declared frame size {total_size} is smaller than the header")]
    MalformedHeader { total_size: u16 },

    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("unknown message type id: {0}")]
    UnknownType(u16),

    #[error("truncated payload: needed {needed} bytes, {available} available")]
    TruncatedPayload { needed: usize, available: usize },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// The fixed 4-byte prefix describing one complete frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Header + payload length in bytes
    pub total_size: u16,
    /// Message type id (see `PacketKind`)
    pub type_id: u16,
}

impl FrameHeader {
    /// Invariant: `total_size == HEADER_SIZE + payload length`
    pub fn payload_len(&self) -> usize {
        self.total_size as usize - HEADER_SIZE
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u16_le(self.total_size);
        buf.put_u16_le(self.type_id);
    }
}

/// One complete frame as received off the wire: header plus opaque payload.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl RawFrame {
    /// Resolve the header's type id, rejecting ids outside the protocol.
    pub fn kind(&self) -> Result<PacketKind, CodecError> {
        PacketKind::from_type_id(self.header.type_id)
            .ok_or(CodecError::UnknownType(self.header.type_id))
    }

    /// Decode the payload into a message.
    pub fn decode(&self) -> Result<Message, CodecError> {
        let mut payload = self.payload.clone();
        Message::decode_payload(self.kind()?, &mut payload)
    }
}

/// Incremental frame decoder.
///
/// Fed arbitrary chunks of stream bytes, yields only complete frames;
/// returns `Ok(None)` until enough bytes have accumulated. Chunk boundaries
/// never affect the decoded result.
pub struct FrameDecoder {
    max_frame_size: usize,
    state: DecodeState,
}

#[derive(Default, Clone, Copy)]
enum DecodeState {
    #[default]
    Header,
    Payload(FrameHeader),
}

impl FrameDecoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            state: DecodeState::Header,
        }
    }

    /// True when a header has been consumed and its payload is still pending.
    pub fn awaiting_payload(&self) -> bool {
        matches!(self.state, DecodeState::Payload(_))
    }

    /// Attempt to decode one frame from the buffer.
    /// Returns `Ok(None)` if more data is needed.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RawFrame>, CodecError> {
        loop {
            match self.state {
                DecodeState::Header => {
                    if buf.len() < HEADER_SIZE {
                        return Ok(None);
                    }

                    let total_size = u16::from_le_bytes([buf[0], buf[1]]);
                    let type_id = u16::from_le_bytes([buf[2], buf[3]]);

                    if (total_size as usize) < HEADER_SIZE {
                        return Err(CodecError::MalformedHeader { total_size });
                    }
                    if total_size as usize > self.max_frame_size {
                        return Err(CodecError::FrameTooLarge {
                            size: total_size as usize,
                            max: self.max_frame_size,
                        });
                    }

                    buf.advance(HEADER_SIZE);
                    self.state = DecodeState::Payload(FrameHeader {
                        total_size,
                        type_id,
                    });
                }
                DecodeState::Payload(header) => {
                    let payload_len = header.payload_len();
                    if buf.len() < payload_len {
                        return Ok(None);
                    }

                    let payload = buf.split_to(payload_len).freeze();
                    self.state = DecodeState::Header;

                    return Ok(Some(RawFrame { header, payload }));
                }
            }
        }
    }
}

/// A pre-sized buffer holding one encoded frame.
///
/// Allocated at exactly the computed frame size; `close` finalizes the
/// logical length and freezes the contents, so everything downstream of the
/// outbound queue sees an immutable buffer.
pub struct SendBuffer {
    buf: BytesMut,
    capacity: usize,
}

impl SendBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Bytes written so far
    pub fn write_size(&self) -> usize {
        self.buf.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Writer for the encode path
    pub fn writer(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Finalize the buffer. The frame must have been fully written.
    pub fn close(self) -> Bytes {
        debug_assert_eq!(self.buf.len(), self.capacity);
        self.buf.freeze()
    }
}

/// Encode one message into a finalized frame: header, then payload.
///
/// The frame size is computed up front via `Message::byte_size` and validated
/// against both the u16 header field and the configured maximum before any
/// bytes are written.
pub fn encode_frame(msg: &Message, max_frame_size: usize) -> Result<Bytes, CodecError> {
    let total_size = HEADER_SIZE + msg.byte_size();
    let max = max_frame_size.min(u16::MAX as usize);
    if total_size > max {
        return Err(CodecError::FrameTooLarge {
            size: total_size,
            max,
        });
    }

    let header = FrameHeader {
        total_size: total_size as u16,
        type_id: msg.type_id(),
    };

    let mut buffer = SendBuffer::with_capacity(total_size);
    header.encode(buffer.writer());
    msg.encode_payload(buffer.writer());
    Ok(buffer.close())
}

/// Reads complete frames from a byte source.
///
/// Owns the read half plus the accumulation buffer; never yields a partial
/// frame.
pub struct FrameReader<R> {
    src: R,
    buf: BytesMut,
    decoder: FrameDecoder,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(src: R, max_frame_size: usize) -> Self {
        Self {
            src,
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            decoder: FrameDecoder::new(max_frame_size),
        }
    }

    /// Read exactly one frame.
    ///
    /// Returns `Ok(None)` on a clean close at a frame boundary. A stream that
    /// ends mid-frame fails with `IncompleteHeader` or `IncompletePayload`
    /// depending on where it stopped.
    pub async fn read_frame(&mut self) -> Result<Option<RawFrame>, CodecError> {
        loop {
            if let Some(frame) = self.decoder.decode(&mut self.buf)? {
                return Ok(Some(frame));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let n = self.src.read(&mut chunk).await?;

            if n == 0 {
                if self.decoder.awaiting_payload() {
                    return Err(CodecError::IncompletePayload);
                }
                if self.buf.is_empty() {
                    return Ok(None); // Clean close
                }
                return Err(CodecError::IncompleteHeader);
            }

            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}
