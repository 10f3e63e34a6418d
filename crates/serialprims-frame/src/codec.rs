use bytes::{BufMut, Bytes, BytesMut};

use crate::crc::{Crc16Ccitt, FRAME_CRC_INIT};
use crate::error::{FrameError, Result};

/// Start-of-frame marker.
pub const SOF: u8 = 0xAA;

/// End-of-frame marker.
pub const EOF: u8 = 0x55;

/// Header after SOF: length (2) + type (2) + flags (1) + seq (4) = 9 bytes.
pub const HEADER_SIZE: usize = 9;

/// Bytes counted by LEN besides the payload: type + flags + seq + crc + eof.
pub const LEN_OVERHEAD: usize = 10;

/// Smallest valid LEN (zero-length payload).
pub const MIN_LEN: u16 = LEN_OVERHEAD as u16;

/// Total wire bytes around a payload: SOF + LEN + [`LEN_OVERHEAD`].
pub const FRAME_OVERHEAD: usize = 1 + 2 + LEN_OVERHEAD;

/// Default maximum payload size accepted by the decoder: 4 KiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 4096;

/// Largest payload whose LEN still fits in 16 bits.
pub const MAX_ENCODABLE_PAYLOAD: usize = u16::MAX as usize - LEN_OVERHEAD;

/// A decoded (or to-be-encoded) binary frame.
///
/// LEN and CRC are derived from the other fields; see [`Frame::length`] and
/// [`Frame::checksum`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message type (category nibble + message id).
    pub msg_type: u16,
    /// Message semantics flags (see [`crate::flags`]).
    pub flags: u8,
    /// Sequence number correlating a request with its response.
    pub seq: u32,
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(msg_type: u16, flags: u8, seq: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            msg_type,
            flags,
            seq,
            payload: payload.into(),
        }
    }

    /// Value of the LEN field: bytes on the wire after LEN itself.
    pub fn length(&self) -> usize {
        LEN_OVERHEAD + self.payload.len()
    }

    /// The total wire size of this frame.
    pub fn wire_size(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }

    /// CRC over LEN, TYPE, FLAGS, SEQ and PAYLOAD as they appear on the wire.
    ///
    /// Only meaningful for payloads up to [`MAX_ENCODABLE_PAYLOAD`].
    pub fn checksum(&self) -> u16 {
        let mut header = [0u8; HEADER_SIZE];
        write_header(&mut header, self.length() as u16, self);
        let mut crc = Crc16Ccitt::new(FRAME_CRC_INIT);
        crc.update(&header);
        crc.update(&self.payload);
        crc.finalize()
    }

    /// Returns true if the response bit is set.
    pub fn is_response(&self) -> bool {
        crate::flags::is_response(self.flags)
    }

    /// Returns true if the notification bit is set.
    pub fn is_notification(&self) -> bool {
        crate::flags::is_notification(self.flags)
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        encode_frame(self, &mut buf)?;
        Ok(buf.freeze())
    }
}

pub(crate) fn write_header(dst: &mut [u8; HEADER_SIZE], len: u16, frame: &Frame) {
    dst[0..2].copy_from_slice(&len.to_le_bytes());
    dst[2..4].copy_from_slice(&frame.msg_type.to_le_bytes());
    dst[4] = frame.flags;
    dst[5..9].copy_from_slice(&frame.seq.to_le_bytes());
}

/// Encode a frame into the wire format.
///
/// Wire format (multi-byte fields little-endian):
/// ```text
/// ┌─────┬─────┬──────┬───────┬─────┬─────────┬─────┬─────┐
/// │ SOF │ LEN │ TYPE │ FLAGS │ SEQ │ PAYLOAD │ CRC │ EOF │
/// │ 0xAA│ 2B  │ 2B   │ 1B    │ 4B  │ LEN-10  │ 2B  │ 0x55│
/// └─────┴─────┴──────┴───────┴─────┴─────────┴─────┴─────┘
///          └──────────── CRC scope ──────────┘
/// ```
/// LEN and CRC are always recomputed here.
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    if frame.payload.len() > MAX_ENCODABLE_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: frame.payload.len(),
            max: MAX_ENCODABLE_PAYLOAD,
        });
    }

    let mut header = [0u8; HEADER_SIZE];
    write_header(&mut header, frame.length() as u16, frame);

    let mut crc = Crc16Ccitt::new(FRAME_CRC_INIT);
    crc.update(&header);
    crc.update(&frame.payload);

    dst.reserve(frame.wire_size());
    dst.put_u8(SOF);
    dst.put_slice(&header);
    dst.put_slice(&frame.payload);
    dst.put_u16_le(crc.finalize());
    dst.put_u8(EOF);
    Ok(())
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 4 KiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
