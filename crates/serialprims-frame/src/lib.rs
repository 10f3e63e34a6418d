//! Binary framing for serial device links.
//!
//! Every frame on the wire is delimited and protected:
//! - A start-of-frame marker (`0xAA`) for stream synchronization
//! - A 2-byte little-endian length counting everything after itself
//! - Type, flags and a 4-byte sequence number
//! - A CRC-16/CCITT over length, header and payload, then an end marker (`0x55`)
//!
//! Decoding is byte-at-a-time and self-healing: corrupt input is reported as
//! a [`DecodeEvent::Error`] and the decoder resynchronizes on the next start
//! marker without dropping the bytes that follow.

pub mod codec;
pub mod crc;
pub mod decoder;
pub mod error;
pub mod flags;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

pub use codec::{
    encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, EOF, FRAME_OVERHEAD, HEADER_SIZE,
    LEN_OVERHEAD, MAX_ENCODABLE_PAYLOAD, MIN_LEN, SOF,
};
pub use crc::{crc16_ccitt, Crc16Ccitt, CONSOLE_CRC_INIT, FRAME_CRC_INIT};
pub use decoder::{DecodeEvent, DecoderStats, FrameDecoder};
pub use error::{FrameError, Result};
pub use flags::{Category, MessageType, IS_ERROR, IS_NOTIFICATION, IS_RESPONSE, SECURE};
pub use reader::FrameReader;
pub use writer::FrameWriter;

#[cfg(feature = "async")]
pub use async_codec::SerialFrameCodec;
