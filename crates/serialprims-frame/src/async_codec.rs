//! `tokio_util::codec` adapter over [`FrameDecoder`].
//!
//! Items are [`DecodeEvent`]s rather than frames so corrupt input does not
//! terminate a `FramedRead`; only I/O failures surface as stream errors.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::codec::{encode_frame, Frame, FrameConfig};
use crate::decoder::{DecodeEvent, FrameDecoder};
use crate::error::FrameError;

/// Codec for use with `FramedRead`/`FramedWrite` over async serial streams.
#[derive(Debug)]
pub struct SerialFrameCodec {
    decoder: FrameDecoder,
    max_payload_size: usize,
}

impl SerialFrameCodec {
    pub fn new() -> Self {
        Self::with_config(&FrameConfig::default())
    }

    pub fn with_config(config: &FrameConfig) -> Self {
        Self {
            decoder: FrameDecoder::new(config.max_payload_size),
            max_payload_size: config.max_payload_size,
        }
    }

    pub fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }
}

impl Default for SerialFrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for SerialFrameCodec {
    type Item = DecodeEvent;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.decoder.decode_next(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let event = self.decoder.decode_next(src);
        if event.is_none() && self.decoder.in_frame() {
            debug!("stream ended inside a frame; discarding partial frame");
            self.decoder.reset();
        }
        Ok(event)
    }
}

impl Encoder<Frame> for SerialFrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if frame.payload.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: frame.payload.len(),
                max: self.max_payload_size,
            });
        }
        encode_frame(&frame, dst)
    }
}
