//! Incremental, byte-at-a-time frame decoder.
//!
//! The decoder walks `SeekingSof -> Header -> Payload -> Crc -> Eof` one byte
//! at a time. Any structural fault is reported as [`DecodeEvent::Error`] and
//! the bytes consumed after the faulty start marker are fed through the state
//! machine again, so a real frame hiding behind a false start is never lost.

use std::collections::VecDeque;

use bytes::{Buf, BytesMut};
use tracing::{trace, warn};

use crate::codec::{Frame, DEFAULT_MAX_PAYLOAD, EOF, HEADER_SIZE, LEN_OVERHEAD, MIN_LEN, SOF};
use crate::crc::{Crc16Ccitt, FRAME_CRC_INIT};
use crate::error::FrameError;

/// Output of the decoder: a complete frame or a recoverable fault.
#[derive(Debug)]
pub enum DecodeEvent {
    Frame(Frame),
    Error(FrameError),
}

/// Counters kept across the decoder's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Frames emitted.
    pub frames: u64,
    /// Faults emitted.
    pub errors: u64,
    /// Bytes dropped while hunting for a start marker. A byte that was
    /// part of a faulted frame is counted at most once, when its replay
    /// finds no marker.
    pub skipped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SeekingSof,
    Header,
    Payload,
    Crc,
    Eof,
}

/// Streaming decoder for SOF/EOF delimited frames.
#[derive(Debug)]
pub struct FrameDecoder {
    max_payload: usize,
    state: State,
    header: [u8; HEADER_SIZE],
    header_len: usize,
    payload_len: usize,
    payload: BytesMut,
    crc_bytes: [u8; 2],
    crc_len: usize,
    digest: Crc16Ccitt,
    // Everything consumed since the current SOF, SOF excluded.
    raw: Vec<u8>,
    replay: VecDeque<u8>,
    stats: DecoderStats,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl FrameDecoder {
    /// Create a decoder that rejects payloads larger than `max_payload`.
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload,
            state: State::SeekingSof,
            header: [0; HEADER_SIZE],
            header_len: 0,
            payload_len: 0,
            payload: BytesMut::new(),
            crc_bytes: [0; 2],
            crc_len: 0,
            digest: Crc16Ccitt::new(FRAME_CRC_INIT),
            raw: Vec::new(),
            replay: VecDeque::new(),
            stats: DecoderStats::default(),
        }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// True while a partially received frame is buffered.
    pub fn in_frame(&self) -> bool {
        self.state != State::SeekingSof || !self.replay.is_empty()
    }

    /// Drop any partial frame and go back to hunting for a start marker.
    pub fn reset(&mut self) {
        self.clear_frame();
        self.replay.clear();
    }

    /// Feed a chunk of bytes, collecting every event it completes.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<DecodeEvent> {
        let mut src = bytes;
        let mut events = Vec::new();
        while let Some(event) = self.decode_next(&mut src) {
            events.push(event);
        }
        events
    }

    /// Feed a single byte.
    pub fn push_byte(&mut self, byte: u8) -> Vec<DecodeEvent> {
        self.push(&[byte])
    }

    /// Consume bytes from `src` until one event is produced.
    ///
    /// Returns `None` once `src` is exhausted without completing an event;
    /// partial state is kept for the next call.
    pub fn decode_next<B: Buf>(&mut self, src: &mut B) -> Option<DecodeEvent> {
        loop {
            let byte = match self.replay.pop_front() {
                Some(byte) => byte,
                None if src.has_remaining() => src.get_u8(),
                None => return None,
            };
            if let Some(event) = self.step(byte) {
                return Some(event);
            }
        }
    }

    fn step(&mut self, byte: u8) -> Option<DecodeEvent> {
        if self.state == State::SeekingSof {
            if byte == SOF {
                self.state = State::Header;
            } else {
                self.stats.skipped += 1;
                trace!(byte, "skipping byte outside frame");
            }
            return None;
        }

        self.raw.push(byte);

        match self.state {
            State::SeekingSof => None,
            State::Header => {
                self.header[self.header_len] = byte;
                self.header_len += 1;
                self.digest.update(&[byte]);

                if self.header_len == 2 {
                    let len = u16::from_le_bytes([self.header[0], self.header[1]]);
                    if len < MIN_LEN {
                        return Some(self.fail(FrameError::InvalidLength { len, min: MIN_LEN }));
                    }
                    let size = usize::from(len) - LEN_OVERHEAD;
                    if size > self.max_payload {
                        return Some(self.fail(FrameError::PayloadTooLarge {
                            size,
                            max: self.max_payload,
                        }));
                    }
                    self.payload_len = size;
                }

                if self.header_len == HEADER_SIZE {
                    self.payload.reserve(self.payload_len);
                    self.state = if self.payload_len == 0 {
                        State::Crc
                    } else {
                        State::Payload
                    };
                }
                None
            }
            State::Payload => {
                self.payload.extend_from_slice(&[byte]);
                self.digest.update(&[byte]);
                if self.payload.len() == self.payload_len {
                    self.state = State::Crc;
                }
                None
            }
            State::Crc => {
                self.crc_bytes[self.crc_len] = byte;
                self.crc_len += 1;
                if self.crc_len < 2 {
                    return None;
                }
                let received = u16::from_le_bytes(self.crc_bytes);
                let computed = self.digest.clone().finalize();
                if received != computed {
                    return Some(self.fail(FrameError::ChecksumMismatch { received, computed }));
                }
                self.state = State::Eof;
                None
            }
            State::Eof => {
                if byte != EOF {
                    return Some(self.fail(FrameError::InvalidEndMarker { found: byte }));
                }
                let frame = Frame {
                    msg_type: u16::from_le_bytes([self.header[2], self.header[3]]),
                    flags: self.header[4],
                    seq: u32::from_le_bytes([
                        self.header[5],
                        self.header[6],
                        self.header[7],
                        self.header[8],
                    ]),
                    payload: self.payload.split().freeze(),
                };
                self.clear_frame();
                self.stats.frames += 1;
                Some(DecodeEvent::Frame(frame))
            }
        }
    }

    fn fail(&mut self, err: FrameError) -> DecodeEvent {
        warn!(error = %err, replay = self.raw.len(), "frame decode fault; resynchronizing");
        let raw = std::mem::take(&mut self.raw);
        self.clear_frame();
        // Replayed bytes go ahead of anything still queued from an earlier fault.
        for byte in raw.into_iter().rev() {
            self.replay.push_front(byte);
        }
        self.stats.errors += 1;
        DecodeEvent::Error(err)
    }

    fn clear_frame(&mut self) {
        self.state = State::SeekingSof;
        self.header_len = 0;
        self.payload_len = 0;
        self.payload.clear();
        self.crc_len = 0;
        self.digest = Crc16Ccitt::new(FRAME_CRC_INIT);
        self.raw.clear();
    }
}
