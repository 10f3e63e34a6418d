use std::collections::VecDeque;
use std::io::{ErrorKind, Read};

use serialprims_transport::{SerialStream, TransportError};
use tracing::warn;

use crate::codec::{Frame, FrameConfig};
use crate::decoder::{DecodeEvent, DecoderStats, FrameDecoder};
use crate::error::{FrameError, Result};

const READ_CHUNK_SIZE: usize = 1024;

/// Reads frames from any `Read` stream.
///
/// Handles partial reads and resynchronization internally. Decode faults are
/// surfaced through [`FrameReader::read_event`] or skipped by
/// [`FrameReader::read_frame`].
pub struct FrameReader<T> {
    inner: T,
    decoder: FrameDecoder,
    pending: VecDeque<DecodeEvent>,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(config.max_payload_size),
            pending: VecDeque::new(),
            config,
        }
    }

    /// Read the next decoder event (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached, even
    /// if a partial frame was buffered.
    pub fn read_event(&mut self) -> Result<DecodeEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.pending.extend(self.decoder.push(&chunk[..read]));
        }
    }

    /// Read the next complete frame (blocking), skipping decode faults.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            match self.read_event()? {
                DecodeEvent::Frame(frame) => return Ok(frame),
                DecodeEvent::Error(err) => {
                    warn!(error = %err, "dropping corrupt frame");
                }
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Decoder counters (frames, faults, skipped bytes).
    pub fn stats(&self) -> DecoderStats {
        self.decoder.stats()
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<SerialStream> {
    /// Create a frame reader for a `SerialStream` and apply the read timeout
    /// from config, if any.
    pub fn with_config_serial(inner: SerialStream, config: FrameConfig) -> Result<Self> {
        if config.read_timeout.is_some() {
            inner
                .set_read_timeout(config.read_timeout)
                .map_err(transport_to_frame_error)?;
        }
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: TransportError) -> FrameError {
    match err {
        TransportError::Io(io) => FrameError::Io(io),
        TransportError::Open { source, .. } | TransportError::Connect { source, .. } => {
            FrameError::Io(source)
        }
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
