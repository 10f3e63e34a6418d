/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The declared length is smaller than the fixed frame overhead.
    #[error("invalid frame length {len} (min {min})")]
    InvalidLength { len: u16, min: u16 },

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The byte where the end marker belongs is something else.
    #[error("missing end-of-frame marker (got 0x{found:02X}, expected 0x55)")]
    InvalidEndMarker { found: u8 },

    /// The received CRC does not match the one computed over the frame.
    #[error("checksum mismatch (received 0x{received:04X}, computed 0x{computed:04X})")]
    ChecksumMismatch { received: u16, computed: u16 },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed.
    #[error("connection closed")]
    ConnectionClosed,
}

impl FrameError {
    /// True for faults the decoder recovers from by resynchronizing.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FrameError::InvalidLength { .. }
                | FrameError::PayloadTooLarge { .. }
                | FrameError::InvalidEndMarker { .. }
                | FrameError::ChecksumMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
