/// Errors raised while packing or reassembling console transmissions.
///
/// Every reassembly error discards the whole transmission; the link stays
/// usable for the next one.
#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    /// A fragment does not start with the marker expected at its position.
    #[error("fragment {index} has marker {found:02X?}, expected {expected:02X?}")]
    InvalidMarker {
        index: usize,
        found: [u8; 2],
        expected: [u8; 2],
    },

    /// A fragment is too short to hold a marker and terminator.
    #[error("fragment {index} is malformed ({len} bytes)")]
    MalformedFragment { index: usize, len: usize },

    /// Bytes follow the last terminator.
    #[error("transmission incomplete ({trailing} bytes after last terminator)")]
    Incomplete { trailing: usize },

    /// Nothing to reassemble.
    #[error("empty transmission")]
    Empty,

    /// The concatenated fragment text is not valid base64.
    #[error("invalid base64 text: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The inner length prefix disagrees with the decoded byte count.
    #[error("inner length mismatch (declared {declared}, actual {actual})")]
    LengthMismatch { declared: usize, actual: usize },

    /// The inner CRC does not match the one computed over the payload.
    #[error("inner checksum mismatch (received 0x{received:04X}, computed 0x{computed:04X})")]
    ChecksumMismatch { received: u16, computed: u16 },

    /// The message cannot be represented, or exceeds the receive limit.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The packet size leaves no room for fragment text.
    #[error("packet size {size} too small for fragment overhead")]
    PacketSizeTooSmall { size: usize },

    /// The payload is shorter than the management header.
    #[error("management header too short ({len} bytes)")]
    HeaderTooShort { len: usize },

    /// The management header length disagrees with the body.
    #[error("management header length mismatch (declared {declared}, body {actual})")]
    HeaderLengthMismatch { declared: usize, actual: usize },

    /// I/O error on the console stream.
    #[error("console I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConsoleError>;
