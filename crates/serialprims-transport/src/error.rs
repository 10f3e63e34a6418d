use std::path::PathBuf;

/// Errors that can occur in serial transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open the device node at the specified path.
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to a serial bridge.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The path exists but is not a character device.
    #[error("not a character device: {path}")]
    NotADevice { path: PathBuf },

    /// The operation is not available for this kind of stream.
    #[error("{operation} not supported on {kind} streams")]
    Unsupported {
        operation: &'static str,
        kind: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, TransportError>;
