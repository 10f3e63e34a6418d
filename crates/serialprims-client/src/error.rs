use std::fmt;
use std::time::Duration;

/// Key a waiter is registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaiterKey {
    /// Immediate acknowledgement, matched on the frame sequence number.
    Seq(u32),
    /// Job completion, matched on the job id leading the payload.
    JobId(u16),
}

impl fmt::Display for WaiterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaiterKey::Seq(seq) => write!(f, "seq {seq}"),
            WaiterKey::JobId(id) => write!(f, "job id {id}"),
        }
    }
}

/// Errors that can occur in client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] serialprims_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] serialprims_frame::FrameError),

    /// No matching frame arrived in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the wait.
    #[error("wait cancelled")]
    Cancelled,

    /// Another wait is already registered under this key.
    #[error("a waiter for {0} is already registered")]
    DuplicateWaiterKey(WaiterKey),

    /// Every job id is in flight.
    #[error("no free job id")]
    AllocatorExhausted,

    /// The device acknowledged the job with a non-zero status.
    #[error("job {job_id} rejected with status {status}")]
    Rejected { job_id: u16, status: u8 },

    /// The link went away while waiting.
    #[error("disconnected: {0}")]
    Disconnected(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
