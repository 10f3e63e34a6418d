//! Request correlation and jobs over a framed serial link.
//!
//! Devices answer a job request twice: an acknowledgement carrying the
//! request's sequence number, then later a notification carrying the job id.
//! [`CorrelationRouter`] matches incoming frames to the tasks waiting for
//! them, [`JobClient`] drives the two phases, and [`Session`] wires both to a
//! [`SerialStream`](serialprims_transport::SerialStream) with a reader thread.

pub mod error;
pub mod ids;
pub mod job;
pub mod router;
pub mod session;
pub mod transport;

pub use error::{ClientError, Result, WaiterKey};
pub use ids::{JobIdAllocator, SeqAllocator};
pub use job::{
    ack_status, JobClient, JobClientConfig, RpcStatus, DEFAULT_ACK_TIMEOUT, DEFAULT_JOB_TIMEOUT,
};
pub use router::{route_key, CorrelationRouter, Delivery, Waiter};
pub use session::{FrameObserver, ReaderPump, Session, SessionConfig};
pub use transport::{FrameTransport, WriterTransport};
