//! SMP over a text console.
//!
//! Management messages travel over a console UART as base64 text:
//! - [`fragment`] wraps a payload with a length prefix and CRC, base64
//!   encodes it and cuts it into marker-delimited fragments
//! - [`smp`] is the 8-byte management header carried in that payload
//! - [`reassembly`] turns a completed receive buffer back into messages
//! - [`idle`] decides when a receive buffer is complete, from idle gaps
//!
//! With the `async` feature, [`receiver::ConsoleReceiver`] runs the idle-gap
//! timer on a tokio task.

pub mod config;
pub mod error;
pub mod fragment;
pub mod idle;
pub mod reassembly;
pub mod smp;
pub mod writer;

#[cfg(feature = "async")]
pub mod receiver;

pub use config::ConsoleConfig;
pub use error::{ConsoleError, Result};
pub use fragment::{
    decode_inner, encode_inner, pack, split_fragments, split_transmissions, unpack,
    CONTINUATION_MARKER, FIRST_MARKER, TERMINATOR,
};
pub use idle::{IdleGapDetector, TimerOutcome};
pub use reassembly::decode_batch;
pub use smp::{MgmtOp, SmpHeader, SmpMessage, SmpSequence};
pub use writer::ConsoleWriter;

#[cfg(feature = "async")]
pub use receiver::{ConsoleEvent, ConsoleReceiver};
