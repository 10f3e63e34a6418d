//! Byte-stream transport for serial device links.
//!
//! Provides a unified `Read + Write` handle over the ways a host reaches a
//! device's UART:
//! - An already-configured device node (`/dev/ttyUSB0`, `/dev/ttyACM0`)
//! - A TCP serial bridge (ser2net and friends)
//! - A Unix socket pair or PTY bridge (tests and simulators)
//!
//! Port configuration (baud rate, flow control, FTDI enumeration) is left to
//! the operating system. Everything else builds on [`SerialStream`].

pub mod device;
pub mod error;
pub mod stream;

pub use device::{SerialDevice, TcpBridge};
pub use error::{Result, TransportError};
pub use stream::SerialStream;
