//! Framing, console fragmentation and job correlation for serial device links.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte streams over device nodes, TCP serial bridges and socket pairs
//! - [`frame`]: SOF/EOF delimited binary frames with CRC-16 and a resynchronizing decoder
//! - [`console`]: SMP over a text console (base64 fragments, idle-gap reassembly)
//! - [`client`]: request/ack/completion correlation and jobs (behind `client` feature)

/// Re-export transport types.
pub mod transport {
    pub use serialprims_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use serialprims_frame::*;
}

/// Re-export console types.
pub mod console {
    pub use serialprims_console::*;
}

/// Re-export client types (requires `client` feature).
#[cfg(feature = "client")]
pub mod client {
    pub use serialprims_client::*;
}
