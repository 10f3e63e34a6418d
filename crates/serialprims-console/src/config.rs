use std::time::Duration;

/// Largest console packet the device accepts, framing included.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 127;

/// Idle period after which buffered input is re-examined.
pub const DEFAULT_IDLE_GAP: Duration = Duration::from_millis(30);

/// Consecutive quiet periods ending on a terminator before a buffer is complete.
pub const DEFAULT_EOF_THRESHOLD: u32 = 5;

/// Consecutive quiet periods without a terminator before a buffer is dropped.
pub const DEFAULT_NO_EOF_LIMIT: u32 = 50;

/// Receive buffer cap.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Console transport configuration.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Maximum bytes per transmitted fragment, markers and terminator included.
    pub max_packet_size: usize,
    /// Idle-gap timer period.
    pub idle_gap: Duration,
    /// Quiet periods ending on a terminator that complete a buffer.
    pub eof_threshold: u32,
    /// Quiet periods without a terminator that discard a buffer.
    pub no_eof_limit: u32,
    /// Receive buffer cap; a larger buffer is discarded.
    pub max_message_size: usize,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            idle_gap: DEFAULT_IDLE_GAP,
            eof_threshold: DEFAULT_EOF_THRESHOLD,
            no_eof_limit: DEFAULT_NO_EOF_LIMIT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}
