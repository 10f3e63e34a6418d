//! End-of-message detection for the console transport.
//!
//! Console input does not delimit itself, so a buffer is declared complete
//! once the line has been quiet for several timer periods in a row while the
//! last byte received was a terminator. The detector only keeps state; the
//! caller owns the timer and reports each expiry through
//! [`IdleGapDetector::on_timer`].

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::config::ConsoleConfig;
use crate::error::{ConsoleError, Result};
use crate::fragment::TERMINATOR;

/// What the caller should do after a timer expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerOutcome {
    /// Nothing is buffered; leave the timer stopped.
    Idle,
    /// Keep waiting; arm the timer again.
    Rearm,
    /// The buffer is complete and has been taken.
    Complete(Bytes),
    /// The buffer never ended on a terminator and was dropped.
    Discarded { len: usize },
}

/// Buffers console input and decides when a transmission has ended.
#[derive(Debug)]
pub struct IdleGapDetector {
    buf: BytesMut,
    eof_seen: u32,
    no_eof: u32,
    eof_threshold: u32,
    no_eof_limit: u32,
    max_message_size: usize,
}

impl IdleGapDetector {
    pub fn new(config: &ConsoleConfig) -> Self {
        Self {
            buf: BytesMut::new(),
            eof_seen: 0,
            no_eof: 0,
            eof_threshold: config.eof_threshold.max(1),
            no_eof_limit: config.no_eof_limit.max(1),
            max_message_size: config.max_message_size,
        }
    }

    /// Append received bytes. The caller restarts its timer afterwards.
    ///
    /// Overflowing the size cap drops the whole buffer.
    pub fn on_data(&mut self, chunk: &[u8]) -> Result<()> {
        self.eof_seen = 0;
        self.no_eof = 0;

        let size = self.buf.len() + chunk.len();
        if size > self.max_message_size {
            warn!(size, max = self.max_message_size, "console buffer overflow; discarding");
            self.buf.clear();
            return Err(ConsoleError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        self.buf.extend_from_slice(chunk);
        trace!(len = chunk.len(), buffered = self.buf.len(), "console data");
        Ok(())
    }

    /// Handle one expiry of the idle-gap timer.
    pub fn on_timer(&mut self) -> TimerOutcome {
        if self.buf.is_empty() {
            return TimerOutcome::Idle;
        }

        if self.buf.last() == Some(&TERMINATOR) {
            self.no_eof = 0;
            self.eof_seen += 1;
            if self.eof_seen >= self.eof_threshold {
                self.eof_seen = 0;
                let complete = self.buf.split().freeze();
                debug!(len = complete.len(), "console transmission complete");
                return TimerOutcome::Complete(complete);
            }
        } else {
            self.eof_seen = 0;
            self.no_eof += 1;
            if self.no_eof >= self.no_eof_limit {
                self.no_eof = 0;
                let len = self.buf.len();
                self.buf.clear();
                warn!(len, "console transmission never terminated; discarding");
                return TimerOutcome::Discarded { len };
            }
        }
        TimerOutcome::Rearm
    }

    /// Settle the buffer when no more input can arrive (stream closed).
    pub fn finish(&mut self) -> TimerOutcome {
        self.eof_seen = 0;
        self.no_eof = 0;
        if self.buf.is_empty() {
            TimerOutcome::Idle
        } else if self.buf.last() == Some(&TERMINATOR) {
            TimerOutcome::Complete(self.buf.split().freeze())
        } else {
            let len = self.buf.len();
            self.buf.clear();
            TimerOutcome::Discarded { len }
        }
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.eof_seen = 0;
        self.no_eof = 0;
    }
}
