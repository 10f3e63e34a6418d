use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use serialprims_frame::{Frame, FrameConfig, FrameWriter};

use crate::error::Result;

/// Outgoing half of a link: encodes and writes one frame.
///
/// `send` is synchronous and may be called from several tasks at once;
/// implementations serialize writes so frames never interleave.
pub trait FrameTransport: Send + Sync {
    fn send(&self, frame: &Frame) -> Result<()>;
}

impl<T: FrameTransport + ?Sized> FrameTransport for Arc<T> {
    fn send(&self, frame: &Frame) -> Result<()> {
        (**self).send(frame)
    }
}

impl<T: FrameTransport + ?Sized> FrameTransport for &T {
    fn send(&self, frame: &Frame) -> Result<()> {
        (**self).send(frame)
    }
}

/// [`FrameTransport`] over a [`FrameWriter`] guarded by a mutex.
pub struct WriterTransport<W> {
    writer: Mutex<FrameWriter<W>>,
}

impl<W: Write> WriterTransport<W> {
    pub fn new(inner: W) -> Self {
        Self::from_writer(FrameWriter::new(inner))
    }

    pub fn with_config(inner: W, config: FrameConfig) -> Self {
        Self::from_writer(FrameWriter::with_config(inner, config))
    }

    pub fn from_writer(writer: FrameWriter<W>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> FrameWriter<W> {
        self.writer
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> FrameTransport for WriterTransport<W> {
    fn send(&self, frame: &Frame) -> Result<()> {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write_frame(frame)?;
        Ok(())
    }
}

impl<W> std::fmt::Debug for WriterTransport<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterTransport").finish_non_exhaustive()
    }
}
