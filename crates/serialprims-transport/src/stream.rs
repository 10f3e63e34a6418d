use std::fs::File;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use crate::error::{Result, TransportError};

/// A connected serial byte stream implementing Read + Write.
///
/// This is the fundamental I/O type returned by transport operations.
/// Reads yield whatever bytes the link delivered; framing is the caller's job.
pub struct SerialStream {
    inner: SerialStreamInner,
}

enum SerialStreamInner {
    Device(File),
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for SerialStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            SerialStreamInner::Device(file) => file.read(buf),
            SerialStreamInner::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            SerialStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for SerialStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            SerialStreamInner::Device(file) => file.write(buf),
            SerialStreamInner::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            SerialStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            SerialStreamInner::Device(file) => file.flush(),
            SerialStreamInner::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            SerialStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl SerialStream {
    pub(crate) fn from_device(file: File) -> Self {
        Self {
            inner: SerialStreamInner::Device(file),
        }
    }

    pub(crate) fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: SerialStreamInner::Tcp(stream),
        }
    }

    /// Wrap one end of a Unix socket pair (PTY bridges, simulators, tests).
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: SerialStreamInner::Unix(stream),
        }
    }

    /// Create a connected pair of in-process streams.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixStream::pair()?;
        Ok((Self::from_unix(left), Self::from_unix(right)))
    }

    /// Short name of the underlying stream kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match &self.inner {
            SerialStreamInner::Device(_) => "device",
            SerialStreamInner::Tcp(_) => "tcp",
            #[cfg(unix)]
            SerialStreamInner::Unix(_) => "unix",
        }
    }

    /// Set read timeout on the underlying stream.
    ///
    /// Device nodes take their timing from termios (VMIN/VTIME), so this is
    /// rejected for them.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            SerialStreamInner::Device(_) => Err(TransportError::Unsupported {
                operation: "read timeout",
                kind: self.kind(),
            }),
            SerialStreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            SerialStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            SerialStreamInner::Device(_) => Err(TransportError::Unsupported {
                operation: "write timeout",
                kind: self.kind(),
            }),
            SerialStreamInner::Tcp(stream) => {
                stream.set_write_timeout(timeout).map_err(Into::into)
            }
            #[cfg(unix)]
            SerialStreamInner::Unix(stream) => {
                stream.set_write_timeout(timeout).map_err(Into::into)
            }
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            SerialStreamInner::Device(file) => Ok(Self::from_device(file.try_clone()?)),
            SerialStreamInner::Tcp(stream) => Ok(Self::from_tcp(stream.try_clone()?)),
            #[cfg(unix)]
            SerialStreamInner::Unix(stream) => Ok(Self::from_unix(stream.try_clone()?)),
        }
    }

    /// Shut down both directions so a blocked reader observes EOF.
    ///
    /// Device nodes have no shutdown; the call is a no-op for them.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            SerialStreamInner::Device(_) => Ok(()),
            SerialStreamInner::Tcp(stream) => stream.shutdown(Shutdown::Both).map_err(Into::into),
            #[cfg(unix)]
            SerialStreamInner::Unix(stream) => stream.shutdown(Shutdown::Both).map_err(Into::into),
        }
    }
}

impl std::fmt::Debug for SerialStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialStream")
            .field("type", &self.kind())
            .finish()
    }
}
