use std::fs::OpenOptions;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::SerialStream;

/// A serial device node that the OS has already configured.
///
/// Opening does not touch termios; baud rate and flow control are expected to
/// be set by `stty`, udev rules, or the adapter's defaults.
pub struct SerialDevice;

impl SerialDevice {
    /// Open a character device for reading and writing.
    pub fn open(path: impl AsRef<Path>) -> Result<SerialStream> {
        let path = path.as_ref();

        let metadata = std::fs::metadata(path).map_err(|e| TransportError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;
        if !is_char_device(&metadata) {
            return Err(TransportError::NotADevice {
                path: path.to_path_buf(),
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| TransportError::Open {
                path: path.to_path_buf(),
                source: e,
            })?;

        info!(?path, "opened serial device");
        Ok(SerialStream::from_device(file))
    }

    /// Transport name for diagnostics.
    pub fn transport_name() -> &'static str {
        "serial-device"
    }
}

#[cfg(unix)]
fn is_char_device(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::FileTypeExt;
    metadata.file_type().is_char_device()
}

#[cfg(not(unix))]
fn is_char_device(metadata: &std::fs::Metadata) -> bool {
    !metadata.is_dir()
}

/// A TCP bridge that exposes a remote UART as a raw byte stream.
pub struct TcpBridge;

impl TcpBridge {
    /// Connect to a bridge (blocking), optionally bounded by `timeout`.
    pub fn connect(addr: &str, timeout: Option<Duration>) -> Result<SerialStream> {
        let connect_err = |source: std::io::Error| TransportError::Connect {
            addr: addr.to_string(),
            source,
        };

        let stream = match timeout {
            None => TcpStream::connect(addr).map_err(connect_err)?,
            Some(timeout) => {
                let resolved = addr
                    .to_socket_addrs()
                    .map_err(connect_err)?
                    .next()
                    .ok_or_else(|| {
                        connect_err(std::io::Error::new(
                            std::io::ErrorKind::AddrNotAvailable,
                            "address did not resolve",
                        ))
                    })?;
                TcpStream::connect_timeout(&resolved, timeout).map_err(connect_err)?
            }
        };
        stream.set_nodelay(true)?;

        debug!(addr, "connected to tcp serial bridge");
        Ok(SerialStream::from_tcp(stream))
    }

    /// Transport name for diagnostics.
    pub fn transport_name() -> &'static str {
        "tcp-serial-bridge"
    }
}
