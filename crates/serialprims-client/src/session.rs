//! Reader pump and link session.
//!
//! A blocking reader thread feeds link bytes into a [`FrameDecoder`] and
//! hands every event to a [`FrameObserver`]. [`Session`] wires one
//! [`SerialStream`] to a pump, a [`CorrelationRouter`] and a [`JobClient`].

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serialprims_frame::{
    DecodeEvent, DecoderStats, Frame, FrameConfig, FrameDecoder, FrameError, FrameWriter,
};
use serialprims_transport::{SerialStream, TransportError};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::job::{JobClient, JobClientConfig};
use crate::router::CorrelationRouter;
use crate::transport::WriterTransport;

const READ_CHUNK_SIZE: usize = 1024;

/// Receives decoder output from a reader pump.
///
/// Callbacks run on the pump thread and must not block for long.
pub trait FrameObserver: Send + Sync + 'static {
    fn on_frame(&self, frame: Frame);

    fn on_decode_error(&self, _err: &FrameError) {}

    /// The link reached end of stream or failed; no more callbacks follow.
    fn on_closed(&self) {}
}

impl FrameObserver for CorrelationRouter {
    fn on_frame(&self, frame: Frame) {
        self.deliver(frame);
    }

    fn on_decode_error(&self, err: &FrameError) {
        debug!(error = %err, "frame dropped by decoder");
    }

    fn on_closed(&self) {
        self.close();
    }
}

/// Handle to a running reader thread.
pub struct ReaderPump {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<DecoderStats>>,
}

impl ReaderPump {
    /// Start a thread that reads `reader` until EOF, a read error or
    /// [`stop`](Self::stop).
    ///
    /// A stop request is noticed the next time a read returns, so readers
    /// should carry a read timeout.
    pub fn spawn<R, O>(reader: R, max_payload: usize, observer: O) -> Result<Self>
    where
        R: Read + Send + 'static,
        O: FrameObserver,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = std::thread::Builder::new()
            .name("serialprims-reader".into())
            .spawn({
                let stop = Arc::clone(&stop);
                move || pump(reader, FrameDecoder::new(max_payload), &observer, &stop)
            })
            .map_err(TransportError::Io)?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Ask the thread to stop without waiting for it.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Wait for the thread to reach EOF or a read error. Returns the
    /// decoder counters.
    ///
    /// This does not request a stop, so every byte the reader yields is
    /// decoded first. Call [`stop`](Self::stop) beforehand to end early.
    pub fn join(mut self) -> DecoderStats {
        self.handle
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    }
}

impl Drop for ReaderPump {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ReaderPump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderPump")
            .field("finished", &self.is_finished())
            .finish()
    }
}

fn pump<R: Read, O: FrameObserver>(
    mut reader: R,
    mut decoder: FrameDecoder,
    observer: &O,
    stop: &AtomicBool,
) -> DecoderStats {
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    while !stop.load(Ordering::Relaxed) {
        let n = match reader.read(&mut chunk) {
            Ok(0) => {
                debug!("link closed");
                break;
            }
            Ok(n) => n,
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
                ) =>
            {
                continue
            }
            Err(err) => {
                warn!(error = %err, "link read failed");
                break;
            }
        };

        for event in decoder.push(&chunk[..n]) {
            match event {
                DecodeEvent::Frame(frame) => observer.on_frame(frame),
                DecodeEvent::Error(err) => observer.on_decode_error(&err),
            }
        }
    }

    observer.on_closed();
    decoder.stats()
}

/// Settings for [`Session::open`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub frame: FrameConfig,
    pub client: JobClientConfig,
    /// Read timeout on the pump side; bounds how long a stop request waits.
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            client: JobClientConfig::default(),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// One open link: reader pump, router and job client over one stream.
pub struct Session {
    client: JobClient<WriterTransport<SerialStream>>,
    pump: Option<ReaderPump>,
    stream: SerialStream,
}

impl Session {
    pub fn open(stream: SerialStream) -> Result<Self> {
        Self::open_with_config(stream, SessionConfig::default())
    }

    pub fn open_with_config(stream: SerialStream, config: SessionConfig) -> Result<Self> {
        let reader = stream.try_clone()?;
        match reader.set_read_timeout(Some(config.poll_interval)) {
            Ok(()) => {}
            // Device nodes time out through termios instead.
            Err(TransportError::Unsupported { .. }) => {
                debug!(kind = reader.kind(), "no read timeout on this stream");
            }
            Err(err) => return Err(err.into()),
        }

        let writer = FrameWriter::with_config_serial(stream.try_clone()?, config.frame.clone())?;
        let router = CorrelationRouter::new();
        let pump = ReaderPump::spawn(reader, config.frame.max_payload_size, router.clone())?;
        let client = JobClient::with_config(
            WriterTransport::from_writer(writer),
            router,
            config.client,
        );

        info!(kind = stream.kind(), "session opened");
        Ok(Self {
            client,
            pump: Some(pump),
            stream,
        })
    }

    pub fn client(&self) -> &JobClient<WriterTransport<SerialStream>> {
        &self.client
    }

    pub fn router(&self) -> &CorrelationRouter {
        self.client.router()
    }

    /// Stop the pump, fail pending waiters and return the decoder counters.
    ///
    /// Device nodes cannot be shut down, so their reader thread is left to
    /// exit on its next read and the counters come back empty.
    pub fn shutdown(mut self) -> DecoderStats {
        self.close()
    }

    fn close(&mut self) -> DecoderStats {
        let Some(pump) = self.pump.take() else {
            return DecoderStats::default();
        };
        pump.stop();
        if let Err(err) = self.stream.shutdown() {
            debug!(error = %err, "stream shutdown failed");
        }
        let stats = if self.stream.kind() == "device" {
            // A blocked device read returns only on the next byte or VTIME.
            debug!("detaching device reader thread");
            drop(pump);
            DecoderStats::default()
        } else {
            pump.join()
        };
        self.client.router().close();
        info!(
            frames = stats.frames,
            errors = stats.errors,
            skipped = stats.skipped,
            "session closed"
        );
        stats
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("stream", &self.stream)
            .field("client", &self.client)
            .finish()
    }
}
