//! Async console receive loop.
//!
//! Reads a console stream, runs the idle-gap timer and publishes decoded
//! messages. Reads and timer expiries are handled on one task, so the
//! buffer is never touched concurrently.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ConsoleConfig;
use crate::error::{ConsoleError, Result};
use crate::idle::{IdleGapDetector, TimerOutcome};
use crate::reassembly::decode_batch;
use crate::smp::SmpMessage;

const READ_CHUNK_SIZE: usize = 512;

/// Output of [`ConsoleReceiver::run`].
#[derive(Debug)]
pub enum ConsoleEvent {
    /// A complete, verified management message.
    Message(SmpMessage),
    /// A transmission was rejected during reassembly.
    Error(ConsoleError),
    /// Input that never ended on a terminator was dropped.
    Discarded { len: usize },
}

/// Drives an [`IdleGapDetector`] from an async byte stream.
pub struct ConsoleReceiver<R> {
    reader: R,
    detector: IdleGapDetector,
    idle_gap: Duration,
}

impl<R: AsyncRead + Unpin> ConsoleReceiver<R> {
    pub fn new(reader: R, config: &ConsoleConfig) -> Self {
        Self {
            reader,
            detector: IdleGapDetector::new(config),
            idle_gap: config.idle_gap,
        }
    }

    /// Run until the stream closes, `cancel` fires, or `events` is dropped.
    ///
    /// Returns `Err` only for read failures.
    pub async fn run(
        mut self,
        events: mpsc::Sender<ConsoleEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let mut deadline: Option<Instant> = None;

        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("console receiver cancelled");
                    return Ok(());
                }
                read = self.reader.read(&mut chunk) => {
                    let n = read?;
                    if n == 0 {
                        debug!("console stream closed");
                        let outcome = self.detector.finish();
                        publish(&events, outcome).await;
                        return Ok(());
                    }
                    match self.detector.on_data(&chunk[..n]) {
                        Ok(()) => {
                            deadline = Some(Instant::now() + self.idle_gap);
                            continue;
                        }
                        Err(err) => {
                            deadline = None;
                            if events.send(ConsoleEvent::Error(err)).await.is_err() {
                                return Ok(());
                            }
                            continue;
                        }
                    }
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.detector.on_timer()
                }
            };

            deadline = match outcome {
                TimerOutcome::Rearm => Some(Instant::now() + self.idle_gap),
                _ => None,
            };
            if !publish(&events, outcome).await {
                return Ok(());
            }
        }
    }
}

// Returns false once the event receiver is gone.
async fn publish(events: &mpsc::Sender<ConsoleEvent>, outcome: TimerOutcome) -> bool {
    let batch = match outcome {
        TimerOutcome::Idle | TimerOutcome::Rearm => return true,
        TimerOutcome::Discarded { len } => vec![ConsoleEvent::Discarded { len }],
        TimerOutcome::Complete(buf) => decode_batch(&buf)
            .into_iter()
            .map(|result| match result {
                Ok(message) => ConsoleEvent::Message(message),
                Err(err) => ConsoleEvent::Error(err),
            })
            .collect(),
    };

    for event in batch {
        if events.send(event).await.is_err() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::fragment::pack;
    use crate::smp::{MgmtOp, GROUP_APP};

    fn transmission(message: &SmpMessage) -> Vec<u8> {
        pack(&message.to_bytes(), 127).unwrap().concat()
    }

    fn spawn_receiver(
        reader: tokio::io::DuplexStream,
    ) -> (
        mpsc::Receiver<ConsoleEvent>,
        CancellationToken,
        tokio::task::JoinHandle<Result<()>>,
    ) {
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let receiver = ConsoleReceiver::new(reader, &ConsoleConfig::default());
        let task = tokio::spawn(receiver.run(tx, cancel.clone()));
        (rx, cancel, task)
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_message_after_idle_gap() {
        let (mut device, host) = tokio::io::duplex(4096);
        let (mut events, cancel, task) = spawn_receiver(host);

        let sent = SmpMessage::new(MgmtOp::WriteResponse, GROUP_APP, 2, 7, vec![0xA0; 300]).unwrap();
        let start = Instant::now();
        device.write_all(&transmission(&sent)).await.unwrap();

        match events.recv().await.unwrap() {
            ConsoleEvent::Message(message) => assert_eq!(message, sent),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(start.elapsed() >= Duration::from_millis(150));

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn short_pauses_do_not_split_a_transmission() {
        let (mut device, host) = tokio::io::duplex(4096);
        let (mut events, cancel, task) = spawn_receiver(host);

        let sent = SmpMessage::new(MgmtOp::ReadResponse, GROUP_APP, 2, 8, vec![0x11; 200]).unwrap();
        let wire = transmission(&sent);
        let (head, tail) = wire.split_at(wire.len() / 2);
        device.write_all(head).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        device.write_all(tail).await.unwrap();

        assert!(matches!(events.recv().await, Some(ConsoleEvent::Message(m)) if m == sent));
        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn long_silence_mid_transmission_rejects_it() {
        let (mut device, host) = tokio::io::duplex(4096);
        let (mut events, cancel, task) = spawn_receiver(host);

        let sent = SmpMessage::new(MgmtOp::ReadResponse, GROUP_APP, 2, 9, vec![0x22; 200]).unwrap();
        let fragments = pack(&sent.to_bytes(), 127).unwrap();
        device.write_all(&fragments[0]).await.unwrap();

        assert!(matches!(events.recv().await, Some(ConsoleEvent::Error(_))));
        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unterminated_input_is_discarded() {
        let (mut device, host) = tokio::io::duplex(4096);
        let (mut events, cancel, task) = spawn_receiver(host);

        device.write_all(b"\x06\x09AAAA").await.unwrap();

        assert!(matches!(
            events.recv().await,
            Some(ConsoleEvent::Discarded { len: 6 })
        ));
        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn closing_the_stream_flushes_terminated_input() {
        let (mut device, host) = tokio::io::duplex(4096);
        let (mut events, _cancel, task) = spawn_receiver(host);

        let sent = SmpMessage::new(MgmtOp::WriteResponse, GROUP_APP, 1, 1, vec![0x01]).unwrap();
        device.write_all(&transmission(&sent)).await.unwrap();
        drop(device);

        assert!(matches!(events.recv().await, Some(ConsoleEvent::Message(m)) if m == sent));
        task.await.unwrap().unwrap();
        assert!(events.recv().await.is_none());
    }
}
