//! Routing of incoming frames to the tasks waiting for them.
//!
//! Responses are matched on their sequence number, notifications on the
//! little-endian job id in the first two payload bytes. Each registration
//! resolves at most once: whichever of delivery, timeout, cancellation or
//! drop happens first removes the entry, and anything arriving later is
//! dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serialprims_frame::Frame;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{ClientError, Result, WaiterKey};

/// What happened to a frame passed to [`CorrelationRouter::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// A waiter took the frame.
    Resolved(WaiterKey),
    /// The frame was routable but nobody was waiting for it.
    NoWaiter(WaiterKey),
    /// Neither a response nor a notification with a job id.
    Unroutable,
}

struct Slot {
    token: u64,
    tx: oneshot::Sender<Frame>,
}

#[derive(Default)]
struct Tables {
    by_seq: HashMap<u32, Slot>,
    by_job: HashMap<u16, Slot>,
    closed: bool,
}

impl Tables {
    fn insert(&mut self, key: WaiterKey, slot: Slot) -> Result<()> {
        let occupied = match key {
            WaiterKey::Seq(seq) => self.by_seq.contains_key(&seq),
            WaiterKey::JobId(id) => self.by_job.contains_key(&id),
        };
        if occupied {
            return Err(ClientError::DuplicateWaiterKey(key));
        }
        match key {
            WaiterKey::Seq(seq) => self.by_seq.insert(seq, slot),
            WaiterKey::JobId(id) => self.by_job.insert(id, slot),
        };
        Ok(())
    }

    fn take(&mut self, key: WaiterKey) -> Option<Slot> {
        match key {
            WaiterKey::Seq(seq) => self.by_seq.remove(&seq),
            WaiterKey::JobId(id) => self.by_job.remove(&id),
        }
    }

    // Remove only the registration identified by `token`; a newer waiter
    // under the same key stays put.
    fn remove_if(&mut self, key: WaiterKey, token: u64) {
        match key {
            WaiterKey::Seq(seq) => {
                if self.by_seq.get(&seq).is_some_and(|slot| slot.token == token) {
                    self.by_seq.remove(&seq);
                }
            }
            WaiterKey::JobId(id) => {
                if self.by_job.get(&id).is_some_and(|slot| slot.token == token) {
                    self.by_job.remove(&id);
                }
            }
        }
    }
}

struct Inner {
    tables: Mutex<Tables>,
    next_token: AtomicU64,
}

/// Shared table of pending waiters.
///
/// Cloning is cheap; clones share the same tables. The reader side calls
/// [`deliver`](Self::deliver) while any number of tasks wait concurrently.
#[derive(Clone)]
pub struct CorrelationRouter {
    inner: Arc<Inner>,
}

impl Default for CorrelationRouter {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: Mutex::new(Tables::default()),
                next_token: AtomicU64::new(1),
            }),
        }
    }
}

impl std::fmt::Debug for CorrelationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.lock();
        f.debug_struct("CorrelationRouter")
            .field("by_seq", &tables.by_seq.len())
            .field("by_job", &tables.by_job.len())
            .field("closed", &tables.closed)
            .finish()
    }
}

impl CorrelationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.inner
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register interest in `key` without waiting yet.
    ///
    /// Registering before the request goes out closes the race with a fast
    /// reply. Fails with [`ClientError::DuplicateWaiterKey`] if the key is
    /// taken, and with [`ClientError::Disconnected`] after [`close`](Self::close).
    pub fn register(&self, key: WaiterKey) -> Result<Waiter> {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let mut tables = self.lock();
        if tables.closed {
            return Err(ClientError::Disconnected("router closed".into()));
        }
        tables.insert(key, Slot { token, tx })?;
        drop(tables);

        trace!(%key, "waiter registered");
        Ok(Waiter {
            key,
            token,
            rx,
            router: self.clone(),
        })
    }

    /// Wait for the response carrying `seq`.
    pub async fn await_by_seq(
        &self,
        seq: u32,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Frame> {
        self.register(WaiterKey::Seq(seq))?
            .wait(timeout, cancel)
            .await
    }

    /// Wait for the notification carrying `job_id`.
    pub async fn await_by_job_id(
        &self,
        job_id: u16,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Frame> {
        self.register(WaiterKey::JobId(job_id))?
            .wait(timeout, cancel)
            .await
    }

    /// Hand a decoded frame to whoever is waiting for it.
    ///
    /// Frames nobody waits for are dropped; that is not an error.
    pub fn deliver(&self, frame: Frame) -> Delivery {
        let Some(key) = route_key(&frame) else {
            debug!(
                msg_type = frame.msg_type,
                flags = frame.flags,
                seq = frame.seq,
                "dropping unroutable frame"
            );
            return Delivery::Unroutable;
        };

        let slot = self.lock().take(key);
        match slot {
            Some(slot) => match slot.tx.send(frame) {
                Ok(()) => {
                    trace!(%key, "waiter resolved");
                    Delivery::Resolved(key)
                }
                // The waiter gave up between removal and send.
                Err(_) => {
                    debug!(%key, "waiter gone; dropping frame");
                    Delivery::NoWaiter(key)
                }
            },
            None => {
                debug!(%key, "no waiter; dropping frame");
                Delivery::NoWaiter(key)
            }
        }
    }

    /// Fail every pending waiter with [`ClientError::Disconnected`] and
    /// refuse new registrations.
    pub fn close(&self) {
        let mut tables = self.lock();
        tables.closed = true;
        let pending = tables.by_seq.len() + tables.by_job.len();
        tables.by_seq.clear();
        tables.by_job.clear();
        drop(tables);
        if pending > 0 {
            debug!(pending, "router closed with pending waiters");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of registrations currently pending.
    pub fn pending(&self) -> usize {
        let tables = self.lock();
        tables.by_seq.len() + tables.by_job.len()
    }

    pub fn is_pending(&self, key: WaiterKey) -> bool {
        let tables = self.lock();
        match key {
            WaiterKey::Seq(seq) => tables.by_seq.contains_key(&seq),
            WaiterKey::JobId(id) => tables.by_job.contains_key(&id),
        }
    }

    fn unregister(&self, key: WaiterKey, token: u64) {
        self.lock().remove_if(key, token);
    }
}

/// Key a frame is routed on, if any.
///
/// The response bit wins over the notification bit.
pub fn route_key(frame: &Frame) -> Option<WaiterKey> {
    if frame.is_response() {
        Some(WaiterKey::Seq(frame.seq))
    } else if frame.is_notification() {
        match frame.payload.get(..2) {
            Some(&[lo, hi]) => Some(WaiterKey::JobId(u16::from_le_bytes([lo, hi]))),
            _ => None,
        }
    } else {
        None
    }
}

/// A pending registration. Dropping it unregisters the key.
#[must_use = "a waiter does nothing unless awaited"]
pub struct Waiter {
    key: WaiterKey,
    token: u64,
    rx: oneshot::Receiver<Frame>,
    router: CorrelationRouter,
}

impl Waiter {
    pub fn key(&self) -> WaiterKey {
        self.key
    }

    /// Suspend until the frame arrives, `timeout` elapses or `cancel` fires.
    ///
    /// A frame that is already delivered wins over a simultaneous timeout or
    /// cancellation.
    pub async fn wait(mut self, timeout: Duration, cancel: &CancellationToken) -> Result<Frame> {
        tokio::select! {
            biased;
            received = &mut self.rx => received
                .map_err(|_| ClientError::Disconnected("router closed".into())),
            _ = cancel.cancelled() => {
                debug!(key = %self.key, "wait cancelled");
                Err(ClientError::Cancelled)
            }
            _ = tokio::time::sleep(timeout) => {
                debug!(key = %self.key, ?timeout, "wait timed out");
                Err(ClientError::Timeout(timeout))
            }
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.router.unregister(self.key, self.token);
    }
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use serialprims_frame::{IS_NOTIFICATION, IS_RESPONSE};

    use super::*;

    const LONG: Duration = Duration::from_secs(60);

    fn response(seq: u32) -> Frame {
        Frame::new(0x0001, IS_RESPONSE, seq, vec![0x01, 0x00, 0x00])
    }

    fn completion(job_id: u16) -> Frame {
        let mut payload = job_id.to_le_bytes().to_vec();
        payload.push(0xEE);
        Frame::new(0x0001, IS_NOTIFICATION, 99, payload)
    }

    #[test]
    fn route_keys() {
        assert_eq!(route_key(&response(5)), Some(WaiterKey::Seq(5)));
        assert_eq!(route_key(&completion(0x1234)), Some(WaiterKey::JobId(0x1234)));

        let both = Frame::new(1, IS_RESPONSE | IS_NOTIFICATION, 8, vec![0x01, 0x00]);
        assert_eq!(route_key(&both), Some(WaiterKey::Seq(8)));

        let short = Frame::new(1, IS_NOTIFICATION, 8, vec![0x01]);
        assert_eq!(route_key(&short), None);

        let request = Frame::new(1, 0, 8, vec![0x01, 0x00]);
        assert_eq!(route_key(&request), None);
    }

    #[tokio::test]
    async fn response_resolves_seq_waiter() {
        let router = CorrelationRouter::new();
        let cancel = CancellationToken::new();
        let waiter = router.register(WaiterKey::Seq(7)).unwrap();

        assert_eq!(router.deliver(response(7)), Delivery::Resolved(WaiterKey::Seq(7)));
        assert_eq!(router.pending(), 0);

        let frame = waiter.wait(LONG, &cancel).await.unwrap();
        assert_eq!(frame.seq, 7);
    }

    #[tokio::test]
    async fn notification_resolves_job_waiter() {
        let router = CorrelationRouter::new();
        let cancel = CancellationToken::new();

        let waiting = {
            let router = router.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { router.await_by_job_id(0x0102, LONG, &cancel).await })
        };
        while !router.is_pending(WaiterKey::JobId(0x0102)) {
            tokio::task::yield_now().await;
        }

        assert_eq!(
            router.deliver(completion(0x0102)),
            Delivery::Resolved(WaiterKey::JobId(0x0102))
        );
        let frame = waiting.await.unwrap().unwrap();
        assert_eq!(&frame.payload[..], &[0x02, 0x01, 0xEE]);
    }

    #[tokio::test]
    async fn unmatched_frames_are_dropped() {
        let router = CorrelationRouter::new();
        let _waiter = router.register(WaiterKey::Seq(1)).unwrap();

        assert_eq!(router.deliver(response(2)), Delivery::NoWaiter(WaiterKey::Seq(2)));
        assert_eq!(
            router.deliver(completion(1)),
            Delivery::NoWaiter(WaiterKey::JobId(1))
        );
        assert_eq!(router.deliver(Frame::new(1, 0, 1, Vec::new())), Delivery::Unroutable);
        assert!(router.is_pending(WaiterKey::Seq(1)));
    }

    #[tokio::test]
    async fn duplicate_key_fails_immediately() {
        let router = CorrelationRouter::new();
        let cancel = CancellationToken::new();

        let first = {
            let router = router.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { router.await_by_seq(5, LONG, &cancel).await })
        };
        while !router.is_pending(WaiterKey::Seq(5)) {
            tokio::task::yield_now().await;
        }

        let second = router.await_by_seq(5, LONG, &cancel).await;
        assert!(matches!(
            second,
            Err(ClientError::DuplicateWaiterKey(WaiterKey::Seq(5)))
        ));

        // The first registration is untouched and still resolvable.
        assert_eq!(router.deliver(response(5)), Delivery::Resolved(WaiterKey::Seq(5)));
        assert_eq!(first.await.unwrap().unwrap().seq, 5);
    }

    #[tokio::test]
    async fn seq_and_job_id_keys_do_not_collide() {
        let router = CorrelationRouter::new();
        let _seq = router.register(WaiterKey::Seq(3)).unwrap();
        let _job = router.register(WaiterKey::JobId(3)).unwrap();
        assert_eq!(router.pending(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_removes_entry_and_late_frame_is_dropped() {
        let router = CorrelationRouter::new();
        let cancel = CancellationToken::new();

        let result = router
            .await_by_seq(11, Duration::from_millis(50), &cancel)
            .await;
        assert!(matches!(result, Err(ClientError::Timeout(t)) if t == Duration::from_millis(50)));
        assert!(!router.is_pending(WaiterKey::Seq(11)));

        assert_eq!(router.deliver(response(11)), Delivery::NoWaiter(WaiterKey::Seq(11)));

        // The key is free for a new registration.
        let again = router.register(WaiterKey::Seq(11)).unwrap();
        assert_eq!(router.deliver(response(11)), Delivery::Resolved(WaiterKey::Seq(11)));
        assert_eq!(again.wait(LONG, &cancel).await.unwrap().seq, 11);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_removes_entry() {
        let router = CorrelationRouter::new();
        let cancel = CancellationToken::new();

        let waiting = {
            let router = router.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { router.await_by_job_id(9, LONG, &cancel).await })
        };
        while !router.is_pending(WaiterKey::JobId(9)) {
            tokio::task::yield_now().await;
        }

        cancel.cancel();
        assert!(matches!(
            waiting.await.unwrap(),
            Err(ClientError::Cancelled)
        ));
        assert_eq!(router.pending(), 0);
    }

    #[tokio::test]
    async fn delivered_frame_wins_over_cancellation() {
        let router = CorrelationRouter::new();
        let cancel = CancellationToken::new();
        let waiter = router.register(WaiterKey::Seq(4)).unwrap();

        router.deliver(response(4));
        cancel.cancel();

        assert_eq!(waiter.wait(LONG, &cancel).await.unwrap().seq, 4);
    }

    #[tokio::test]
    async fn dropping_a_waiter_unregisters_it() {
        let router = CorrelationRouter::new();
        let waiter = router.register(WaiterKey::JobId(2)).unwrap();
        assert_eq!(router.pending(), 1);

        drop(waiter);
        assert_eq!(router.pending(), 0);
        assert_eq!(
            router.deliver(completion(2)),
            Delivery::NoWaiter(WaiterKey::JobId(2))
        );
    }

    #[tokio::test]
    async fn stale_waiter_drop_keeps_newer_registration() {
        let router = CorrelationRouter::new();
        let cancel = CancellationToken::new();

        let old = router.register(WaiterKey::Seq(6)).unwrap();
        router.deliver(response(6));
        let newer = router.register(WaiterKey::Seq(6)).unwrap();

        // The resolved waiter is dropped after the key was re-registered.
        drop(old);
        assert!(router.is_pending(WaiterKey::Seq(6)));

        router.deliver(response(6));
        assert_eq!(newer.wait(LONG, &cancel).await.unwrap().seq, 6);
    }

    #[tokio::test]
    async fn close_disconnects_pending_waiters() {
        let router = CorrelationRouter::new();
        let cancel = CancellationToken::new();
        let waiter = router.register(WaiterKey::Seq(1)).unwrap();

        router.close();
        assert!(router.is_closed());
        assert!(matches!(
            waiter.wait(LONG, &cancel).await,
            Err(ClientError::Disconnected(_))
        ));
        assert!(matches!(
            router.register(WaiterKey::Seq(2)),
            Err(ClientError::Disconnected(_))
        ));
    }
}
