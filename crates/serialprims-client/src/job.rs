//! Two-phase jobs: an immediate acknowledgement matched on sequence number,
//! then a completion notification matched on job id.

use std::fmt;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use serialprims_frame::Frame;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{ClientError, Result, WaiterKey};
use crate::ids::{JobIdAllocator, SeqAllocator};
use crate::router::CorrelationRouter;
use crate::transport::FrameTransport;

/// Default wait for the immediate acknowledgement.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Default wait for the completion notification.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(30);

/// Offset of the status byte in an acknowledgement payload.
pub const ACK_STATUS_OFFSET: usize = 2;

/// Timeouts applied by [`JobClient`].
#[derive(Debug, Clone)]
pub struct JobClientConfig {
    pub ack_timeout: Duration,
    pub job_timeout: Duration,
}

impl Default for JobClientConfig {
    fn default() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            job_timeout: DEFAULT_JOB_TIMEOUT,
        }
    }
}

/// Device status codes carried in acknowledgements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcStatus {
    Ok,
    InvalidArg,
    NotFound,
    NotAllowed,
    Busy,
    Timeout,
    InternalError,
    Unknown,
}

impl RpcStatus {
    /// Map a raw code; anything outside the known range is `Unknown`.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => RpcStatus::Ok,
            1 => RpcStatus::InvalidArg,
            2 => RpcStatus::NotFound,
            3 => RpcStatus::NotAllowed,
            4 => RpcStatus::Busy,
            5 => RpcStatus::Timeout,
            6 => RpcStatus::InternalError,
            _ => RpcStatus::Unknown,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            RpcStatus::Ok => 0,
            RpcStatus::InvalidArg => 1,
            RpcStatus::NotFound => 2,
            RpcStatus::NotAllowed => 3,
            RpcStatus::Busy => 4,
            RpcStatus::Timeout => 5,
            RpcStatus::InternalError => 6,
            RpcStatus::Unknown => 7,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RpcStatus::Ok => "OK",
            RpcStatus::InvalidArg => "INVALID_ARG",
            RpcStatus::NotFound => "NOT_FOUND",
            RpcStatus::NotAllowed => "NOT_ALLOWED",
            RpcStatus::Busy => "BUSY",
            RpcStatus::Timeout => "TIMEOUT",
            RpcStatus::InternalError => "INTERNAL_ERROR",
            RpcStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for RpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Status byte of an acknowledgement, if the payload is long enough to
/// carry one. A missing status counts as acceptance.
pub fn ack_status(ack: &Frame) -> Option<u8> {
    ack.payload.get(ACK_STATUS_OFFSET).copied()
}

// Holds a job id in flight. Dropping it returns the id unless committed.
struct JobLease<'a> {
    ids: &'a JobIdAllocator,
    id: u16,
    committed: bool,
}

impl<'a> JobLease<'a> {
    fn acquire(ids: &'a JobIdAllocator) -> Result<Self> {
        Ok(Self {
            ids,
            id: ids.allocate()?,
            committed: false,
        })
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for JobLease<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.ids.release(self.id);
            debug!(job_id = self.id, "job id released");
        }
    }
}

/// Starts jobs on a device and waits for their acknowledgements and
/// completions.
///
/// Incoming frames must reach [`router`](Self::router) (see
/// [`crate::session`]); outgoing frames go through the transport.
pub struct JobClient<T> {
    transport: T,
    router: CorrelationRouter,
    seqs: SeqAllocator,
    job_ids: JobIdAllocator,
    config: JobClientConfig,
}

impl<T: FrameTransport> JobClient<T> {
    pub fn new(transport: T, router: CorrelationRouter) -> Self {
        Self::with_config(transport, router, JobClientConfig::default())
    }

    pub fn with_config(transport: T, router: CorrelationRouter, config: JobClientConfig) -> Self {
        Self {
            transport,
            router,
            seqs: SeqAllocator::new(),
            job_ids: JobIdAllocator::new(),
            config,
        }
    }

    pub fn router(&self) -> &CorrelationRouter {
        &self.router
    }

    pub fn config(&self) -> &JobClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Job ids allocated and not yet completed or rolled back.
    pub fn in_flight(&self) -> usize {
        self.job_ids.in_flight()
    }

    pub fn is_in_flight(&self, job_id: u16) -> bool {
        self.job_ids.is_in_flight(job_id)
    }

    /// Start a job and wait for its acknowledgement.
    ///
    /// The job id is prepended to `payload`. If the acknowledgement carries a
    /// non-zero status the id is released right away; the caller sees the
    /// status through [`ack_status`]. Otherwise the id stays in flight until
    /// [`await_completion`](Self::await_completion) returns.
    pub async fn start_job(
        &self,
        msg_type: u16,
        flags: u8,
        payload: &[u8],
    ) -> Result<(u16, Frame)> {
        self.start_job_with(msg_type, flags, payload, &CancellationToken::new())
            .await
    }

    /// [`start_job`](Self::start_job) with caller cancellation.
    pub async fn start_job_with(
        &self,
        msg_type: u16,
        flags: u8,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Result<(u16, Frame)> {
        let lease = JobLease::acquire(&self.job_ids)?;
        let ack = self
            .submit(lease.id, msg_type, flags, payload, cancel)
            .await?;

        let job_id = lease.id;
        match ack_status(&ack) {
            Some(status) if status != 0 => {
                debug!(job_id, status, "job rejected");
                drop(lease);
            }
            _ => lease.commit(),
        }
        Ok((job_id, ack))
    }

    /// Wait for the completion of an accepted job.
    ///
    /// The job id is released on every exit path once the wait is
    /// registered. A second wait on the same id fails with
    /// [`ClientError::DuplicateWaiterKey`] and leaves the id in flight.
    pub async fn await_completion(&self, job_id: u16) -> Result<Frame> {
        self.await_completion_with(job_id, &CancellationToken::new())
            .await
    }

    /// [`await_completion`](Self::await_completion) with caller cancellation.
    pub async fn await_completion_with(
        &self,
        job_id: u16,
        cancel: &CancellationToken,
    ) -> Result<Frame> {
        let waiter = self.router.register(WaiterKey::JobId(job_id))?;
        let _lease = JobLease {
            ids: &self.job_ids,
            id: job_id,
            committed: false,
        };
        waiter.wait(self.config.job_timeout, cancel).await
    }

    /// Start a job and wait for it to complete.
    ///
    /// The completion waiter is registered before the request is sent, so a
    /// device that completes quickly cannot outrun it. A non-zero ack status
    /// is returned as [`ClientError::Rejected`].
    pub async fn run_job(&self, msg_type: u16, flags: u8, payload: &[u8]) -> Result<Frame> {
        self.run_job_with(msg_type, flags, payload, &CancellationToken::new())
            .await
    }

    /// [`run_job`](Self::run_job) with caller cancellation.
    pub async fn run_job_with(
        &self,
        msg_type: u16,
        flags: u8,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Frame> {
        let lease = JobLease::acquire(&self.job_ids)?;
        let completion = self.router.register(WaiterKey::JobId(lease.id))?;

        let ack = self
            .submit(lease.id, msg_type, flags, payload, cancel)
            .await?;
        if let Some(status) = ack_status(&ack).filter(|&status| status != 0) {
            debug!(job_id = lease.id, status, "job rejected");
            return Err(ClientError::Rejected {
                job_id: lease.id,
                status,
            });
        }

        completion.wait(self.config.job_timeout, cancel).await
    }

    // Send the request for `job_id` and wait for its acknowledgement.
    async fn submit(
        &self,
        job_id: u16,
        msg_type: u16,
        flags: u8,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Frame> {
        let seq = self.seqs.next_seq();
        let mut body = BytesMut::with_capacity(2 + payload.len());
        body.put_u16_le(job_id);
        body.extend_from_slice(payload);
        let frame = Frame::new(msg_type, flags, seq, body.freeze());

        let ack = self.router.register(WaiterKey::Seq(seq))?;
        self.transport.send(&frame)?;
        trace!(job_id, seq, msg_type, "job request sent");

        ack.wait(self.config.ack_timeout, cancel).await
    }
}

impl<T> fmt::Debug for JobClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobClient")
            .field("router", &self.router)
            .field("in_flight", &self.job_ids.in_flight())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    use serialprims_frame::{IS_NOTIFICATION, IS_RESPONSE};

    use super::*;

    type Responder = dyn Fn(&Frame) -> Vec<Frame> + Send + Sync;

    // Loops requests back through the router as scripted device replies.
    struct ScriptedDevice {
        router: CorrelationRouter,
        sent: Mutex<Vec<Frame>>,
        respond: Box<Responder>,
    }

    impl ScriptedDevice {
        fn new(
            router: &CorrelationRouter,
            respond: impl Fn(&Frame) -> Vec<Frame> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                router: router.clone(),
                sent: Mutex::new(Vec::new()),
                respond: Box::new(respond),
            })
        }

        fn sent(&self) -> Vec<Frame> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl FrameTransport for ScriptedDevice {
        fn send(&self, frame: &Frame) -> Result<()> {
            self.sent.lock().unwrap().push(frame.clone());
            for reply in (self.respond)(frame) {
                self.router.deliver(reply);
            }
            Ok(())
        }
    }

    fn job_id_of(request: &Frame) -> u16 {
        u16::from_le_bytes([request.payload[0], request.payload[1]])
    }

    fn ack(request: &Frame, status: u8) -> Frame {
        let mut payload = request.payload[..2].to_vec();
        payload.push(status);
        Frame::new(request.msg_type, IS_RESPONSE, request.seq, payload)
    }

    fn done(job_id: u16, result: &[u8]) -> Frame {
        let mut payload = job_id.to_le_bytes().to_vec();
        payload.extend_from_slice(result);
        Frame::new(0x0001, IS_NOTIFICATION, 0, payload)
    }

    fn client(
        device: &Arc<ScriptedDevice>,
        router: &CorrelationRouter,
    ) -> JobClient<Arc<ScriptedDevice>> {
        JobClient::new(Arc::clone(device), router.clone())
    }

    #[test]
    fn status_codes() {
        assert_eq!(RpcStatus::from_code(0), RpcStatus::Ok);
        assert_eq!(RpcStatus::from_code(4), RpcStatus::Busy);
        assert_eq!(RpcStatus::from_code(7), RpcStatus::Unknown);
        assert_eq!(RpcStatus::from_code(200), RpcStatus::Unknown);
        assert_eq!(RpcStatus::InternalError.code(), 6);
        assert_eq!(RpcStatus::NotAllowed.to_string(), "NOT_ALLOWED");
    }

    #[test]
    fn ack_status_requires_three_bytes() {
        assert_eq!(ack_status(&Frame::new(1, IS_RESPONSE, 1, vec![1, 0, 3])), Some(3));
        assert_eq!(ack_status(&Frame::new(1, IS_RESPONSE, 1, vec![1, 0])), None);
    }

    #[tokio::test]
    async fn start_job_prefixes_job_id_and_keeps_it_in_flight() {
        let router = CorrelationRouter::new();
        let device = ScriptedDevice::new(&router, |req| vec![ack(req, 0)]);
        let jobs = client(&device, &router);

        let (job_id, ack) = jobs.start_job(0x0101, 0, &[0xAB, 0xCD]).await.unwrap();
        assert_eq!(job_id, 1);
        assert_eq!(ack_status(&ack), Some(0));
        assert!(jobs.is_in_flight(job_id));

        let sent = device.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].seq, 1);
        assert_eq!(sent[0].msg_type, 0x0101);
        assert_eq!(&sent[0].payload[..], &[0x01, 0x00, 0xAB, 0xCD]);
        assert_eq!(router.pending(), 0);
    }

    #[tokio::test]
    async fn rejected_ack_releases_job_id() {
        let router = CorrelationRouter::new();
        let device = ScriptedDevice::new(&router, |req| vec![ack(req, 4)]);
        let jobs = client(&device, &router);

        let (job_id, ack) = jobs.start_job(0x0101, 0, &[]).await.unwrap();
        assert_eq!(RpcStatus::from_code(ack_status(&ack).unwrap()), RpcStatus::Busy);
        assert!(!jobs.is_in_flight(job_id));
        assert_eq!(jobs.in_flight(), 0);
    }

    #[tokio::test]
    async fn short_ack_counts_as_accepted() {
        let router = CorrelationRouter::new();
        let device = ScriptedDevice::new(&router, |req| {
            vec![Frame::new(req.msg_type, IS_RESPONSE, req.seq, req.payload[..2].to_vec())]
        });
        let jobs = client(&device, &router);

        let (job_id, _) = jobs.start_job(0x0101, 0, &[]).await.unwrap();
        assert!(jobs.is_in_flight(job_id));
    }

    #[tokio::test(start_paused = true)]
    async fn ack_timeout_releases_job_id() {
        let router = CorrelationRouter::new();
        let device = ScriptedDevice::new(&router, |_| Vec::new());
        let jobs = client(&device, &router);

        let result = jobs.start_job(0x0101, 0, &[]).await;
        assert!(matches!(result, Err(ClientError::Timeout(t)) if t == DEFAULT_ACK_TIMEOUT));
        assert_eq!(jobs.in_flight(), 0);
        assert_eq!(router.pending(), 0);
    }

    #[tokio::test]
    async fn completion_releases_job_id() {
        let router = CorrelationRouter::new();
        let device = ScriptedDevice::new(&router, |req| vec![ack(req, 0)]);
        let jobs = client(&device, &router);

        let (job_id, _) = jobs.start_job(0x0101, 0, &[]).await.unwrap();
        let deliver = async {
            while !router.is_pending(WaiterKey::JobId(job_id)) {
                tokio::task::yield_now().await;
            }
            router.deliver(done(job_id, &[0x42]));
        };
        let (completed, _) = tokio::join!(jobs.await_completion(job_id), deliver);

        let frame = completed.unwrap();
        assert_eq!(&frame.payload[2..], &[0x42]);
        assert!(!jobs.is_in_flight(job_id));
    }

    #[tokio::test(start_paused = true)]
    async fn completion_timeout_releases_job_id() {
        let router = CorrelationRouter::new();
        let device = ScriptedDevice::new(&router, |req| vec![ack(req, 0)]);
        let jobs = JobClient::with_config(
            Arc::clone(&device),
            router.clone(),
            JobClientConfig {
                job_timeout: Duration::from_millis(200),
                ..JobClientConfig::default()
            },
        );

        let (job_id, _) = jobs.start_job(0x0101, 0, &[]).await.unwrap();
        let result = jobs.await_completion(job_id).await;
        assert!(matches!(result, Err(ClientError::Timeout(_))));
        assert!(!jobs.is_in_flight(job_id));
        assert_eq!(router.pending(), 0);
    }

    #[tokio::test]
    async fn duplicate_completion_wait_keeps_job_id() {
        let router = CorrelationRouter::new();
        let device = ScriptedDevice::new(&router, |req| vec![ack(req, 0)]);
        let jobs = client(&device, &router);

        let (job_id, _) = jobs.start_job(0x0101, 0, &[]).await.unwrap();
        let first = jobs.await_completion(job_id);
        let second = jobs.await_completion(job_id);
        tokio::pin!(first);

        // Poll the first wait once so its waiter is registered.
        tokio::select! {
            biased;
            _ = &mut first => panic!("first wait finished early"),
            _ = tokio::task::yield_now() => {}
        }

        let err = second.await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::DuplicateWaiterKey(WaiterKey::JobId(id)) if id == job_id
        ));
        assert!(jobs.is_in_flight(job_id));

        router.deliver(done(job_id, b"ok"));
        let frame = first.await.unwrap();
        assert_eq!(&frame.payload[2..], b"ok");
        assert!(!jobs.is_in_flight(job_id));
    }

    #[tokio::test]
    async fn cancelled_completion_releases_job_id() {
        let router = CorrelationRouter::new();
        let device = ScriptedDevice::new(&router, |req| vec![ack(req, 0)]);
        let jobs = client(&device, &router);
        let cancel = CancellationToken::new();

        let (job_id, _) = jobs.start_job(0x0101, 0, &[]).await.unwrap();
        cancel.cancel();
        let result = jobs.await_completion_with(job_id, &cancel).await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
        assert!(!jobs.is_in_flight(job_id));
    }

    #[tokio::test]
    async fn run_job_catches_immediate_completion() {
        let router = CorrelationRouter::new();
        // Completion arrives right behind the ack, before run_job would
        // otherwise have started waiting for it.
        let device = ScriptedDevice::new(&router, |req| {
            vec![ack(req, 0), done(job_id_of(req), b"ok")]
        });
        let jobs = client(&device, &router);

        let frame = jobs.run_job(0x0101, 0, &[0x01]).await.unwrap();
        assert_eq!(&frame.payload[2..], b"ok");
        assert_eq!(jobs.in_flight(), 0);
        assert_eq!(router.pending(), 0);
    }

    #[tokio::test]
    async fn run_job_reports_rejection() {
        let router = CorrelationRouter::new();
        let device = ScriptedDevice::new(&router, |req| vec![ack(req, 2)]);
        let jobs = client(&device, &router);

        let result = jobs.run_job(0x0101, 0, &[]).await;
        assert!(matches!(
            result,
            Err(ClientError::Rejected { job_id: 1, status: 2 })
        ));
        assert_eq!(jobs.in_flight(), 0);
        assert_eq!(router.pending(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_jobs_get_distinct_ids() {
        let router = CorrelationRouter::new();
        let device = ScriptedDevice::new(&router, |req| vec![ack(req, 0)]);
        let jobs = Arc::new(client(&device, &router));

        let tasks: Vec<_> = (0..200)
            .map(|_| {
                let jobs = Arc::clone(&jobs);
                tokio::spawn(async move { jobs.start_job(0x0101, 0, &[]).await })
            })
            .collect();

        let mut ids = HashSet::new();
        for task in tasks {
            let (job_id, _) = task.await.unwrap().unwrap();
            assert!(ids.insert(job_id));
        }
        assert_eq!(jobs.in_flight(), 200);

        let seqs: HashSet<u32> = device.sent().iter().map(|f| f.seq).collect();
        assert_eq!(seqs.len(), 200);
    }

    #[tokio::test]
    async fn released_ids_do_not_collide_with_in_flight_ones() {
        let router = CorrelationRouter::new();
        let device = ScriptedDevice::new(&router, |req| {
            let status = if job_id_of(req) % 2 == 0 { 1 } else { 0 };
            vec![ack(req, status)]
        });
        let jobs = client(&device, &router);

        let mut accepted = HashSet::new();
        for _ in 0..20 {
            let (job_id, ack) = jobs.start_job(0x0101, 0, &[]).await.unwrap();
            if ack_status(&ack) == Some(0) {
                assert!(accepted.insert(job_id));
            }
        }
        assert_eq!(jobs.in_flight(), accepted.len());
        assert!(accepted.iter().all(|id| id % 2 == 1));
    }

    #[tokio::test]
    async fn transport_failure_releases_job_id() {
        struct Broken;
        impl FrameTransport for Broken {
            fn send(&self, _frame: &Frame) -> Result<()> {
                Err(ClientError::Frame(serialprims_frame::FrameError::ConnectionClosed))
            }
        }

        let router = CorrelationRouter::new();
        let jobs = JobClient::new(Broken, router.clone());

        let result = jobs.start_job(0x0101, 0, &[]).await;
        assert!(matches!(result, Err(ClientError::Frame(_))));
        assert_eq!(jobs.in_flight(), 0);
        assert_eq!(router.pending(), 0);
    }
}
