//! # RPC Peer with Async Pump
//!
//! One `Peer` per open channel. Calls in both directions share it: outgoing
//! Invokes are correlated with their Results by request id, and incoming
//! Invokes are handed to a `Dispatch` on a worker task of their own, so a
//! callback made while serving a call cannot block the pump.
//!
//! ## Invariants
//!
//! - Request ids are unique per channel per direction.
//! - An inbound Invoke whose request id was already seen is dropped.
//! - When the pump exits for any reason, every pending call fails with a
//!   connectivity error and the transport is closed.
//! - A frame that cannot be decoded tears the channel down.

use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use tetherrpc::peek_request_id;
use tetherrpc::EndpointAddress;
use tetherrpc::Failure;
use tetherrpc::Frame;
use tetherrpc::Target;
use tetherrpc::WireValue;

use crate::transport;
use crate::transport::Transport;

/// How many inbound request ids are remembered for duplicate detection.
const SEEN_WINDOW: usize = 4096;

#[derive(Debug, Clone)]
pub enum Error {
    Transport(transport::Error),
    Wire(tetherrpc::Error),
    /// The remote side answered with a failure.
    Failed(Failure),
    Timeout,
    Closed,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport error: {}", e),
            Self::Wire(e) => write!(f, "wire error: {}", e),
            Self::Failed(failure) => write!(f, "remote failure: {}", failure),
            Self::Timeout => write!(f, "request timed out"),
            Self::Closed => write!(f, "channel closed"),
        }
    }
}

impl std::error::Error for Error {}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<tetherrpc::Error> for Error {
    fn from(e: tetherrpc::Error) -> Self {
        Self::Wire(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Serves inbound Invokes arriving on a peer.
#[async_trait::async_trait]
pub(crate) trait Dispatch: Send + Sync + 'static {
    async fn dispatch(
        &self,
        from: &EndpointAddress,
        target: Target,
        selector: String,
        args: Vec<WireValue>,
    ) -> std::result::Result<WireValue, Failure>;

    /// The peer's pump has exited.
    fn disconnected(&self, remote: &EndpointAddress);
}

type Pending = DashMap<u64, oneshot::Sender<Result<WireValue>>>;

/// Inbound request ids seen recently, oldest first.
struct SeenWindow {
    order: VecDeque<u64>,
    ids: HashSet<u64>,
}

impl SeenWindow {
    fn new() -> Self {
        Self { order: VecDeque::with_capacity(SEEN_WINDOW), ids: HashSet::with_capacity(SEEN_WINDOW) }
    }

    /// Returns false if `id` was already seen.
    fn insert(&mut self, id: u64) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > SEEN_WINDOW {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
        true
    }
}

pub(crate) struct Peer {
    remote: EndpointAddress,
    transport: Arc<dyn Transport>,
    pending: Arc<Pending>,
    seq_gen: AtomicU64,
    call_timeout: Duration,
    closed: Arc<AtomicBool>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Peer {
    /// Wraps an open transport and spawns its pump. The pump outlives the
    /// returned handle and stops when the channel ends or `shutdown` fires.
    pub(crate) fn new(
        remote: EndpointAddress,
        transport: Arc<dyn Transport>,
        dispatch: Arc<dyn Dispatch>,
        call_timeout: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Arc<Self> {
        let pending: Arc<Pending> = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        let pump = tokio::spawn(Self::pump(
            remote.clone(),
            transport.clone(),
            pending.clone(),
            closed.clone(),
            dispatch,
            shutdown,
        ));

        Arc::new(Self {
            remote,
            transport,
            pending,
            seq_gen: AtomicU64::new(1),
            call_timeout,
            closed,
            pump: Mutex::new(Some(pump)),
        })
    }

    pub(crate) fn remote(&self) -> &EndpointAddress {
        &self.remote
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn pump(
        remote: EndpointAddress,
        transport: Arc<dyn Transport>,
        pending: Arc<Pending>,
        closed: Arc<AtomicBool>,
        dispatch: Arc<dyn Dispatch>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut seen = SeenWindow::new();
        let error = loop {
            // a receiver subscribed after shutdown never sees a change
            if *shutdown.borrow_and_update() {
                break Error::Closed;
            }
            let received = tokio::select! {
                received = transport.recv() => received,
                _ = shutdown.changed() => break Error::Closed,
            };
            let msg = match received {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    break Error::Transport(transport::Error::ConnectionLost("stream closed".into()));
                }
                Err(e) => {
                    debug!(peer = %remote, error = %e, "transport error in pump");
                    break Error::Transport(e);
                }
            };

            match Frame::from_bytes(&msg) {
                Ok(Frame::Result { request_id, outcome }) => {
                    match pending.remove(&request_id) {
                        Some((_, tx)) => {
                            let _ = tx.send(outcome.map_err(Error::Failed));
                        }
                        None => trace!(peer = %remote, request_id, "late or unknown result dropped"),
                    }
                }
                Ok(Frame::Invoke { request_id, target, selector, args }) => {
                    if !seen.insert(request_id) {
                        debug!(peer = %remote, request_id, "duplicate invoke dropped");
                        continue;
                    }
                    tokio::spawn(Self::serve(
                        remote.clone(),
                        transport.clone(),
                        dispatch.clone(),
                        request_id,
                        target,
                        selector,
                        args,
                    ));
                }
                Err(e) => {
                    match peek_request_id(&msg) {
                        Some((is_invoke, request_id)) => {
                            warn!(peer = %remote, request_id, is_invoke, error = %e, "undecodable frame")
                        }
                        None => warn!(peer = %remote, error = %e, "undecodable frame"),
                    }
                    break Error::Wire(e);
                }
            }
        };

        closed.store(true, Ordering::Release);
        Self::notify_all_pending(&pending, error);
        transport.close().await;
        dispatch.disconnected(&remote);
        debug!(peer = %remote, "pump exited");
    }

    async fn serve(
        remote: EndpointAddress,
        transport: Arc<dyn Transport>,
        dispatch: Arc<dyn Dispatch>,
        request_id: u64,
        target: Target,
        selector: String,
        args: Vec<WireValue>,
    ) {
        let outcome = dispatch.dispatch(&remote, target, selector, args).await;
        let frame = Frame::Result { request_id, outcome };
        let bytes = match frame.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(peer = %remote, request_id, error = %e, "result could not be encoded");
                return;
            }
        };
        if let Err(e) = transport.send(&bytes).await {
            debug!(peer = %remote, request_id, error = %e, "result could not be sent");
        }
    }

    fn notify_all_pending(pending: &Pending, error: Error) {
        let keys: Vec<u64> = pending.iter().map(|e| *e.key()).collect();
        for key in keys {
            if let Some((_, tx)) = pending.remove(&key) {
                let _ = tx.send(Err(error.clone()));
            }
        }
    }

    /// Sends one Invoke and waits for its Result.
    pub(crate) async fn call(&self, target: Target, selector: &str, args: Vec<WireValue>) -> Result<WireValue> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let request_id = self.seq_gen.fetch_add(1, Ordering::Relaxed);
        let frame = Frame::Invoke { request_id, target, selector: selector.to_string(), args };
        let payload = frame.to_bytes()?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, tx);

        // the pump may have exited between the check above and the insert
        if self.is_closed() {
            self.pending.remove(&request_id);
            return Err(Error::Closed);
        }

        if let Err(e) = self.transport.send(&payload).await {
            self.pending.remove(&request_id);
            return Err(e.into());
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                self.pending.remove(&request_id);
                Err(Error::Closed)
            }
            Err(_) => {
                self.pending.remove(&request_id);
                Err(Error::Timeout)
            }
        }
    }

    /// Stops the pump, fails pending calls and closes the transport.
    pub(crate) async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let pump = self.pump.lock().take();
        if let Some(pump) = pump {
            pump.abort();
        }
        Self::notify_all_pending(&self.pending, Error::Closed);
        self.transport.close().await;
    }
}
