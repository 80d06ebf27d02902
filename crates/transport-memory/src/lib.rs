//! In-memory transport implementation for testing
//!
//! [`MemoryControlPlane`] plays the server side: tests accept the streams a
//! client opens, read its requests, push responses and inject failures. The
//! matching [`MemoryTransport`] is handed to the code under test.

use async_trait::async_trait;
use enforcer_transport::{
    Channel, ChannelState, DiscoveryStream, Endpoint, RequestSender, Transport, TransportError,
};
use enforcer_xds_protocol::{DiscoveryRequest, DiscoveryResponse, ResourceCategory};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Scripted result of the next fetch call
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Answer with this response
    Respond(DiscoveryResponse),
    /// Fail with an unavailable error
    Fail(String),
    /// Never answer
    Hang,
}

type StreamQueue = (flume::Sender<ServerStream>, flume::Receiver<ServerStream>);

#[derive(Default)]
struct Inner {
    connects: AtomicUsize,
    refuse_connects: AtomicUsize,
    refuse_streams: AtomicUsize,
    fetches: AtomicUsize,
    fetch_script: Mutex<VecDeque<FetchOutcome>>,
    fetch_requests: Mutex<Vec<DiscoveryRequest>>,
    streams: Mutex<HashMap<ResourceCategory, StreamQueue>>,
    channels: Mutex<Vec<Weak<MemoryChannel>>>,
}

impl Inner {
    fn queue(&self, category: ResourceCategory) -> StreamQueue {
        self.streams
            .lock()
            .entry(category)
            .or_insert_with(flume::unbounded)
            .clone()
    }

    /// Consume one unit of a "refuse the next N" counter.
    fn take_refusal(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Server side of the in-memory transport
#[derive(Clone, Default)]
pub struct MemoryControlPlane {
    inner: Arc<Inner>,
}

impl MemoryControlPlane {
    /// Create a control plane with no scripted behaviour
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose channels connect to this control plane
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Refuse the next `count` connection attempts
    pub fn refuse_connections(&self, count: usize) {
        self.inner.refuse_connects.store(count, Ordering::SeqCst);
    }

    /// Refuse the next `count` stream opens
    pub fn refuse_streams(&self, count: usize) {
        self.inner.refuse_streams.store(count, Ordering::SeqCst);
    }

    /// Number of channels established so far
    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Queue the outcome of a future fetch call
    pub fn script_fetch(&self, outcome: FetchOutcome) {
        self.inner.fetch_script.lock().push_back(outcome);
    }

    /// Number of fetch calls received
    pub fn fetch_count(&self) -> usize {
        self.inner.fetches.load(Ordering::SeqCst)
    }

    /// Requests received by fetch calls, in order
    pub fn fetch_requests(&self) -> Vec<DiscoveryRequest> {
        self.inner.fetch_requests.lock().clone()
    }

    /// Wait for the client to open a stream for `category`
    pub async fn accept(&self, category: ResourceCategory) -> Option<ServerStream> {
        let (_, rx) = self.inner.queue(category);
        rx.recv_async().await.ok()
    }

    /// Take an already opened stream for `category`, if any
    pub fn try_accept(&self, category: ResourceCategory) -> Option<ServerStream> {
        let (_, rx) = self.inner.queue(category);
        rx.try_recv().ok()
    }

    /// Number of opened streams for `category` not yet accepted
    pub fn pending_streams(&self, category: ResourceCategory) -> usize {
        self.inner.queue(category).1.len()
    }

    /// Put every live channel into transient failure and end its streams
    pub fn fail_channels(&self) {
        let channels = self.inner.channels.lock().clone();
        for channel in channels.iter().filter_map(Weak::upgrade) {
            info!("Failing memory channel {}", channel.id);
            *channel.state.write() = ChannelState::TransientFailure;
            channel.cancel.cancel();
        }
    }
}

/// Client side of the in-memory transport
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

impl Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("connects", &self.inner.connects.load(Ordering::SeqCst))
            .finish()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Channel = MemoryChannel;

    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<MemoryChannel>, TransportError> {
        if Inner::take_refusal(&self.inner.refuse_connects) {
            debug!("Refusing memory connection to {}", endpoint);
            return Err(TransportError::ConnectionFailed(format!(
                "{endpoint} refused connection"
            )));
        }

        self.inner.connects.fetch_add(1, Ordering::SeqCst);

        let channel = Arc::new(MemoryChannel {
            id: Uuid::new_v4(),
            state: RwLock::new(ChannelState::Ready),
            cancel: CancellationToken::new(),
            inner: Arc::clone(&self.inner),
        });

        let mut channels = self.inner.channels.lock();
        channels.retain(|c| c.strong_count() > 0);
        channels.push(Arc::downgrade(&channel));

        info!("Memory channel {} established to {}", channel.id, endpoint);

        Ok(channel)
    }
}

/// Memory channel implementation
pub struct MemoryChannel {
    id: Uuid,
    state: RwLock<ChannelState>,
    cancel: CancellationToken,
    inner: Arc<Inner>,
}

impl MemoryChannel {
    fn check_usable(&self) -> Result<(), TransportError> {
        match *self.state.read() {
            ChannelState::Shutdown => Err(TransportError::Shutdown),
            ChannelState::TransientFailure => Err(TransportError::Unavailable(format!(
                "memory channel {} failed",
                self.id
            ))),
            _ => Ok(()),
        }
    }
}

impl Debug for MemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("id", &self.id)
            .field("state", &*self.state.read())
            .finish()
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn state(&self) -> ChannelState {
        *self.state.read()
    }

    async fn open_stream(
        &self,
        category: ResourceCategory,
    ) -> Result<DiscoveryStream, TransportError> {
        self.check_usable()?;

        if Inner::take_refusal(&self.inner.refuse_streams) {
            return Err(TransportError::Unavailable(format!(
                "{category} stream refused"
            )));
        }

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();

        let server = ServerStream {
            id: Uuid::new_v4(),
            category,
            requests: request_rx,
            responses: response_tx,
        };
        debug!("Memory channel {} opened {} stream {}", self.id, category, server.id);

        let (queue, _) = self.inner.queue(category);
        queue
            .send(server)
            .map_err(|_| TransportError::Unavailable("control plane dropped".to_string()))?;

        let responses = UnboundedReceiverStream::new(response_rx)
            .take_until(self.cancel.clone().cancelled_owned());

        Ok(DiscoveryStream {
            requests: RequestSender::new(request_tx),
            responses: Box::pin(responses),
        })
    }

    async fn fetch(&self, request: DiscoveryRequest) -> Result<DiscoveryResponse, TransportError> {
        self.check_usable()?;

        self.inner.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_requests.lock().push(request);

        let outcome = self.inner.fetch_script.lock().pop_front();
        match outcome {
            Some(FetchOutcome::Respond(response)) => Ok(response),
            Some(FetchOutcome::Fail(message)) => Err(TransportError::Unavailable(message)),
            Some(FetchOutcome::Hang) => {
                self.cancel.cancelled().await;
                Err(TransportError::Shutdown)
            }
            None => Err(TransportError::Unavailable(
                "no fetch response scripted".to_string(),
            )),
        }
    }

    async fn shutdown(&self, _grace: Duration) -> Result<(), TransportError> {
        debug!("Shutting down memory channel {}", self.id);
        *self.state.write() = ChannelState::Shutdown;
        self.cancel.cancel();
        Ok(())
    }
}

/// Server half of a stream opened by the client
pub struct ServerStream {
    id: Uuid,
    category: ResourceCategory,
    requests: mpsc::UnboundedReceiver<DiscoveryRequest>,
    responses: mpsc::UnboundedSender<Result<DiscoveryResponse, TransportError>>,
}

impl ServerStream {
    /// Category requested when the stream was opened
    pub const fn category(&self) -> ResourceCategory {
        self.category
    }

    /// Next request sent by the client, `None` once the client is gone
    pub async fn next_request(&mut self) -> Option<DiscoveryRequest> {
        self.requests.recv().await
    }

    /// Request already queued by the client, if any
    pub fn try_next_request(&mut self) -> Option<DiscoveryRequest> {
        self.requests.try_recv().ok()
    }

    /// Push a response to the client; false if the client has gone away
    pub fn respond(&self, response: DiscoveryResponse) -> bool {
        self.responses.send(Ok(response)).is_ok()
    }

    /// Terminate the stream with an error status
    pub fn fail(self, code: i32, message: impl Into<String>) {
        let _ = self.responses.send(Err(TransportError::Status {
            code,
            message: message.into(),
        }));
    }

    /// Terminate the stream cleanly
    pub fn close(self) {
        debug!("Closing memory stream {}", self.id);
    }

    /// Whether the client side has dropped the stream
    pub fn is_closed(&self) -> bool {
        self.responses.is_closed()
    }
}

impl Debug for ServerStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerStream")
            .field("id", &self.id)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}
