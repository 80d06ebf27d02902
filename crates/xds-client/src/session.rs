//! Streaming discovery session for one resource category.

use async_trait::async_trait;
use enforcer_handlers::ResponseHandler;
use enforcer_transport::{Channel, ConnectionManager, DiscoveryStream, RequestSender, Transport};
use enforcer_xds_protocol::{DiscoveryRequest, DiscoveryResponse, NodeIdentity, ResourceCategory};
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::SessionError;
use crate::scheduler::{Reconnect, RetryScheduler};
use crate::state::{ConnectionState, SessionState, SessionStatus};

/// Keeps one category's store in sync with the control plane.
///
/// The session owns the category's channel and at most one live stream.
/// New streams are opened by [`start`](Self::start) and afterwards only by
/// the retry scheduler, which the session feeds on every failure.
pub struct DiscoverySession<T, H>
where
    T: Transport,
    H: ResponseHandler + ?Sized,
{
    category: ResourceCategory,
    connection: ConnectionManager<T>,
    receiver: Receiver<H>,
    reconnecting: tokio::sync::Mutex<()>,
    receive_task: Mutex<Option<ReceiveTask>>,
    closed: CancellationToken,
}

struct ReceiveTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl<T, H> DiscoverySession<T, H>
where
    T: Transport,
    H: ResponseHandler + ?Sized,
{
    /// Create a session for the handler's category and register it with
    /// `scheduler`. No stream is opened until [`start`](Self::start).
    pub fn new(
        connection: ConnectionManager<T>,
        handler: Arc<H>,
        node: Arc<NodeIdentity>,
        scheduler: RetryScheduler,
    ) -> Arc<Self> {
        let category = handler.category();

        let session = Arc::new(Self {
            category,
            connection,
            receiver: Receiver {
                category,
                handler,
                state: Arc::new(Mutex::new(SessionState::new(category, node))),
                scheduler,
            },
            reconnecting: tokio::sync::Mutex::new(()),
            receive_task: Mutex::new(None),
            closed: CancellationToken::new(),
        });

        let target: Weak<dyn Reconnect> = Arc::downgrade(&session) as Weak<dyn Reconnect>;
        session.receiver.scheduler.register(category, target);

        session
    }

    /// Category of this session.
    pub const fn category(&self) -> ResourceCategory {
        self.category
    }

    /// Snapshot of the session state.
    pub fn status(&self) -> SessionStatus {
        self.receiver.state.lock().status()
    }

    /// Open the first stream.
    ///
    /// On failure the retry scheduler has already taken over.
    ///
    /// # Errors
    ///
    /// Returns the error that prevented the stream from opening.
    pub async fn start(&self) -> Result<(), SessionError> {
        self.connect_and_watch().await
    }

    /// Stop receiving, cancel retries and close the channel.
    pub async fn shutdown(&self) {
        self.closed.cancel();
        let _guard = self.reconnecting.lock().await;

        self.stop_receiving().await;
        self.receiver.scheduler.stop_retry(self.category);
        self.connection.shutdown().await;
        self.receiver.state.lock().on_shutdown();

        info!("{} discovery session shut down", self.category);
    }

    async fn connect_and_watch(&self) -> Result<(), SessionError> {
        let _guard = self.reconnecting.lock().await;
        if self.closed.is_cancelled() {
            return Err(SessionError::Shutdown);
        }

        if self.is_streaming().await {
            debug!("{} stream is healthy, stopping retries", self.category);
            self.receiver.scheduler.stop_retry(self.category);
            return Ok(());
        }

        self.stop_receiving().await;
        self.receiver.state.lock().begin_connect();

        match self.open_stream().await {
            Ok(stream) => {
                let token = CancellationToken::new();
                let handle = tokio::spawn(self.receiver.clone().run(stream, token.clone()));
                *self.receive_task.lock() = Some(ReceiveTask { token, handle });

                self.receiver.scheduler.stop_retry(self.category);
                info!("{} discovery stream opened", self.category);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to open {} discovery stream: {}", self.category, e);
                self.receiver.state.lock().on_connect_failed();
                if !self.closed.is_cancelled() {
                    self.receiver.scheduler.start_retry(self.category);
                }
                Err(e)
            }
        }
    }

    async fn open_stream(&self) -> Result<DiscoveryStream, SessionError> {
        let channel = self.connection.ensure_connected().await?;
        let stream = channel.open_stream(self.category).await?;

        let request = self.receiver.state.lock().initial_request();
        debug!(
            "Requesting {} from version '{}'",
            self.category, request.version_info
        );
        stream.requests.send(request)?;

        Ok(stream)
    }

    async fn is_streaming(&self) -> bool {
        if self.receiver.state.lock().connection() != ConnectionState::Streaming {
            return false;
        }

        let receiving = self
            .receive_task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished());

        receiving
            && self
                .connection
                .current()
                .await
                .is_some_and(|channel| self.connection.is_ready(&channel))
    }

    /// Cancel the receive task and wait for it, so that an apply already
    /// running on the old stream finishes before a new stream starts.
    async fn stop_receiving(&self) {
        let task = self.receive_task.lock().take();
        if let Some(task) = task {
            task.token.cancel();
            if let Err(e) = task.handle.await {
                warn!("{} receive task ended abnormally: {}", self.category, e);
            }
        }
    }
}

#[async_trait]
impl<T, H> Reconnect for DiscoverySession<T, H>
where
    T: Transport,
    H: ResponseHandler + ?Sized,
{
    async fn reconnect(&self) {
        if let Err(e) = self.connect_and_watch().await {
            debug!("Reconnect of {} failed: {}", self.category, e);
        }
    }
}

impl<T, H> Drop for DiscoverySession<T, H>
where
    T: Transport,
    H: ResponseHandler + ?Sized,
{
    fn drop(&mut self) {
        if let Some(task) = self.receive_task.get_mut().take() {
            task.token.cancel();
        }
    }
}

/// The part of a session a receive task needs.
struct Receiver<H: ?Sized> {
    category: ResourceCategory,
    handler: Arc<H>,
    state: Arc<Mutex<SessionState>>,
    scheduler: RetryScheduler,
}

impl<H: ?Sized> Clone for Receiver<H> {
    fn clone(&self) -> Self {
        Self {
            category: self.category,
            handler: Arc::clone(&self.handler),
            state: Arc::clone(&self.state),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<H> Receiver<H>
where
    H: ResponseHandler + ?Sized,
{
    async fn run(self, stream: DiscoveryStream, token: CancellationToken) {
        let DiscoveryStream {
            requests,
            mut responses,
        } = stream;

        loop {
            let next = tokio::select! {
                biased;
                () = token.cancelled() => {
                    debug!("{} receive task replaced", self.category);
                    return;
                }
                next = responses.next() => next,
            };

            match next {
                Some(Ok(response)) => self.on_response(&requests, &response),
                Some(Err(e)) => {
                    error!("{} discovery stream failed: {}", self.category, e);
                    self.on_terminated(&token);
                    return;
                }
                None => {
                    info!("{} discovery stream completed", self.category);
                    self.on_terminated(&token);
                    return;
                }
            }
        }
    }

    fn on_response(&self, requests: &RequestSender, response: &DiscoveryResponse) {
        info!(
            "{} response received with version {}",
            self.category, response.version_info
        );
        self.state.lock().record_received(response);

        match self.apply(response) {
            Ok(count) => {
                debug!("Applied {} {} entries", count, self.category);
                let ack = self.state.lock().on_applied(response);
                match ack {
                    Some(ack) => self.send(requests, ack),
                    None => warn!(
                        "{} response {} was superseded, not acking",
                        self.category, response.nonce
                    ),
                }
                self.scheduler.stop_retry(self.category);
            }
            Err(e) => {
                error!(
                    "Rejected {} response with nonce {}: {}",
                    self.category, response.nonce, e
                );
                let nack = self.state.lock().on_rejected(response, &e.to_string());
                if let Some(nack) = nack {
                    self.send(requests, nack);
                }
                self.scheduler.start_retry(self.category);
            }
        }
    }

    fn apply(&self, response: &DiscoveryResponse) -> Result<usize, SessionError> {
        let expected = self.category.type_url();
        if response.type_url != expected {
            return Err(SessionError::UnexpectedType {
                expected: expected.to_string(),
                actual: response.type_url.clone(),
            });
        }

        Ok(self.handler.apply(&response.resources)?)
    }

    fn send(&self, requests: &RequestSender, request: DiscoveryRequest) {
        if let Err(e) = requests.send(request) {
            warn!("Failed to send {} request: {}", self.category, e);
        }
    }

    fn on_terminated(&self, token: &CancellationToken) {
        if token.is_cancelled() {
            return;
        }

        self.state.lock().on_stream_terminated();
        self.scheduler.start_retry(self.category);
    }
}
