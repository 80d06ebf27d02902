//! Discovery calls over a framed byte stream.
//!
//! Independent of TLS so the framing can be exercised over any duplex pipe.

use enforcer_transport::{ChannelState, DiscoveryStream, RequestSender, TransportError};
use enforcer_xds_protocol::{
    DiscoveryRequest, DiscoveryResponse, Frame, FrameCodec, FrameType, OpenMethod, OpenStream,
    ProtocolError, ResourceCategory, StreamStatus,
};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type ResponseTx = mpsc::UnboundedSender<Result<DiscoveryResponse, TransportError>>;

/// Settings for one framed call.
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Maximum inbound message size.
    pub max_message_size: usize,
    /// Interval between client heartbeats on streams.
    pub keep_alive_interval: Duration,
}

/// Handles to the tasks serving an open stream.
pub struct StreamTasks {
    /// Writes requests and heartbeats.
    pub writer: JoinHandle<()>,
    /// Reads responses.
    pub reader: JoinHandle<()>,
}

/// Open a discovery stream for `category` over `io`.
///
/// `shutdown` stops both tasks; `channel_state` is set to `TransientFailure`
/// when the underlying connection breaks.
///
/// # Errors
///
/// Returns an error if the open frame cannot be written.
pub async fn open_stream<S>(
    io: S,
    category: ResourceCategory,
    config: &CallConfig,
    shutdown: CancellationToken,
    channel_state: Arc<RwLock<ChannelState>>,
) -> Result<(DiscoveryStream, StreamTasks), TransportError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let mut framed = Framed::new(
        io,
        FrameCodec::new().with_max_frame_size(config.max_message_size),
    );

    let open = OpenStream {
        method: OpenMethod::Stream,
        type_url: category.type_url().to_string(),
    };
    framed.send(Frame::encode(FrameType::Open, &open)?).await?;

    let (sink, frames) = framed.split();
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();

    let writer = tokio::spawn(write_loop(
        sink,
        request_rx,
        config.keep_alive_interval,
        shutdown.clone(),
    ));
    let reader = tokio::spawn(read_loop(frames, response_tx, shutdown, channel_state));

    Ok((
        DiscoveryStream {
            requests: RequestSender::new(request_tx),
            responses: Box::pin(UnboundedReceiverStream::new(response_rx)),
        },
        StreamTasks { writer, reader },
    ))
}

/// Perform a single request/response exchange over `io`.
///
/// # Errors
///
/// Returns an error if the exchange fails or the server answers with a status.
pub async fn fetch<S>(
    io: S,
    request: DiscoveryRequest,
    max_message_size: usize,
) -> Result<DiscoveryResponse, TransportError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let mut framed = Framed::new(io, FrameCodec::new().with_max_frame_size(max_message_size));

    let open = OpenStream {
        method: OpenMethod::Fetch,
        type_url: request.type_url.clone(),
    };
    framed.send(Frame::encode(FrameType::Open, &open)?).await?;
    framed.send(Frame::encode(FrameType::Request, &request)?).await?;

    while let Some(frame) = framed.next().await {
        let frame = frame.map_err(map_io_error)?;
        match frame.frame_type {
            FrameType::Response => {
                let response = frame.decode::<DiscoveryResponse>()?;
                let _ = framed.send(Frame::close()).await;
                return Ok(response);
            }
            FrameType::Status => return Err(status_error(&frame)?),
            FrameType::Heartbeat => {}
            FrameType::Close => break,
            other => {
                return Err(unexpected(other));
            }
        }
    }

    Err(TransportError::StreamClosed)
}

async fn write_loop<S>(
    mut sink: futures::stream::SplitSink<Framed<S, FrameCodec>, Frame>,
    mut requests: mpsc::UnboundedReceiver<DiscoveryRequest>,
    keep_alive_interval: Duration,
    shutdown: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let mut heartbeat = tokio::time::interval(keep_alive_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    heartbeat.tick().await;

    loop {
        let frame = tokio::select! {
            () = shutdown.cancelled() => Frame::close(),
            request = requests.recv() => match request {
                Some(request) => match Frame::encode(FrameType::Request, &request) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Dropping unencodable request: {}", e);
                        continue;
                    }
                },
                None => Frame::close(),
            },
            _ = heartbeat.tick() => Frame::heartbeat(),
        };

        let closing = frame.frame_type == FrameType::Close;
        if let Err(e) = sink.send(frame).await {
            debug!("Stream writer stopped: {}", e);
            break;
        }
        if closing {
            break;
        }
    }

    let _ = sink.close().await;
}

async fn read_loop<S>(
    mut frames: futures::stream::SplitStream<Framed<S, FrameCodec>>,
    responses: ResponseTx,
    shutdown: CancellationToken,
    channel_state: Arc<RwLock<ChannelState>>,
) where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    loop {
        let next = tokio::select! {
            () = shutdown.cancelled() => break,
            next = frames.next() => next,
        };

        let Some(frame) = next else {
            break;
        };

        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                let error = map_io_error(e);
                if matches!(error, TransportError::Io(_)) {
                    *channel_state.write() = ChannelState::TransientFailure;
                }
                let _ = responses.send(Err(error));
                break;
            }
        };

        match frame.frame_type {
            FrameType::Response => {
                let item = frame
                    .decode::<DiscoveryResponse>()
                    .map_err(TransportError::from);
                let failed = item.is_err();
                if responses.send(item).is_err() || failed {
                    break;
                }
            }
            FrameType::Heartbeat => {}
            FrameType::Status => {
                match status_error(&frame) {
                    Ok(error) | Err(error) => {
                        let _ = responses.send(Err(error));
                    }
                }
                break;
            }
            FrameType::Close => break,
            other => {
                let _ = responses.send(Err(unexpected(other)));
                break;
            }
        }
    }
}

/// Convert a status frame into the error it reports.
fn status_error(frame: &Frame) -> Result<TransportError, TransportError> {
    let status = frame.decode::<StreamStatus>()?;
    if status.code == 0 {
        return Ok(TransportError::StreamClosed);
    }
    Ok(TransportError::Status {
        code: status.code,
        message: status.message,
    })
}

fn unexpected(frame_type: FrameType) -> TransportError {
    TransportError::Protocol(
        ProtocolError::InvalidFrame(format!("unexpected {frame_type:?} frame from server")).into(),
    )
}

/// Surface oversized frames as a message size error.
fn map_io_error(e: io::Error) -> TransportError {
    let too_large = e
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<ProtocolError>())
        .and_then(|inner| match inner {
            ProtocolError::FrameTooLarge { size, max } => Some((*size, *max)),
            _ => None,
        });

    match too_large {
        Some((size, max)) => TransportError::MessageTooLarge { size, max },
        None => TransportError::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enforcer_xds_protocol::NodeIdentity;
    use tokio::io::DuplexStream;

    fn config() -> CallConfig {
        CallConfig {
            max_message_size: 64 * 1024,
            keep_alive_interval: Duration::from_secs(30),
        }
    }

    fn server(io: DuplexStream) -> Framed<DuplexStream, FrameCodec> {
        Framed::new(io, FrameCodec::new())
    }

    #[tokio::test]
    async fn test_stream_request_and_response() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let mut server = server(server_io);
        let state = Arc::new(RwLock::new(ChannelState::Ready));

        let (mut stream, _tasks) = open_stream(
            client_io,
            ResourceCategory::RevokedTokens,
            &config(),
            CancellationToken::new(),
            Arc::clone(&state),
        )
        .await
        .unwrap();

        let open = server.next().await.unwrap().unwrap();
        assert_eq!(open.frame_type, FrameType::Open);
        let open: OpenStream = open.decode().unwrap();
        assert_eq!(open.method, OpenMethod::Stream);
        assert_eq!(open.type_url, ResourceCategory::RevokedTokens.type_url());

        let node = NodeIdentity::new("enforcer", "pod-1");
        stream
            .requests
            .send(DiscoveryRequest::initial(&node, ResourceCategory::RevokedTokens, ""))
            .unwrap();
        let request = server.next().await.unwrap().unwrap();
        assert_eq!(request.frame_type, FrameType::Request);
        let request: DiscoveryRequest = request.decode().unwrap();
        assert_eq!(request.node.label, enforcer_xds_protocol::COMMON_ENFORCER_LABEL);

        let response = DiscoveryResponse::new(ResourceCategory::RevokedTokens, "v1", "n1", vec![]);
        server.send(Frame::heartbeat()).await.unwrap();
        server
            .send(Frame::encode(FrameType::Response, &response).unwrap())
            .await
            .unwrap();
        assert_eq!(stream.responses.next().await.unwrap().unwrap(), response);

        let status = StreamStatus {
            code: 14,
            message: "draining".to_string(),
        };
        server
            .send(Frame::encode(FrameType::Status, &status).unwrap())
            .await
            .unwrap();
        assert!(matches!(
            stream.responses.next().await,
            Some(Err(TransportError::Status { code: 14, .. }))
        ));
        assert!(stream.responses.next().await.is_none());
        assert_eq!(*state.read(), ChannelState::Ready);
    }

    #[tokio::test]
    async fn test_broken_connection_fails_channel() {
        let (client_io, server_io) = tokio::io::duplex(1024);
        let state = Arc::new(RwLock::new(ChannelState::Ready));

        let (mut stream, _tasks) = open_stream(
            client_io,
            ResourceCategory::Apis,
            &config(),
            CancellationToken::new(),
            Arc::clone(&state),
        )
        .await
        .unwrap();

        // Half a frame header, then the peer vanishes
        let mut server = server(server_io);
        let _ = server.next().await;
        let mut io = server.into_inner();
        tokio::io::AsyncWriteExt::write_all(&mut io, &[0, 0, 0, 9, 3]).await.unwrap();
        drop(io);

        assert!(matches!(
            stream.responses.next().await,
            Some(Err(TransportError::Io(_)))
        ));
        assert_eq!(*state.read(), ChannelState::TransientFailure);
    }

    #[tokio::test]
    async fn test_oversized_response_is_reported() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let mut server = server(server_io);
        let state = Arc::new(RwLock::new(ChannelState::Ready));
        let small = CallConfig {
            max_message_size: 16,
            ..config()
        };

        let (mut stream, _tasks) = open_stream(
            client_io,
            ResourceCategory::Apis,
            &small,
            CancellationToken::new(),
            state,
        )
        .await
        .unwrap();
        let _ = server.next().await;

        let response = DiscoveryResponse::new(ResourceCategory::Apis, "v1", "n1", vec![]);
        server
            .send(Frame::encode(FrameType::Response, &response).unwrap())
            .await
            .unwrap();

        assert!(matches!(
            stream.responses.next().await,
            Some(Err(TransportError::MessageTooLarge { max: 16, .. }))
        ));
    }

    #[tokio::test]
    async fn test_fetch_exchange() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let mut server = server(server_io);

        let node = NodeIdentity::new("enforcer", "pod-1");
        let request = DiscoveryRequest::initial(&node, ResourceCategory::Config, "");
        let expected = DiscoveryResponse::new(ResourceCategory::Config, "c1", "n1", vec![]);

        let reply = expected.clone();
        let server_task = tokio::spawn(async move {
            let open: OpenStream = server.next().await.unwrap().unwrap().decode().unwrap();
            assert_eq!(open.method, OpenMethod::Fetch);
            let request: DiscoveryRequest =
                server.next().await.unwrap().unwrap().decode().unwrap();
            assert_eq!(request.version_info, "");
            server
                .send(Frame::encode(FrameType::Response, &reply).unwrap())
                .await
                .unwrap();
        });

        let response = fetch(client_io, request, 64 * 1024).await.unwrap();
        assert_eq!(response, expected);
        server_task.await.unwrap();
    }
}
