//! WebSocket transport: dialing plus the read and write pumps.
//!
//! The pumps are the only code that touches the network. They talk to the
//! connection actor exclusively through channels and report a lost socket as
//! [`LinkEvent::Down`]. Every socket gets its own epoch so that reports from
//! an already replaced socket can be told apart and ignored.

use crate::error::ClientError;
use futures::stream::SplitStream;
use futures::{Sink, SinkExt, StreamExt};
use jwsapi_core::{ClientConfig, Message};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Shared outbound frame queue. The live write pump holds the lock for the
/// lifetime of its socket, so frames queued while disconnected wait for the
/// next socket.
pub(crate) type OutboundQueue = Arc<Mutex<mpsc::Receiver<String>>>;

/// Transport lifecycle notifications for the connection actor.
pub(crate) enum LinkEvent {
    /// A dial attempt for `epoch` succeeded.
    Up { epoch: u64, stream: WsStream },
    /// The socket of `epoch` failed on read or write.
    Down { epoch: u64, reason: String },
}

/// Open one WebSocket to the gateway, requesting the configured sub-protocol.
pub(crate) async fn dial(config: &ClientConfig) -> Result<WsStream, ClientError> {
    let mut request = config.url.as_str().into_client_request()?;
    let protocol = HeaderValue::from_str(&config.subprotocol)
        .map_err(|e| ClientError::Transport(format!("invalid sub-protocol: {}", e)))?;
    request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, protocol);

    let ws_config = WebSocketConfig {
        max_message_size: Some(config.max_message_size),
        max_frame_size: Some(config.max_message_size),
        ..Default::default()
    };

    let (stream, _response) = tokio::time::timeout(
        config.dial_timeout(),
        connect_async_with_config(request, Some(ws_config), false),
    )
    .await
    .map_err(|_| ClientError::Timeout {
        timeout_ms: config.dial_timeout_ms,
        context: format!("handshake with {}", config.url),
    })??;

    Ok(stream)
}

/// Dial until one attempt succeeds or the connection is cancelled.
pub(crate) async fn dial_loop(
    label: String,
    config: Arc<ClientConfig>,
    epoch: u64,
    events: mpsc::UnboundedSender<LinkEvent>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = dial(&config) => result,
        };

        match result {
            Ok(stream) => {
                info!("{} dialed {} (attempt {})", label, config.url, attempt);
                let _ = events.send(LinkEvent::Up { epoch, stream });
                return;
            }
            Err(e) => {
                warn!("{} connection err: {} (attempt {})", label, e, attempt);
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(config.retry_delay()) => {}
                }
            }
        }
    }
}

/// Decode inbound text frames and hand them to the demultiplexer.
pub(crate) async fn read_pump(
    label: String,
    mut source: SplitStream<WsStream>,
    inbound: mpsc::Sender<(u64, Message)>,
    events: mpsc::UnboundedSender<LinkEvent>,
    epoch: u64,
    cancel: CancellationToken,
) {
    let reason = loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break None,
            frame = source.next() => frame,
        };

        match frame {
            Some(Ok(WsMessage::Text(text))) => {
                debug!("{} recv {}", label, text);
                match Message::from_json(text.trim()) {
                    Ok(msg) => {
                        if let Err(mpsc::error::TrySendError::Full((_, msg))) =
                            inbound.try_send((epoch, msg))
                        {
                            warn!(
                                "{} inbound queue full, dropping {} message (transaction {:?})",
                                label,
                                msg.str(jwsapi_core::attr::JANUS).unwrap_or("untyped"),
                                msg.transaction()
                            );
                        }
                    }
                    Err(e) => error!("{} decode err: {}", label, e),
                }
            }
            Some(Ok(WsMessage::Close(frame))) => {
                break Some(format!("closed by gateway: {:?}", frame));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => break Some(format!("read err: {}", e)),
            None => break Some("stream ended".to_string()),
        }
    };

    if let Some(reason) = reason {
        let _ = events.send(LinkEvent::Down { epoch, reason });
    }
    debug!("{} read pump end", label);
}

/// Drain the outbound queue onto the socket, one deadline-bounded write per frame.
pub(crate) async fn write_pump<S>(
    label: String,
    mut sink: S,
    outbound: OutboundQueue,
    events: mpsc::UnboundedSender<LinkEvent>,
    epoch: u64,
    write_timeout: Duration,
    cancel: CancellationToken,
) where
    S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    let mut queue = tokio::select! {
        _ = cancel.cancelled() => return,
        queue = outbound.lock() => queue,
    };

    let reason = loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break None,
            frame = queue.recv() => match frame {
                Some(frame) => frame,
                None => break None,
            },
        };

        let write = tokio::time::timeout(write_timeout, sink.send(WsMessage::Text(frame)));
        let result = tokio::select! {
            _ = cancel.cancelled() => break None,
            result = write => result,
        };

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => break Some(format!("write err: {}", e)),
            Err(_) => break Some(format!("write timed out after {:?}", write_timeout)),
        }
    };

    drop(queue);
    if let Some(reason) = reason {
        let _ = events.send(LinkEvent::Down { epoch, reason });
    }
    debug!("{} write pump end", label);
}
