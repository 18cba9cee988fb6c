//! WebSocket transport
//!
//! Accepts TCP connections, performs the WebSocket handshake and hands each
//! socket to the hub as a reader/writer pair. Responsibilities:
//! - Resolve the owner identity during the handshake and refuse it with
//!   `401 Unauthorized` when there is none
//! - Map tungstenite messages onto hub [`Frame`]s and back
//! - Stop accepting once the hub starts shutting down, and abandon
//!   handshakes still in flight
//!
//! The hub performs no credential validation; plug a stricter
//! [`IdentityResolver`] in front of it where that matters.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::time;
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};
use tracing::{debug, info, warn};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::{CloseFrame, Message as WsMessage};
use url::form_urlencoded;

use crate::hub::Hub;
use crate::transport::frame::{CloseNotice, Frame, FrameReader, FrameWriter};
use crate::utils::error::TransportError;

/// Time a client gets to complete the upgrade request.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Supplies the owner identity of a connection from its handshake request.
pub trait IdentityResolver: Send + Sync + 'static {
    fn resolve(&self, request: &Request) -> Option<String>;
}

/// Reads the identity from a query parameter, e.g. `/?player_id=42`.
/// The value is percent-decoded.
#[derive(Debug, Clone)]
pub struct QueryParamIdentity {
    param: String,
}

impl QueryParamIdentity {
    pub fn new(param: impl Into<String>) -> Self {
        Self {
            param: param.into(),
        }
    }
}

impl IdentityResolver for QueryParamIdentity {
    fn resolve(&self, request: &Request) -> Option<String> {
        let query = request.uri().query()?;
        form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| *key == self.param)
            .map(|(_, value)| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

pub struct WsReader<S> {
    inner: SplitStream<WebSocketStream<S>>,
}

pub struct WsWriter<S> {
    inner: SplitSink<WebSocketStream<S>, WsMessage>,
}

/// Splits an established WebSocket into hub transport halves.
pub fn split<S>(stream: WebSocketStream<S>) -> (WsReader<S>, WsWriter<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (sink, stream) = stream.split();
    (WsReader { inner: stream }, WsWriter { inner: sink })
}

#[async_trait]
impl<S> FrameReader for WsReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn read_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            let message = match self.inner.next().await? {
                Ok(message) => message,
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    return None;
                }
                Err(err) => return Some(Err(err.into())),
            };

            let frame = match message {
                WsMessage::Text(text) => Frame::Text(Arc::from(text.as_str())),
                WsMessage::Binary(data) => Frame::Binary(data),
                WsMessage::Ping(data) => Frame::Ping(data),
                WsMessage::Pong(data) => Frame::Pong(data),
                WsMessage::Close(close) => Frame::Close(close.map(|close| {
                    CloseNotice::new(u16::from(close.code), close.reason.as_str())
                })),
                // Raw frames are only produced when writing.
                WsMessage::Frame(_) => continue,
            };
            return Some(Ok(frame));
        }
    }
}

#[async_trait]
impl<S> FrameWriter for WsWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        let message = match frame {
            Frame::Text(text) => WsMessage::text(text.to_string()),
            Frame::Binary(data) => WsMessage::Binary(data),
            Frame::Ping(data) => WsMessage::Ping(data),
            Frame::Pong(data) => WsMessage::Pong(data),
            Frame::Close(notice) => WsMessage::Close(notice.map(|notice| CloseFrame {
                code: CloseCode::from(notice.code),
                reason: notice.reason.into(),
            })),
        };
        self.inner.send(message).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.inner.close().await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

pub struct WebSocketServer {
    listener: TcpListener,
    hub: Hub,
    resolver: Arc<dyn IdentityResolver>,
}

impl WebSocketServer {
    pub async fn bind(
        addr: &str,
        hub: Hub,
        resolver: Arc<dyn IdentityResolver>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            hub,
            resolver,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until the hub begins shutting down.
    pub async fn run(self) {
        let mut shutdown = self.hub.shutdown_signal();
        if let Ok(addr) = self.local_addr() {
            info!("WebSocket server listening on ws://{addr}");
        }

        loop {
            let (stream, peer) = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        continue;
                    }
                },
            };

            let hub = self.hub.clone();
            let resolver = self.resolver.clone();
            tokio::spawn(async move {
                if let Err(err) = serve(stream, hub, resolver).await {
                    debug!(%peer, error = %err, "handshake failed");
                }
            });
        }

        info!("WebSocket server stopped accepting");
    }
}

async fn serve(
    stream: TcpStream,
    hub: Hub,
    resolver: Arc<dyn IdentityResolver>,
) -> Result<(), TransportError> {
    let mut shutdown = hub.shutdown_signal();
    let mut identity = None;
    let callback = |request: &Request, response: Response| match resolver.resolve(request) {
        Some(found) => {
            identity = Some(found);
            Ok(response)
        }
        None => Err(unauthorized()),
    };
    let stream = tokio::select! {
        biased;
        _ = shutdown.wait_for(|stop| *stop) => return Ok(()),
        accepted = time::timeout(HANDSHAKE_TIMEOUT, accept_hdr_async(stream, callback)) => {
            accepted.map_err(|_| TransportError::HandshakeTimeout)??
        }
    };

    let Some(identity) = identity else {
        return Ok(());
    };
    let (reader, writer) = split(stream);
    if let Err(err) = hub.admit(identity, reader, writer).await {
        debug!(error = %err, "websocket admission refused");
    }
    Ok(())
}

fn unauthorized() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("missing identity".to_string()));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
}
