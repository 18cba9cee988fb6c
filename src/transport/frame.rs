//! Frames and the minimal transport contract the hub runs on.
//!
//! A transport is split into a reading half and a writing half so that the
//! inbound and outbound pumps of a connection can own one each. Anything
//! that can produce [`Frame`]s and accept them back (a WebSocket, a framed
//! TCP stream, an in-process channel) can host hub connections.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::utils::error::TransportError;

/// Close code and human readable reason carried by a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseNotice {
    pub code: u16,
    pub reason: String,
}

impl CloseNotice {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// One discrete unit of data exchanged over a connection.
///
/// Payloads are reference counted so a fan-out clones a pointer per target,
/// never the payload itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(Arc<str>),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<CloseNotice>),
}

impl Frame {
    pub fn text(text: impl Into<Arc<str>>) -> Self {
        Frame::Text(text.into())
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Frame::Binary(data.into())
    }

    /// Text content of a text frame.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Reading half of a transport.
#[async_trait]
pub trait FrameReader: Send + 'static {
    /// Next frame from the peer. `None` means the transport reached a clean end.
    async fn read_frame(&mut self) -> Option<Result<Frame, TransportError>>;
}

/// Writing half of a transport.
#[async_trait]
pub trait FrameWriter: Send + 'static {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Flushes and shuts the transport down. Must be safe to call once more
    /// after a failed write.
    async fn close(&mut self) -> Result<(), TransportError>;
}
