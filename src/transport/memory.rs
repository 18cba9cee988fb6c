//! In-process transport.
//!
//! Each side of a [`pair`] talks through bounded tokio channels. The hub side
//! gets a [`MemoryReader`] and a [`MemoryWriter`]; the other side is a
//! [`MemoryPeer`] that plays the remote client. A peer that stops reading
//! behaves like a stalled network consumer: once its buffer is full, writes
//! from the hub block.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::transport::frame::{Frame, FrameReader, FrameWriter};
use crate::utils::error::TransportError;

/// Creates a connected transport. `buffer` bounds each direction.
pub fn pair(buffer: usize) -> (MemoryReader, MemoryWriter, MemoryPeer) {
    let (to_hub, from_peer) = mpsc::channel(buffer);
    let (to_peer, from_hub) = mpsc::channel(buffer);

    (
        MemoryReader { rx: from_peer },
        MemoryWriter { tx: Some(to_peer) },
        MemoryPeer {
            tx: Some(to_hub),
            rx: from_hub,
        },
    )
}

#[derive(Debug)]
pub struct MemoryReader {
    rx: mpsc::Receiver<Frame>,
}

#[derive(Debug)]
pub struct MemoryWriter {
    tx: Option<mpsc::Sender<Frame>>,
}

/// Remote end of an in-process transport.
#[derive(Debug)]
pub struct MemoryPeer {
    tx: Option<mpsc::Sender<Frame>>,
    rx: mpsc::Receiver<Frame>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn read_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        self.rx.recv().await.map(Ok)
    }
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).await.map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // Dropping the sender is what the peer observes; never wait on a full buffer here.
        self.tx.take();
        Ok(())
    }
}

impl MemoryPeer {
    pub async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).await.map_err(|_| TransportError::Closed)
    }

    pub async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.send(Frame::text(text)).await
    }

    /// Next frame from the hub, `None` once the hub closed the transport.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Next frame that is not a liveness probe.
    pub async fn recv_data(&mut self) -> Option<Frame> {
        loop {
            match self.rx.recv().await? {
                Frame::Ping(_) | Frame::Pong(_) => continue,
                frame => return Some(frame),
            }
        }
    }

    pub fn try_recv(&mut self) -> Result<Frame, TryRecvError> {
        self.rx.try_recv()
    }

    /// Drops the sending half; the hub reads a clean end of stream.
    pub fn hang_up(&mut self) {
        self.tx.take();
    }
}
