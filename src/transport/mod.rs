//! The `transport` module is the boundary between the hub and the network.
//!
//! It defines the frame type and the reader/writer contract every transport
//! implements, the JSON message schema spoken over text frames, a WebSocket
//! server built on tokio-tungstenite and an in-process transport for tests
//! and embedders.

pub mod frame;
pub mod memory;
pub mod message;
pub mod websocket;

pub use frame::{CloseNotice, Frame, FrameReader, FrameWriter};
pub use websocket::{IdentityResolver, QueryParamIdentity, WebSocketServer};

#[cfg(test)]
mod tests;
