//! # connhub
//!
//! `connhub` is a real-time connection hub. It keeps a registry of
//! long-lived client connections, fans messages out to them through bounded
//! per-connection queues, evicts peers that stop answering liveness probes
//! and announces identities going online or offline.
//!
//! ## Core Modules
//!
//! - `hub`: the registry, the per-connection pumps, the router and the
//!   liveness, presence and resource monitors, tied together by [`Hub`].
//! - `transport`: the frame contract, the JSON message schema, the WebSocket
//!   server and an in-process transport.
//! - `config`: loading and validating runtime settings.
//! - `utils`: error types and logging setup.

pub mod config;
pub mod hub;
pub mod transport;
pub mod utils;

pub use hub::{Hub, MessageHandler, PubSubHandler, Selector};
