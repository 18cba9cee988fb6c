//! The `hub` module owns every live connection.
//!
//! It admits transports into a [`Registry`], runs one inbound and one
//! outbound pump per connection, fans frames out through the [`Router`] and
//! runs three background tasks: the [`LivenessMonitor`], the
//! [`PresenceTracker`] and the advisory [`ResourceMonitor`]. [`Hub`] ties
//! them together.

pub mod connection;
pub mod engine;
pub mod handler;
pub mod liveness;
pub mod metrics;
pub mod presence;
pub mod registry;
pub mod resource;
pub mod router;

mod inbound;
mod outbound;

pub use connection::{CloseReason, Connection, ConnectionId, ConnectionState};
pub use engine::Hub;
pub use handler::{MessageHandler, PubSubHandler};
pub use liveness::LivenessMonitor;
pub use metrics::{HubMetrics, MetricsSnapshot};
pub use presence::PresenceTracker;
pub use registry::{MembershipChange, Registry};
pub use resource::{ResourceAlert, ResourceMonitor, ResourceSample};
pub use router::{DeliveryReport, Router, Selector};
