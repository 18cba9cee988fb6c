//! Fan-out of frames to registry selections.
//!
//! Delivery is a non-blocking enqueue per target. A target whose queue is
//! full is treated as a slow consumer: the frame is dropped for that target
//! and the connection is closed for backpressure. Nothing here ever waits on
//! a peer.

use std::sync::Arc;

use tracing::{trace, warn};

use crate::hub::connection::{CloseReason, Connection, ConnectionId, DropReason, EnqueueOutcome};
use crate::hub::metrics::HubMetrics;
use crate::hub::registry::Registry;
use crate::transport::frame::Frame;

/// Which registered connections a frame is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Broadcast,
    Topic(String),
    /// Everyone except connections owned by the identity.
    ExceptIdentity(String),
    /// Every connection owned by the identity.
    Identity(String),
    Direct(ConnectionId),
}

/// Per-call delivery outcome.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub accepted: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone)]
pub struct Router {
    registry: Arc<Registry>,
    metrics: Arc<HubMetrics>,
}

impl Router {
    pub fn new(registry: Arc<Registry>, metrics: Arc<HubMetrics>) -> Self {
        Self { registry, metrics }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Enqueues `frame` on every selected connection.
    pub fn deliver(&self, selector: Selector, frame: Frame) -> DeliveryReport {
        let targets = self.targets(&selector);
        let mut report = DeliveryReport::default();
        for conn in &targets {
            if self.offer(conn, frame.clone()) {
                report.accepted += 1;
            } else {
                report.dropped += 1;
            }
        }
        self.metrics.record_delivery(report.accepted, report.dropped);
        trace!(?selector, accepted = report.accepted, dropped = report.dropped, "delivered");
        report
    }

    /// Enqueues `frame` on a single connection with the same overflow policy.
    pub fn send(&self, conn: &Connection, frame: Frame) -> bool {
        let accepted = self.offer(conn, frame);
        self.metrics
            .record_delivery(usize::from(accepted), usize::from(!accepted));
        accepted
    }

    fn offer(&self, conn: &Connection, frame: Frame) -> bool {
        match conn.enqueue(frame) {
            EnqueueOutcome::Accepted => true,
            EnqueueOutcome::Dropped(DropReason::NotOpen) => false,
            EnqueueOutcome::Dropped(DropReason::QueueFull) => {
                if self.registry.close(conn, CloseReason::Backpressure) {
                    self.metrics.record_backpressure();
                    warn!(
                        connection_id = %conn.id(),
                        identity = conn.identity(),
                        "outbound queue full, disconnecting slow consumer"
                    );
                }
                false
            }
        }
    }

    fn targets(&self, selector: &Selector) -> Vec<Arc<Connection>> {
        match selector {
            Selector::Broadcast => self.registry.snapshot(),
            Selector::Topic(topic) => self.registry.list_by_topic(topic),
            Selector::ExceptIdentity(identity) => self
                .registry
                .snapshot()
                .into_iter()
                .filter(|conn| conn.identity() != identity)
                .collect(),
            Selector::Identity(identity) => self.registry.list_by_identity(identity),
            Selector::Direct(id) => self.registry.get(id).into_iter().collect(),
        }
    }
}
