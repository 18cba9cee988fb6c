//! Presence notifications.
//!
//! Presence is derived, never stored: an identity is online while the
//! registry holds at least one of its connections. The tracker only turns the
//! registry's membership changes into `presence` messages for everyone else,
//! in the order the registry produced them.

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::hub::registry::MembershipChange;
use crate::hub::router::{DeliveryReport, Router, Selector};
use crate::transport::message::{PresenceStatus, ServerMessage};

#[derive(Debug, Clone)]
pub struct PresenceTracker {
    router: Router,
}

impl PresenceTracker {
    pub fn new(router: Router) -> Self {
        Self { router }
    }

    /// Whether `identity` has at least one registered connection.
    pub fn is_online(&self, identity: &str) -> bool {
        self.router.registry().is_online(identity)
    }

    /// Notifies every connection not owned by the changed identity.
    pub fn publish(&self, change: MembershipChange) -> DeliveryReport {
        let (identity, status) = match change {
            MembershipChange::Joined(identity) => (identity, PresenceStatus::Online),
            MembershipChange::Left(identity) => (identity, PresenceStatus::Offline),
        };
        let message = ServerMessage::Presence {
            identity: identity.clone(),
            status,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        match message.to_frame() {
            Ok(frame) => {
                let report = self.router.deliver(Selector::ExceptIdentity(identity.clone()), frame);
                debug!(
                    identity = %identity,
                    ?status,
                    accepted = report.accepted,
                    "presence published"
                );
                report
            }
            Err(err) => {
                warn!(error = %err, "failed to encode presence");
                DeliveryReport::default()
            }
        }
    }

    pub async fn run(
        self,
        mut changes: mpsc::UnboundedReceiver<MembershipChange>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                change = changes.recv() => match change {
                    Some(change) => {
                        self.publish(change);
                    }
                    None => break,
                },
            }
        }
        debug!("presence tracker stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::hub::connection::{CloseReason, Connection};
    use crate::hub::metrics::HubMetrics;
    use crate::hub::registry::Registry;
    use crate::transport::frame::Frame;

    fn presence_of(frame: Frame) -> (String, PresenceStatus) {
        let text = frame.as_text().unwrap().to_string();
        match serde_json::from_str::<ServerMessage>(&text).unwrap() {
            ServerMessage::Presence { identity, status, .. } => (identity, status),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn announces_to_everyone_but_the_subject() {
        let (tx, mut changes) = mpsc::unbounded_channel();
        let registry = Arc::new(Registry::with_membership(10, tx));
        let router = Router::new(registry.clone(), Arc::new(HubMetrics::default()));
        let tracker = PresenceTracker::new(router);

        let (watcher, mut watcher_rx) = Connection::new("watcher", 8);
        registry.register(watcher).unwrap();
        let (alice, mut alice_rx) = Connection::new("alice", 8);
        registry.register(alice.clone()).unwrap();
        assert!(tracker.is_online("alice"));

        // By the time watcher's join is published, alice is there to hear it.
        assert_eq!(tracker.publish(changes.try_recv().unwrap()).accepted, 1);
        let _ = alice_rx.try_recv();

        tracker.publish(changes.try_recv().unwrap());
        assert_eq!(
            presence_of(watcher_rx.try_recv().unwrap()),
            ("alice".to_string(), PresenceStatus::Online)
        );
        assert!(alice_rx.try_recv().is_err());

        registry.close(&alice, CloseReason::PeerClosed);
        assert!(!tracker.is_online("alice"));
        tracker.publish(changes.try_recv().unwrap());
        assert_eq!(
            presence_of(watcher_rx.try_recv().unwrap()),
            ("alice".to_string(), PresenceStatus::Offline)
        );
    }
}
