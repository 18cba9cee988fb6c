//! Advisory resource sampling.
//!
//! Periodically reads connection and task counts and raises an alert when
//! total concurrency passes the configured ceiling. The monitor only
//! observes: it never closes connections and never tries to reclaim memory.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::hub::metrics::HubMetrics;
use crate::hub::registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourceSample {
    pub connections: usize,
    pub pump_tasks: usize,
    pub background_tasks: usize,
    pub queued_frames: usize,
}

impl ResourceSample {
    /// Live tasks attributable to the hub.
    pub fn concurrency(&self) -> usize {
        self.pump_tasks + self.background_tasks
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceAlert {
    pub sample: ResourceSample,
    pub ceiling: usize,
    /// Unix milliseconds.
    pub raised_at: i64,
}

#[derive(Debug, Clone)]
pub struct ResourceMonitor {
    registry: Arc<Registry>,
    metrics: Arc<HubMetrics>,
    ceiling: usize,
    period: Duration,
    alerts: broadcast::Sender<ResourceAlert>,
}

impl ResourceMonitor {
    pub fn new(
        registry: Arc<Registry>,
        metrics: Arc<HubMetrics>,
        ceiling: usize,
        period: Duration,
        alerts: broadcast::Sender<ResourceAlert>,
    ) -> Self {
        Self {
            registry,
            metrics,
            ceiling,
            period,
            alerts,
        }
    }

    pub fn sample(&self) -> ResourceSample {
        let connections = self.registry.snapshot();
        ResourceSample {
            connections: connections.len(),
            pump_tasks: self.metrics.active_pumps(),
            background_tasks: self.metrics.background_tasks(),
            queued_frames: connections.iter().map(|conn| conn.queued()).sum(),
        }
    }

    /// Takes a sample and raises an alert if it is over the ceiling.
    pub fn check(&self) -> Option<ResourceAlert> {
        let sample = self.sample();
        debug!(?sample, metrics = ?self.metrics.snapshot(), "resource sample");
        if sample.concurrency() <= self.ceiling {
            return None;
        }

        let alert = ResourceAlert {
            sample,
            ceiling: self.ceiling,
            raised_at: chrono::Utc::now().timestamp_millis(),
        };
        self.metrics.record_alert();
        warn!(
            concurrency = sample.concurrency(),
            ceiling = self.ceiling,
            connections = sample.connections,
            "resource ceiling exceeded"
        );
        let _ = self.alerts.send(alert.clone());
        Some(alert)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = ticker.tick() => {
                    self.check();
                }
            }
        }
        debug!("resource monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::connection::Connection;
    use crate::transport::frame::Frame;

    fn monitor(
        ceiling: usize,
    ) -> (
        ResourceMonitor,
        Arc<Registry>,
        Arc<HubMetrics>,
        broadcast::Receiver<ResourceAlert>,
    ) {
        let registry = Arc::new(Registry::new(10));
        let metrics = Arc::new(HubMetrics::default());
        let (tx, rx) = broadcast::channel(4);
        let monitor = ResourceMonitor::new(
            registry.clone(),
            metrics.clone(),
            ceiling,
            Duration::from_secs(1),
            tx,
        );
        (monitor, registry, metrics, rx)
    }

    #[test]
    fn sample_counts_connections_tasks_and_queues() {
        let (monitor, registry, metrics, _rx) = monitor(100);
        let (conn, _queue) = Connection::new("alice", 8);
        registry.register(conn.clone()).unwrap();
        conn.enqueue(Frame::text("a"));
        conn.enqueue(Frame::text("b"));
        metrics.pump_started();
        metrics.pump_started();
        metrics.background_started();

        let sample = monitor.sample();
        assert_eq!(
            sample,
            ResourceSample {
                connections: 1,
                pump_tasks: 2,
                background_tasks: 1,
                queued_frames: 2,
            }
        );
        assert_eq!(sample.concurrency(), 3);
    }

    #[test]
    fn alerts_every_sample_over_the_ceiling_without_acting() {
        let (monitor, registry, metrics, mut rx) = monitor(1);
        let (conn, _queue) = Connection::new("alice", 8);
        registry.register(conn.clone()).unwrap();

        metrics.pump_started();
        assert!(monitor.check().is_none());

        metrics.pump_started();
        let alert = monitor.check().expect("over the ceiling");
        assert_eq!(alert.ceiling, 1);
        assert_eq!(alert.sample.concurrency(), 2);
        assert!(monitor.check().is_some());

        assert_eq!(rx.try_recv().unwrap().sample.pump_tasks, 2);
        assert_eq!(metrics.snapshot().resource_alerts, 2);
        assert!(conn.is_open());
        assert_eq!(registry.count(), 1);
    }
}
