//! Periodic eviction of silent connections.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::hub::connection::CloseReason;
use crate::hub::metrics::HubMetrics;
use crate::hub::registry::Registry;

#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    registry: Arc<Registry>,
    metrics: Arc<HubMetrics>,
    timeout: Duration,
    period: Duration,
}

impl LivenessMonitor {
    pub fn new(
        registry: Arc<Registry>,
        metrics: Arc<HubMetrics>,
        timeout: Duration,
        period: Duration,
    ) -> Self {
        Self {
            registry,
            metrics,
            timeout,
            period,
        }
    }

    /// Evicts every connection silent for longer than the timeout.
    /// Returns the number evicted by this pass.
    pub fn scan(&self, now: Instant) -> usize {
        let mut evicted = 0;
        for conn in self.registry.snapshot() {
            let idle = conn.idle_for(now);
            if idle <= self.timeout {
                continue;
            }
            if self.registry.close(&conn, CloseReason::LivenessTimeout) {
                evicted += 1;
                self.metrics.record_eviction();
                info!(
                    connection_id = %conn.id(),
                    identity = conn.identity(),
                    idle_ms = idle.as_millis() as u64,
                    "evicted silent connection"
                );
            }
        }
        evicted
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = ticker.tick() => {
                    self.scan(Instant::now());
                }
            }
        }
        debug!("liveness monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::connection::{Connection, ConnectionState};

    #[tokio::test(start_paused = true)]
    async fn evicts_only_connections_past_the_timeout() {
        let registry = Arc::new(Registry::new(10));
        let metrics = Arc::new(HubMetrics::default());
        let monitor = LivenessMonitor::new(
            registry.clone(),
            metrics.clone(),
            Duration::from_secs(2),
            Duration::from_secs(1),
        );

        let (quiet, _q) = Connection::new("quiet", 4);
        let (chatty, _c) = Connection::new("chatty", 4);
        registry.register(quiet.clone()).unwrap();
        registry.register(chatty.clone()).unwrap();

        time::advance(Duration::from_millis(1500)).await;
        chatty.touch();
        assert_eq!(monitor.scan(Instant::now()), 0);

        time::advance(Duration::from_millis(1000)).await;
        assert_eq!(monitor.scan(Instant::now()), 1);
        assert_eq!(quiet.state(), ConnectionState::Closing);
        assert_eq!(quiet.close_reason(), Some(CloseReason::LivenessTimeout));
        assert!(chatty.is_open());
        assert_eq!(metrics.snapshot().liveness_evictions, 1);

        assert_eq!(monitor.scan(Instant::now()), 0);
    }
}
