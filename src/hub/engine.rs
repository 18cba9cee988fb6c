//! The `Hub`: admission, background monitors and graceful shutdown.
//!
//! Construction validates the settings, then spawns the liveness monitor, the
//! presence tracker and the resource monitor onto the current tokio runtime,
//! so a `Hub` must be created from within one. Each admitted connection gets an inbound and an
//! outbound pump task; the last of the two to exit finalises the connection.

use std::future::Future;
use std::sync::Arc;

use config::ConfigError;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::config::HubSettings;
use crate::hub::connection::{CloseReason, Connection, ConnectionId};
use crate::hub::handler::MessageHandler;
use crate::hub::liveness::LivenessMonitor;
use crate::hub::metrics::{HubMetrics, MetricsSnapshot};
use crate::hub::presence::PresenceTracker;
use crate::hub::registry::Registry;
use crate::hub::resource::{ResourceAlert, ResourceMonitor, ResourceSample};
use crate::hub::router::{DeliveryReport, Router, Selector};
use crate::hub::{inbound, outbound};
use crate::transport::frame::{CloseNotice, Frame, FrameReader, FrameWriter};
use crate::transport::message::ServerMessage;
use crate::utils::error::{AdmissionError, RegistryError};

const ALERT_CHANNEL_CAPACITY: usize = 16;

/// Cheaply cloneable handle to a running hub.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    settings: HubSettings,
    registry: Arc<Registry>,
    metrics: Arc<HubMetrics>,
    router: Router,
    handler: Arc<dyn MessageHandler>,
    resource: ResourceMonitor,
    alerts: broadcast::Sender<ResourceAlert>,
    shutdown: watch::Sender<bool>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Hub {
    /// Starts a hub, refusing settings it cannot run with.
    pub fn new(
        settings: HubSettings,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;

        let (membership_tx, membership_rx) = mpsc::unbounded_channel();
        let metrics = Arc::new(HubMetrics::default());
        let registry = Arc::new(Registry::with_membership(
            settings.max_connections,
            membership_tx,
        ));
        let router = Router::new(registry.clone(), metrics.clone());
        let (shutdown, _) = watch::channel(false);
        let (alerts, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);

        let liveness = LivenessMonitor::new(
            registry.clone(),
            metrics.clone(),
            settings.liveness_timeout(),
            settings.liveness_scan_interval(),
        );
        let presence = PresenceTracker::new(router.clone());
        let resource = ResourceMonitor::new(
            registry.clone(),
            metrics.clone(),
            settings.resource_alert_ceiling,
            settings.resource_sample_interval(),
            alerts.clone(),
        );

        let background = vec![
            spawn_background(&metrics, liveness.run(shutdown.subscribe())),
            spawn_background(&metrics, presence.run(membership_rx, shutdown.subscribe())),
            spawn_background(&metrics, resource.clone().run(shutdown.subscribe())),
        ];

        info!(
            max_connections = settings.max_connections,
            heartbeat_ms = settings.heartbeat_interval_ms,
            liveness_timeout_ms = settings.liveness_timeout().as_millis() as u64,
            "hub started"
        );

        Ok(Self {
            inner: Arc::new(HubInner {
                settings,
                registry,
                metrics,
                router,
                handler,
                resource,
                alerts,
                shutdown,
                background: Mutex::new(background),
            }),
        })
    }

    /// Admits a transport on behalf of `identity`.
    ///
    /// On success the connection is `Open`, registered, greeted with a
    /// `welcome` message and served by its two pumps. On refusal the peer is
    /// sent a close notice and the transport is dropped.
    pub async fn admit<R, W>(
        &self,
        identity: impl Into<String>,
        reader: R,
        mut writer: W,
    ) -> Result<Arc<Connection>, AdmissionError>
    where
        R: FrameReader,
        W: FrameWriter,
    {
        let inner = &self.inner;
        let identity = identity.into();

        if self.is_shutting_down() {
            return Err(self.refuse(&mut writer, &identity, AdmissionError::ShuttingDown).await);
        }

        let (conn, queue) = Connection::new(identity, inner.settings.outbound_queue_capacity);
        if let Err(err) = inner.registry.register(conn.clone()) {
            let err = AdmissionError::from(err);
            return Err(self.refuse(&mut writer, conn.identity(), err).await);
        }
        inner.metrics.record_opened();

        let welcome = ServerMessage::Welcome {
            connection_id: conn.id().to_string(),
            identity: conn.identity().to_string(),
            heartbeat_interval_ms: inner.settings.heartbeat_interval_ms,
        };
        match welcome.to_frame() {
            Ok(frame) => {
                inner.router.send(&conn, frame);
            }
            Err(err) => warn!(error = %err, "failed to encode welcome"),
        }

        self.spawn_pumps(conn.clone(), queue, reader, writer);
        info!(connection_id = %conn.id(), identity = conn.identity(), "connection opened");
        Ok(conn)
    }

    pub fn router(&self) -> Router {
        self.inner.router.clone()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn settings(&self) -> &HubSettings {
        &self.inner.settings
    }

    pub fn deliver(&self, selector: Selector, frame: Frame) -> DeliveryReport {
        self.inner.router.deliver(selector, frame)
    }

    /// Closes a connection on request of the application.
    pub fn close(&self, id: &ConnectionId) -> Result<Arc<Connection>, RegistryError> {
        self.inner.registry.unregister(id)
    }

    pub fn connection_count(&self) -> usize {
        self.inner.registry.count()
    }

    pub fn is_online(&self, identity: &str) -> bool {
        self.inner.registry.is_online(identity)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn resource_sample(&self) -> ResourceSample {
        self.inner.resource.sample()
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<ResourceAlert> {
        self.inner.alerts.subscribe()
    }

    /// Resolves to `true` once shutdown has begun.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Stops admissions, closes every connection and waits for the
    /// background tasks and the connections to finish, the latter bounded by
    /// the configured grace period. Later calls return immediately.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.shutdown.send_replace(true) {
            return;
        }
        info!(connections = inner.registry.count(), "hub shutting down");

        let open = inner.registry.seal();
        for conn in &open {
            inner.registry.close(conn, CloseReason::Shutdown);
        }

        let background = std::mem::take(&mut *inner.background.lock());
        for result in join_all(background).await {
            if let Err(err) = result {
                warn!(error = %err, "background task failed");
            }
        }

        let grace = inner.settings.shutdown_grace();
        let drained = join_all(open.iter().map(|conn| conn.closed()));
        if time::timeout(grace, drained).await.is_err() {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "connections still closing after grace period"
            );
        }

        let metrics = inner.metrics.snapshot();
        info!(
            opened = metrics.connections_opened,
            closed = metrics.connections_closed,
            "hub stopped"
        );
    }

    async fn refuse<W: FrameWriter>(
        &self,
        writer: &mut W,
        identity: &str,
        err: AdmissionError,
    ) -> AdmissionError {
        self.inner.metrics.record_refused();
        info!(identity, error = %err, "admission refused");

        let notice = CloseNotice::new(err.close_code(), err.to_string());
        outbound::farewell(writer, Some(notice)).await;
        err
    }

    fn spawn_pumps<R, W>(
        &self,
        conn: Arc<Connection>,
        queue: mpsc::Receiver<Frame>,
        reader: R,
        writer: W,
    ) where
        R: FrameReader,
        W: FrameWriter,
    {
        let inner = &self.inner;
        conn.set_live_pumps(2);

        let outbound = outbound::run(
            conn.clone(),
            queue,
            writer,
            inner.settings.heartbeat_interval(),
            inner.registry.clone(),
        );
        let inbound = inbound::run(
            conn.clone(),
            reader,
            inner.registry.clone(),
            inner.router.clone(),
            inner.handler.clone(),
        );

        inner.metrics.pump_started();
        tokio::spawn(pump(outbound, conn.clone(), inner.registry.clone(), inner.metrics.clone()));
        inner.metrics.pump_started();
        tokio::spawn(pump(inbound, conn, inner.registry.clone(), inner.metrics.clone()));
    }
}

async fn pump(
    task: impl Future<Output = ()>,
    conn: Arc<Connection>,
    registry: Arc<Registry>,
    metrics: Arc<HubMetrics>,
) {
    task.await;
    metrics.pump_stopped();
    if !conn.pump_exited() {
        return;
    }

    registry.close(&conn, CloseReason::Requested);
    conn.finish_closing();
    metrics.record_closed();
    let reason = conn.close_reason().unwrap_or(CloseReason::Requested);
    info!(
        connection_id = %conn.id(),
        identity = conn.identity(),
        %reason,
        "connection closed"
    );
}

fn spawn_background(
    metrics: &Arc<HubMetrics>,
    task: impl Future<Output = ()> + Send + 'static,
) -> JoinHandle<()> {
    metrics.background_started();
    let guard = BackgroundGuard {
        metrics: metrics.clone(),
    };
    tokio::spawn(async move {
        let _guard = guard;
        task.await;
    })
}

/// Keeps the background gauge honest when a monitor returns or unwinds.
struct BackgroundGuard {
    metrics: Arc<HubMetrics>,
}

impl Drop for BackgroundGuard {
    fn drop(&mut self) {
        self.metrics.background_stopped();
        let remaining = self.metrics.background_tasks();
        if std::thread::panicking() {
            error!(background_tasks = remaining, "background task panicked");
        } else {
            debug!(background_tasks = remaining, "background task finished");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn panicking_background_task_releases_its_gauge() {
        let metrics = Arc::new(HubMetrics::default());
        let handle = spawn_background(&metrics, async {
            panic!("monitor failed");
        });

        assert!(handle.await.unwrap_err().is_panic());
        assert_eq!(metrics.background_tasks(), 0);
    }
}
