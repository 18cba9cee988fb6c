//! Hub-wide counters.
//!
//! Plain atomics updated from the pumps, the router and the monitors. A
//! [`MetricsSnapshot`] is a serializable point-in-time copy.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct HubMetrics {
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    admissions_refused: AtomicU64,
    frames_delivered: AtomicU64,
    frames_dropped: AtomicU64,
    backpressure_disconnects: AtomicU64,
    liveness_evictions: AtomicU64,
    resource_alerts: AtomicU64,
    active_pumps: AtomicUsize,
    background_tasks: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub admissions_refused: u64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub backpressure_disconnects: u64,
    pub liveness_evictions: u64,
    pub resource_alerts: u64,
    pub active_pumps: usize,
    pub background_tasks: usize,
}

impl HubMetrics {
    pub fn record_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refused(&self) {
        self.admissions_refused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self, accepted: usize, dropped: usize) {
        self.frames_delivered.fetch_add(accepted as u64, Ordering::Relaxed);
        self.frames_dropped.fetch_add(dropped as u64, Ordering::Relaxed);
    }

    pub fn record_backpressure(&self) {
        self.backpressure_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.liveness_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert(&self) {
        self.resource_alerts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pump_started(&self) {
        self.active_pumps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pump_stopped(&self) {
        self.active_pumps.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn background_started(&self) {
        self.background_tasks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn background_stopped(&self) {
        self.background_tasks.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_pumps(&self) -> usize {
        self.active_pumps.load(Ordering::Relaxed)
    }

    pub fn background_tasks(&self) -> usize {
        self.background_tasks.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            admissions_refused: self.admissions_refused.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            backpressure_disconnects: self.backpressure_disconnects.load(Ordering::Relaxed),
            liveness_evictions: self.liveness_evictions.load(Ordering::Relaxed),
            resource_alerts: self.resource_alerts.load(Ordering::Relaxed),
            active_pumps: self.active_pumps(),
            background_tasks: self.background_tasks(),
        }
    }
}
