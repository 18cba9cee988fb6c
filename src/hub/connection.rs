//! Connection bookkeeping
//!
//! A `Connection` is the hub-side state of one admitted transport: who owns
//! it, which topics it listens to, when the peer was last heard from, and
//! the producer end of its bounded outbound queue. The lifecycle state lives
//! in a `watch` channel so both pumps can wait for the transition out of
//! `Open` without polling.
//!
//! Lifecycle: `Connecting -> Open -> Closing -> Closed`. `Connecting -> Open`
//! and `Open -> Closing` only happen inside the registry critical section,
//! which keeps registry membership and the `Open` state in lock step.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::transport::frame::{CloseNotice, Frame};

/// Opaque, immutable identifier assigned at admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Why a connection left the `Open` state. The first reason recorded wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    ReadError,
    WriteError,
    Backpressure,
    LivenessTimeout,
    Requested,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::ReadError => "read_error",
            CloseReason::WriteError => "write_error",
            CloseReason::Backpressure => "backpressure",
            CloseReason::LivenessTimeout => "liveness_timeout",
            CloseReason::Requested => "requested",
            CloseReason::Shutdown => "shutdown",
        }
    }

    /// Close notice sent to the peer before the transport is shut.
    pub fn notice(&self) -> CloseNotice {
        match self {
            CloseReason::PeerClosed | CloseReason::Requested => CloseNotice::new(1000, "closing"),
            CloseReason::ReadError | CloseReason::WriteError => {
                CloseNotice::new(1011, "transport error")
            }
            CloseReason::Backpressure => CloseNotice::new(1008, "outbound queue overflow"),
            CloseReason::LivenessTimeout => CloseNotice::new(4009, "heartbeat timeout"),
            CloseReason::Shutdown => CloseNotice::new(1001, "server shutting down"),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NotOpen,
    QueueFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    Dropped(DropReason),
}

#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    identity: String,
    subscriptions: Mutex<HashSet<String>>,
    opened_at: Instant,
    /// Milliseconds after `opened_at` at which the peer was last heard from.
    last_seen_ms: AtomicU64,
    outbound: mpsc::Sender<Frame>,
    capacity: usize,
    state: watch::Sender<ConnectionState>,
    close_reason: Mutex<Option<CloseReason>>,
    live_pumps: AtomicUsize,
}

impl Connection {
    /// Creates a connection in the `Connecting` state together with the
    /// consuming end of its outbound queue.
    pub fn new(
        identity: impl Into<String>,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        Self::with_id(ConnectionId::new(), identity, capacity)
    }

    pub fn with_id(
        id: ConnectionId,
        identity: impl Into<String>,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let conn = Self {
            id,
            identity: identity.into(),
            subscriptions: Mutex::new(HashSet::new()),
            opened_at: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
            outbound: tx,
            capacity,
            state,
            close_reason: Mutex::new(None),
            live_pumps: AtomicUsize::new(0),
        };
        (Arc::new(conn), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Adds a topic. Returns `false` if it was already subscribed.
    pub fn subscribe(&self, topic: &str) -> bool {
        self.subscriptions.lock().insert(topic.to_string())
    }

    /// Removes a topic. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, topic: &str) -> bool {
        self.subscriptions.lock().remove(topic)
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.lock().contains(topic)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().iter().cloned().collect()
    }

    /// Records evidence that the peer is alive.
    pub fn touch(&self) {
        let elapsed = Instant::now().saturating_duration_since(self.opened_at);
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.last_seen_ms.fetch_max(millis, Ordering::Relaxed);
    }

    /// Time since the peer was last heard from.
    pub fn idle_for(&self, now: Instant) -> Duration {
        let offset = Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed));
        let last_seen = self.opened_at + offset;
        now.saturating_duration_since(last_seen)
    }

    /// Frames waiting in the outbound queue.
    pub fn queued(&self) -> usize {
        self.capacity.saturating_sub(self.outbound.capacity())
    }

    /// Non-blocking enqueue onto the outbound queue.
    ///
    /// Frames for a connection that is not `Open` are dropped silently. A
    /// full queue is reported as `QueueFull`; the caller owns the
    /// drop-and-disconnect decision.
    pub fn enqueue(&self, frame: Frame) -> EnqueueOutcome {
        if !self.is_open() {
            return EnqueueOutcome::Dropped(DropReason::NotOpen);
        }
        match self.outbound.try_send(frame) {
            Ok(()) => EnqueueOutcome::Accepted,
            Err(TrySendError::Full(_)) => EnqueueOutcome::Dropped(DropReason::QueueFull),
            Err(TrySendError::Closed(_)) => EnqueueOutcome::Dropped(DropReason::NotOpen),
        }
    }

    /// Resolves once the connection reached `Closed`.
    pub async fn closed(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    pub(crate) fn open(&self) -> bool {
        self.transition(ConnectionState::Connecting, ConnectionState::Open)
    }

    pub(crate) fn begin_closing(&self, reason: CloseReason) -> bool {
        let mut recorded = self.close_reason.lock();
        let moved = self.transition(ConnectionState::Open, ConnectionState::Closing);
        if moved && recorded.is_none() {
            *recorded = Some(reason);
        }
        moved
    }

    pub(crate) fn finish_closing(&self) -> bool {
        self.transition(ConnectionState::Closing, ConnectionState::Closed)
    }

    pub(crate) fn set_live_pumps(&self, pumps: usize) {
        self.live_pumps.store(pumps, Ordering::SeqCst);
    }

    /// Returns `true` for the pump that exits last.
    pub(crate) fn pump_exited(&self) -> bool {
        self.live_pumps.fetch_sub(1, Ordering::SeqCst) == 1
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }
}

/// Resolves as soon as the watched connection is no longer `Open`.
pub(crate) async fn left_open(state: &mut watch::Receiver<ConnectionState>) {
    let _ = state
        .wait_for(|s| matches!(s, ConnectionState::Closing | ConnectionState::Closed))
        .await;
}
