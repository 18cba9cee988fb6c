//! Outbound pump: the only writer of a connection's transport.
//!
//! Drains the outbound queue in FIFO order and interleaves a liveness probe
//! every heartbeat interval. Leaves as soon as the connection is no longer
//! `Open`, including while a write is stuck on a stalled peer. Frames still
//! queued at that point are discarded.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::hub::connection::{self, CloseReason, Connection, ConnectionState};
use crate::hub::registry::Registry;
use crate::transport::frame::{CloseNotice, Frame, FrameWriter};
use crate::utils::error::TransportError;

/// Upper bound on the farewell close frame and transport shutdown.
pub(crate) const CLOSE_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

enum Written {
    Done(Result<(), TransportError>),
    Abandoned,
}

pub(crate) async fn run<W: FrameWriter>(
    conn: Arc<Connection>,
    mut queue: mpsc::Receiver<Frame>,
    mut writer: W,
    heartbeat: Duration,
    registry: Arc<Registry>,
) {
    let mut state = conn.watch_state();
    let mut probe = time::interval_at(Instant::now() + heartbeat, heartbeat);
    probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            biased;
            _ = connection::left_open(&mut state) => break,
            next = queue.recv() => match next {
                Some(frame) => frame,
                None => break,
            },
            _ = probe.tick() => Frame::Ping(bytes::Bytes::new()),
        };

        match write(&mut writer, frame, &mut state).await {
            Written::Done(Ok(())) => trace!(connection_id = %conn.id(), "frame written"),
            Written::Done(Err(err)) => {
                debug!(connection_id = %conn.id(), error = %err, "write failed");
                registry.close(&conn, CloseReason::WriteError);
                break;
            }
            Written::Abandoned => break,
        }
    }

    queue.close();
    let notice = match conn.close_reason() {
        Some(CloseReason::WriteError | CloseReason::PeerClosed) => None,
        Some(reason) => Some(reason.notice()),
        None => Some(CloseReason::Requested.notice()),
    };
    farewell(&mut writer, notice).await;
    debug!(connection_id = %conn.id(), state = ?*state.borrow(), "outbound pump stopped");
}

async fn write<W: FrameWriter>(
    writer: &mut W,
    frame: Frame,
    state: &mut tokio::sync::watch::Receiver<ConnectionState>,
) -> Written {
    tokio::select! {
        biased;
        _ = connection::left_open(state) => Written::Abandoned,
        result = writer.write_frame(frame) => Written::Done(result),
    }
}

/// Best-effort close notice followed by transport shutdown, each bounded in time.
pub(crate) async fn farewell<W: FrameWriter>(writer: &mut W, notice: Option<CloseNotice>) {
    if let Some(notice) = notice {
        let close = writer.write_frame(Frame::Close(Some(notice)));
        let _ = time::timeout(CLOSE_WRITE_TIMEOUT, close).await;
    }
    let _ = time::timeout(CLOSE_WRITE_TIMEOUT, writer.close()).await;
}
