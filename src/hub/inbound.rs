//! Inbound pump: the only reader of a connection's transport.
//!
//! Every frame refreshes the liveness timestamp. Control messages are
//! consumed here; the rest go to the application handler. The pump never
//! writes to the transport, replies are enqueued like any other frame.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::hub::connection::{self, CloseReason, Connection};
use crate::hub::handler::MessageHandler;
use crate::hub::registry::Registry;
use crate::hub::router::Router;
use crate::transport::frame::{Frame, FrameReader};
use crate::transport::message::{ControlMessage, Inbound, ServerMessage, classify};

enum Flow {
    Continue,
    Stop,
}

pub(crate) async fn run<R: FrameReader>(
    conn: Arc<Connection>,
    mut reader: R,
    registry: Arc<Registry>,
    router: Router,
    handler: Arc<dyn MessageHandler>,
) {
    let mut state = conn.watch_state();

    loop {
        let next = tokio::select! {
            biased;
            _ = connection::left_open(&mut state) => break,
            next = reader.read_frame() => next,
        };

        match next {
            None => {
                registry.close(&conn, CloseReason::PeerClosed);
                break;
            }
            Some(Err(err)) => {
                debug!(connection_id = %conn.id(), error = %err, "read failed");
                registry.close(&conn, CloseReason::ReadError);
                break;
            }
            Some(Ok(frame)) => {
                conn.touch();
                if let Flow::Stop = dispatch(&conn, frame, &registry, &router, handler.as_ref()) {
                    break;
                }
            }
        }
    }

    debug!(connection_id = %conn.id(), "inbound pump stopped");
}

fn dispatch(
    conn: &Arc<Connection>,
    frame: Frame,
    registry: &Registry,
    router: &Router,
    handler: &dyn MessageHandler,
) -> Flow {
    let inbound = match &frame {
        // Transports answer protocol pings themselves; both only count as liveness.
        Frame::Ping(_) | Frame::Pong(_) => return Flow::Continue,
        Frame::Close(_) => {
            registry.close(conn, CloseReason::PeerClosed);
            return Flow::Stop;
        }
        Frame::Binary(_) => Inbound::Application,
        Frame::Text(text) => classify(text),
    };

    match inbound {
        Inbound::Control(control) => control_message(conn, control, registry, router),
        Inbound::Malformed { kind, error } => {
            warn!(
                connection_id = %conn.id(),
                kind = %kind,
                error = %error,
                "malformed control message ignored"
            );
            Flow::Continue
        }
        Inbound::Application => {
            handler.handle(conn, frame, router);
            Flow::Continue
        }
    }
}

fn control_message(
    conn: &Arc<Connection>,
    control: ControlMessage,
    registry: &Registry,
    router: &Router,
) -> Flow {
    match control {
        ControlMessage::Subscribe { topic } => {
            conn.subscribe(&topic);
            debug!(connection_id = %conn.id(), topic = %topic, "subscribed");
        }
        ControlMessage::Unsubscribe { topic } => {
            conn.unsubscribe(&topic);
            debug!(connection_id = %conn.id(), topic = %topic, "unsubscribed");
        }
        ControlMessage::Ping => {
            if let Ok(frame) = (ServerMessage::Pong {}).to_frame() {
                router.send(conn, frame);
            }
        }
        ControlMessage::Pong => {}
        ControlMessage::Close => {
            registry.close(conn, CloseReason::Requested);
            return Flow::Stop;
        }
    }
    Flow::Continue
}
