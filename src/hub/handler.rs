//! Application message handling.
//!
//! Frames the hub does not consume itself are handed to a
//! [`MessageHandler`] together with the source connection and a [`Router`]
//! to answer with. Handlers run on the inbound pump of the source, so they
//! must not block.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::hub::connection::Connection;
use crate::hub::router::{Router, Selector};
use crate::transport::frame::Frame;
use crate::transport::message::{ClientMessage, ServerMessage};

pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, source: &Arc<Connection>, frame: Frame, router: &Router);
}

/// Topic publish handler.
///
/// `{"type":"publish","topic":..,"payload":..}` is fanned out to the
/// topic's subscribers as a `message`. Anything else gets an `error` reply.
#[derive(Debug, Default, Clone, Copy)]
pub struct PubSubHandler;

impl MessageHandler for PubSubHandler {
    fn handle(&self, source: &Arc<Connection>, frame: Frame, router: &Router) {
        let Some(text) = frame.as_text() else {
            reply_error(source, router, "binary frames are not supported");
            return;
        };

        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Publish { topic, payload }) => {
                let message = ServerMessage::Message {
                    topic: topic.clone(),
                    payload,
                    timestamp: chrono::Utc::now().timestamp_millis(),
                };
                match message.to_frame() {
                    Ok(frame) => {
                        let report = router.deliver(Selector::Topic(topic.clone()), frame);
                        debug!(
                            connection_id = %source.id(),
                            topic = %topic,
                            accepted = report.accepted,
                            "published"
                        );
                    }
                    Err(err) => warn!(error = %err, "failed to encode message"),
                }
            }
            Err(err) => {
                debug!(connection_id = %source.id(), error = %err, "unrecognised message");
                reply_error(source, router, "unrecognised message");
            }
        }
    }
}

fn reply_error(source: &Connection, router: &Router, message: &str) {
    let reply = ServerMessage::Error {
        message: message.to_string(),
    };
    if let Ok(frame) = reply.to_frame() {
        router.send(source, frame);
    }
}
