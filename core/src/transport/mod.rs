//! Transport adapters. Each accepted client gets a [`Session`] which maps
//! frames onto relay calls and relay deliveries back onto frames.

pub mod tcp;
pub mod ws;

use std::sync::Arc;

use relay_api::{Frame, Kind};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing::warn;

use crate::{
    error::RelayError,
    registry::ConnectionId,
    relay::Relay,
    router::{Delivery, Message},
    subscriptions::SubscriptionId,
};

/// One client connection as seen by a transport. Dropping the session
/// disconnects it from the relay.
pub struct Session {
    relay: Arc<Relay>,
    connection: ConnectionId,
    transport: &'static str,
}

impl Session {
    pub fn open(relay: Arc<Relay>, transport: &'static str) -> (Self, UnboundedReceiver<Delivery>) {
        let (tx, rx) = unbounded_channel();
        let connection = relay.on_connect(tx);
        (
            Self {
                relay,
                connection,
                transport,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.connection
    }

    pub fn connected_frame(&self) -> Frame {
        Frame::connected(self.connection.to_string())
    }

    /// Apply an inbound frame, returning the frame to answer with directly,
    /// if any.
    pub fn handle(&self, frame: Frame) -> Option<Frame> {
        match frame.kind {
            Kind::Subscribe => {
                let Some(destination) = frame.destination else {
                    return Some(Frame::error(
                        "missing_destination",
                        "subscribe needs a destination",
                    ));
                };
                match self.relay.on_subscribe(self.connection, &destination) {
                    Ok(id) => Some(Frame::subscribed(destination, id.to_string())),
                    Err(err) => Some(self.failure(err)),
                }
            }
            Kind::Unsubscribe => {
                let owned = frame
                    .subscription
                    .as_deref()
                    .and_then(SubscriptionId::parse)
                    .filter(|id| self.relay.subscription_owner(*id) == Some(self.connection));
                match owned {
                    Some(id) => {
                        self.relay.on_unsubscribe(id);
                        None
                    }
                    None => Some(Frame::error(
                        "unknown_subscription",
                        "subscription not found for this connection",
                    )),
                }
            }
            Kind::Send => {
                let Some(destination) = frame.destination else {
                    return Some(Frame::error("missing_destination", "send needs a destination"));
                };
                let message = Message {
                    destination,
                    payload: frame.payload.unwrap_or_default(),
                    reply_to: frame.reply_to,
                    correlation: frame.correlation,
                };
                self.relay
                    .route(self.connection, message)
                    .err()
                    .map(|err| self.failure(err))
            }
            other => Some(Frame::error(
                "unexpected_frame",
                format!("clients may not send {other:?} frames"),
            )),
        }
    }

    fn failure(&self, err: RelayError) -> Frame {
        warn!(transport = self.transport, connection = %self.connection, "{err}");
        Frame::error("relay_error", err.to_string())
    }

    pub fn delivery_frame(delivery: Delivery) -> Frame {
        let Delivery {
            subscription,
            message,
        } = delivery;
        let mut frame = Frame::message(
            message.destination,
            Some(subscription.to_string()),
            message.payload,
        );
        frame.reply_to = message.reply_to;
        frame.correlation = message.correlation;
        frame
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.relay.on_disconnect(self.connection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{Router, RouterSettings};

    fn relay() -> Arc<Relay> {
        Arc::new(Relay::new(
            Router::builder(RouterSettings::default())
                .message("/app/echo", |m| Ok(Some(m.payload.clone())))
                .build(),
        ))
    }

    #[test]
    fn subscribe_then_send_produces_message_frame() {
        let relay = relay();
        let (session, mut rx) = Session::open(relay, "test");
        let reply = session.handle(Frame::subscribe("/topic/echo")).unwrap();
        assert_eq!(reply.kind, Kind::Subscribed);
        let sub = reply.subscription.unwrap();

        let mut send = Frame::send("/app/echo", "hi");
        send.correlation = Some("7".into());
        assert!(session.handle(send).is_none());

        let frame = Session::delivery_frame(rx.try_recv().unwrap());
        assert_eq!(frame.kind, Kind::Message);
        assert_eq!(frame.destination.as_deref(), Some("/topic/echo"));
        assert_eq!(frame.subscription.as_deref(), Some(sub.as_str()));
        assert_eq!(frame.payload.as_deref(), Some("hi"));
        assert_eq!(frame.correlation.as_deref(), Some("7"));
    }

    #[test]
    fn foreign_subscription_cannot_be_removed() {
        let relay = relay();
        let (alice, _a) = Session::open(relay.clone(), "test");
        let (bob, _b) = Session::open(relay.clone(), "test");
        let sub = alice
            .handle(Frame::subscribe("/topic/echo"))
            .and_then(|f| f.subscription)
            .unwrap();

        let reply = bob.handle(Frame::unsubscribe(sub.clone())).unwrap();
        assert_eq!(reply.kind, Kind::Error);
        assert!(relay.subscribers_of("/topic/echo").contains(&alice.id()));

        assert!(alice.handle(Frame::unsubscribe(sub)).is_none());
        assert!(relay.subscribers_of("/topic/echo").is_empty());
    }

    #[test]
    fn dropping_session_disconnects() {
        let relay = relay();
        let (session, _rx) = Session::open(relay.clone(), "test");
        session.handle(Frame::subscribe("/topic/echo"));
        let id = session.id();
        drop(session);
        assert!(!relay.is_open(id));
        assert!(relay.subscribers_of("/topic/echo").is_empty());
    }

    #[test]
    fn server_frames_are_rejected() {
        let relay = relay();
        let (session, _rx) = Session::open(relay, "test");
        let reply = session.handle(Frame::connected("x")).unwrap();
        assert_eq!(reply.error.unwrap().code, "unexpected_frame");
    }
}
