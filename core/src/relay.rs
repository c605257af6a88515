use std::{
    collections::HashSet,
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, trace, warn};

use crate::{
    error::RelayError,
    events::{EventBus, SessionEvent},
    registry::{ConnectionId, ConnectionRegistry},
    router::{Delivery, Dispatch, Message, Router},
    stats::{Counters, StatsSnapshot},
    subscriptions::{SubscriptionId, SubscriptionTable},
};

/// Registry and subscriptions share one lock so a disconnect cascade is
/// never observed half done.
#[derive(Default)]
struct Tables {
    registry: ConnectionRegistry,
    subscriptions: SubscriptionTable,
}

/// In-process publish/subscribe relay. Transport adapters drive it through
/// the `on_*` callbacks.
pub struct Relay {
    tables: RwLock<Tables>,
    router: Router,
    available: AtomicBool,
    events: Mutex<EventBus>,
    counters: Counters,
}

impl Relay {
    /// Build a relay around a finished handler table. The broker starts out
    /// unavailable.
    pub fn new(router: Router) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            router,
            available: AtomicBool::new(false),
            events: Mutex::new(EventBus::new()),
            counters: Counters::default(),
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Subscribe to session events.
    pub fn events(&self) -> UnboundedReceiver<SessionEvent> {
        self.events.lock().subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        self.events.lock().publish(event);
    }

    pub fn on_connect(&self, outbound: UnboundedSender<Delivery>) -> ConnectionId {
        let connection = self.tables.write().registry.register(outbound);
        self.emit(SessionEvent::Connected { connection });
        connection
    }

    /// Remove a connection and every subscription it owns. Safe to call more
    /// than once.
    pub fn on_disconnect(&self, connection: ConnectionId) {
        let removed = {
            let mut tables = self.tables.write();
            if tables.registry.remove(connection).is_none() {
                return;
            }
            tables.subscriptions.remove_all_for(connection)
        };
        self.emit(SessionEvent::Disconnected {
            connection,
            subscriptions_removed: removed,
        });
    }

    pub fn is_open(&self, connection: ConnectionId) -> bool {
        self.tables.read().registry.is_open(connection)
    }

    pub fn on_subscribe(
        &self,
        connection: ConnectionId,
        destination: &str,
    ) -> Result<SubscriptionId, RelayError> {
        let (subscription, fresh) = {
            let mut guard = self.tables.write();
            let Tables {
                registry,
                subscriptions,
            } = &mut *guard;
            let before = subscriptions.len();
            let id = subscriptions.subscribe(registry, connection, destination)?;
            (id, subscriptions.len() > before)
        };
        if !fresh {
            return Ok(subscription);
        }
        self.emit(SessionEvent::Subscribed {
            connection,
            subscription,
            destination: destination.to_string(),
        });
        match self.router.on_subscribe(destination) {
            Some(Ok(Some(reply))) => self.deliver_to(connection, subscription, reply),
            Some(Err(err)) => self.report(err, None),
            Some(Ok(None)) | None => {}
        }
        Ok(subscription)
    }

    pub fn on_unsubscribe(&self, subscription: SubscriptionId) {
        let removed = self.tables.write().subscriptions.unsubscribe(subscription);
        if let Some(sub) = removed {
            self.emit(SessionEvent::Unsubscribed {
                connection: sub.connection,
                subscription,
                destination: sub.destination,
            });
        }
    }

    /// Connection that owns a subscription, if it still exists.
    pub fn subscription_owner(&self, subscription: SubscriptionId) -> Option<ConnectionId> {
        self.tables
            .read()
            .subscriptions
            .get(subscription)
            .map(|s| s.connection)
    }

    pub fn subscribers_of(&self, destination: &str) -> HashSet<ConnectionId> {
        self.tables.read().subscriptions.subscribers_of(destination)
    }

    pub fn on_client_message(
        &self,
        connection: ConnectionId,
        destination: &str,
        payload: &str,
    ) -> Result<(), RelayError> {
        self.route(connection, Message::new(destination, payload))
    }

    /// Route a fully populated inbound message from `connection`.
    pub fn route(&self, connection: ConnectionId, message: Message) -> Result<(), RelayError> {
        if !self.tables.read().registry.contains(connection) {
            return Err(RelayError::UnknownConnection(connection));
        }
        Counters::bump(&self.counters.messages_received, 1);
        trace!(%connection, destination = %message.destination, "inbound message");
        match self.router.dispatch(&message) {
            Ok(Dispatch::Reply(out)) | Ok(Dispatch::Relay(out)) => {
                self.fan_out(&out);
            }
            Ok(Dispatch::Handled) => {}
            Err(err) => self.report(err, Some(&message)),
        }
        Ok(())
    }

    /// Send a payload to every subscriber of `destination`, returning the
    /// number of deliveries made.
    pub fn publish(&self, destination: &str, payload: impl Into<String>) -> usize {
        self.fan_out(&Message::new(destination, payload))
    }

    fn fan_out(&self, message: &Message) -> usize {
        let targets: Vec<(UnboundedSender<Delivery>, SubscriptionId)> = {
            let tables = self.tables.read();
            tables
                .subscriptions
                .targets_of(&message.destination)
                .into_iter()
                .filter_map(|(connection, sub)| {
                    tables
                        .registry
                        .get(connection)
                        .map(|c| (c.outbound().clone(), sub))
                })
                .collect()
        };
        if targets.is_empty() {
            debug!(destination = %message.destination, "no subscribers, message discarded");
            return 0;
        }
        let mut delivered = 0;
        for (tx, subscription) in targets {
            let delivery = Delivery {
                subscription,
                message: message.clone(),
            };
            if tx.send(delivery).is_ok() {
                delivered += 1;
            }
        }
        Counters::bump(&self.counters.deliveries, delivered as u64);
        delivered
    }

    fn deliver_to(&self, connection: ConnectionId, subscription: SubscriptionId, message: Message) {
        let tx = self
            .tables
            .read()
            .registry
            .get(connection)
            .map(|c| c.outbound().clone());
        if let Some(tx) = tx {
            if tx.send(Delivery { subscription, message }).is_ok() {
                Counters::bump(&self.counters.deliveries, 1);
            }
        }
    }

    fn report(&self, err: RelayError, inbound: Option<&Message>) {
        match err {
            RelayError::HandlerFailure {
                destination,
                source,
            } => {
                error!(%destination, error = %source, "handler failed");
                Counters::bump(&self.counters.handler_failures, 1);
                let message = self.router.error_message(&source, inbound);
                self.fan_out(&message);
            }
            RelayError::NoMatchingHandler(destination) => {
                debug!(%destination, "no handler bound, message dropped");
                Counters::bump(&self.counters.unmatched_dropped, 1);
            }
            RelayError::UnknownConnection(connection) => {
                warn!(%connection, "message from unknown connection ignored");
            }
        }
    }

    pub fn set_broker_availability(&self, available: bool) {
        let previous = self.available.swap(available, Ordering::SeqCst);
        if previous != available {
            self.emit(SessionEvent::BrokerAvailability { available });
        }
    }

    pub fn is_broker_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub(crate) fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn stats(&self) -> StatsSnapshot {
        let tables = self.tables.read();
        StatsSnapshot::from_counters(
            &self.counters,
            tables.registry.len(),
            tables.subscriptions.len(),
            tables.subscriptions.destinations(),
            self.is_broker_available(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::HandlerError, router::RouterSettings};
    use tokio::sync::mpsc::unbounded_channel;

    fn relay() -> Relay {
        Relay::new(
            Router::builder(RouterSettings::default())
                .message("/app/echo", |m| Ok(Some(m.payload.clone())))
                .message("/app/fail", |_| Err(HandlerError::new("nope")))
                .subscribe("/app/hello", |_| Ok(Some("hello".into())))
                .build(),
        )
    }

    #[test]
    fn disconnect_is_idempotent() {
        let relay = relay();
        let mut events = relay.events();
        let (tx, _rx) = unbounded_channel();
        let id = relay.on_connect(tx);
        relay.on_subscribe(id, "/topic/echo").unwrap();
        relay.on_disconnect(id);
        relay.on_disconnect(id);

        assert!(matches!(events.try_recv(), Ok(SessionEvent::Connected { .. })));
        assert!(matches!(events.try_recv(), Ok(SessionEvent::Subscribed { .. })));
        assert!(matches!(
            events.try_recv(),
            Ok(SessionEvent::Disconnected {
                subscriptions_removed: 1,
                ..
            })
        ));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn send_from_unknown_connection_fails() {
        let relay = relay();
        let (tx, _rx) = unbounded_channel();
        let id = relay.on_connect(tx);
        relay.on_disconnect(id);
        let err = relay.on_client_message(id, "/app/echo", "x").unwrap_err();
        assert!(matches!(err, RelayError::UnknownConnection(c) if c == id));
    }

    #[test]
    fn subscribe_mapping_replies_once_to_subscriber_only() {
        let relay = relay();
        let (tx_a, mut rx_a) = unbounded_channel();
        let (tx_b, mut rx_b) = unbounded_channel();
        let a = relay.on_connect(tx_a);
        let b = relay.on_connect(tx_b);
        relay.on_subscribe(b, "/app/hello").unwrap();
        let sub = relay.on_subscribe(a, "/app/hello").unwrap();
        rx_b.try_recv().unwrap();

        let delivery = rx_a.try_recv().unwrap();
        assert_eq!(delivery.subscription, sub);
        assert_eq!(delivery.message.payload, "hello");
        assert!(rx_b.try_recv().is_err());

        // resubscribing does not replay the one-time message
        relay.on_subscribe(a, "/app/hello").unwrap();
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn counters_track_routing() {
        let relay = relay();
        let (tx, mut rx) = unbounded_channel();
        let id = relay.on_connect(tx);
        relay.on_subscribe(id, "/topic/echo").unwrap();
        relay.on_client_message(id, "/app/echo", "a").unwrap();
        relay.on_client_message(id, "/app/fail", "b").unwrap();
        relay.on_client_message(id, "/app/nowhere", "c").unwrap();
        assert_eq!(rx.try_recv().unwrap().message.payload, "a");

        let stats = relay.stats();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.subscriptions, 1);
        assert_eq!(stats.messages_received, 3);
        assert_eq!(stats.deliveries, 1);
        assert_eq!(stats.handler_failures, 1);
        assert_eq!(stats.unmatched_dropped, 1);
        assert!(!stats.broker_available);
    }

    #[test]
    fn availability_events_only_on_change() {
        let relay = relay();
        let mut events = relay.events();
        relay.set_broker_availability(true);
        relay.set_broker_availability(true);
        relay.set_broker_availability(false);
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::BrokerAvailability { available: true }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::BrokerAvailability { available: false }
        );
        assert!(events.try_recv().is_err());
    }
}
