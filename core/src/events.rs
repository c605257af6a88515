use tokio::{
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tracing::info;

use crate::{registry::ConnectionId, subscriptions::SubscriptionId};

/// Lifecycle notifications emitted by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected {
        connection: ConnectionId,
    },
    Disconnected {
        connection: ConnectionId,
        subscriptions_removed: usize,
    },
    Subscribed {
        connection: ConnectionId,
        subscription: SubscriptionId,
        destination: String,
    },
    Unsubscribed {
        connection: ConnectionId,
        subscription: SubscriptionId,
        destination: String,
    },
    BrokerAvailability {
        available: bool,
    },
}

/// Small fan-out queue for session events. Listeners that dropped their
/// receiver are pruned on the next publish.
pub struct EventBus {
    listeners: Vec<UnboundedSender<SessionEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Register a listener, returning the receiving end.
    pub fn subscribe(&mut self) -> UnboundedReceiver<SessionEvent> {
        let (tx, rx) = unbounded_channel();
        self.listeners.push(tx);
        rx
    }

    pub fn publish(&mut self, event: SessionEvent) {
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn listeners(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Dispatcher loop logging every session event until the relay goes away.
pub fn spawn_event_logger(mut events: UnboundedReceiver<SessionEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Connected { connection } => {
                    info!(%connection, "session connected")
                }
                SessionEvent::Disconnected {
                    connection,
                    subscriptions_removed,
                } => info!(%connection, subscriptions_removed, "session disconnected"),
                SessionEvent::Subscribed {
                    connection,
                    subscription,
                    destination,
                } => info!(%connection, %subscription, %destination, "session subscribed"),
                SessionEvent::Unsubscribed {
                    connection,
                    subscription,
                    destination,
                } => info!(%connection, %subscription, %destination, "session unsubscribed"),
                SessionEvent::BrokerAvailability { available } => {
                    info!(available, "broker availability changed")
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_listeners_are_pruned() {
        let mut bus = EventBus::new();
        let mut keep = bus.subscribe();
        let gone = bus.subscribe();
        drop(gone);

        bus.publish(SessionEvent::BrokerAvailability { available: true });
        assert_eq!(bus.listeners(), 1);
        assert_eq!(
            keep.try_recv().unwrap(),
            SessionEvent::BrokerAvailability { available: true }
        );
    }
}
