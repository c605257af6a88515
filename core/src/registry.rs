use std::{collections::HashMap, fmt};

use time::OffsetDateTime;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::router::Delivery;

/// Identifier handed out for every accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A live client connection and the channel its deliveries are pushed to.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub created_at: OffsetDateTime,
    outbound: UnboundedSender<Delivery>,
}

impl Connection {
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    pub(crate) fn outbound(&self) -> &UnboundedSender<Delivery> {
        &self.outbound
    }
}

/// Tracks live connections. Not synchronised on its own; the relay keeps it
/// behind the same lock as the subscription table.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, returning its freshly minted id.
    pub fn register(&mut self, outbound: UnboundedSender<Delivery>) -> ConnectionId {
        let id = ConnectionId::new();
        self.connections.insert(
            id,
            Connection {
                id,
                created_at: OffsetDateTime::now_utc(),
                outbound,
            },
        );
        id
    }

    /// Remove a connection. Removing an unknown id is a no-op.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// A connection is open while it is registered and its peer still
    /// listens on the outbound channel.
    pub fn is_open(&self, id: ConnectionId) -> bool {
        self.connections.get(&id).is_some_and(Connection::is_open)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn register_and_remove() {
        let mut registry = ConnectionRegistry::new();
        let (tx, _rx) = unbounded_channel();
        let id = registry.register(tx);
        assert!(registry.is_open(id));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(id).is_some());
        assert!(!registry.is_open(id));
        // second removal is a no-op
        assert!(registry.remove(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn dropped_receiver_closes_connection() {
        let mut registry = ConnectionRegistry::new();
        let (tx, rx) = unbounded_channel();
        let id = registry.register(tx);
        drop(rx);
        assert!(registry.contains(id));
        assert!(!registry.is_open(id));
    }

    #[test]
    fn ids_are_unique() {
        let mut registry = ConnectionRegistry::new();
        let a = registry.register(unbounded_channel().0);
        let b = registry.register(unbounded_channel().0);
        assert_ne!(a, b);
    }
}
