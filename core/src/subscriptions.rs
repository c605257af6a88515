use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use uuid::Uuid;

use crate::{
    error::RelayError,
    registry::{ConnectionId, ConnectionRegistry},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an id previously handed to a client.
    pub fn parse(text: &str) -> Option<Self> {
        Uuid::parse_str(text).ok().map(Self)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub connection: ConnectionId,
    pub destination: String,
}

/// Maps destinations to subscribed connections, at most one entry per
/// (connection, destination) pair.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    by_id: HashMap<SubscriptionId, Subscription>,
    by_destination: HashMap<String, HashMap<ConnectionId, SubscriptionId>>,
    by_connection: HashMap<ConnectionId, HashSet<SubscriptionId>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a registered connection to a destination. Subscribing again
    /// returns the existing id.
    pub fn subscribe(
        &mut self,
        registry: &ConnectionRegistry,
        connection: ConnectionId,
        destination: &str,
    ) -> Result<SubscriptionId, RelayError> {
        if !registry.contains(connection) {
            return Err(RelayError::UnknownConnection(connection));
        }
        let subscribers = self
            .by_destination
            .entry(destination.to_string())
            .or_default();
        if let Some(existing) = subscribers.get(&connection) {
            return Ok(*existing);
        }
        let id = SubscriptionId::new();
        subscribers.insert(connection, id);
        self.by_connection.entry(connection).or_default().insert(id);
        self.by_id.insert(
            id,
            Subscription {
                id,
                connection,
                destination: destination.to_string(),
            },
        );
        Ok(id)
    }

    /// Remove a subscription. Unknown ids are ignored.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> Option<Subscription> {
        let sub = self.by_id.remove(&id)?;
        if let Some(subscribers) = self.by_destination.get_mut(&sub.destination) {
            subscribers.remove(&sub.connection);
            if subscribers.is_empty() {
                self.by_destination.remove(&sub.destination);
            }
        }
        if let Some(owned) = self.by_connection.get_mut(&sub.connection) {
            owned.remove(&id);
            if owned.is_empty() {
                self.by_connection.remove(&sub.connection);
            }
        }
        Some(sub)
    }

    pub fn subscribers_of(&self, destination: &str) -> HashSet<ConnectionId> {
        self.by_destination
            .get(destination)
            .map(|subs| subs.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Subscribers of a destination together with the id each one
    /// subscribed under.
    pub fn targets_of(&self, destination: &str) -> Vec<(ConnectionId, SubscriptionId)> {
        self.by_destination
            .get(destination)
            .map(|subs| subs.iter().map(|(c, s)| (*c, *s)).collect())
            .unwrap_or_default()
    }

    /// Drop every subscription owned by a connection, returning how many
    /// were removed.
    pub fn remove_all_for(&mut self, connection: ConnectionId) -> usize {
        let Some(owned) = self.by_connection.remove(&connection) else {
            return 0;
        };
        let removed = owned.len();
        for id in owned {
            if let Some(sub) = self.by_id.remove(&id) {
                if let Some(subscribers) = self.by_destination.get_mut(&sub.destination) {
                    subscribers.remove(&connection);
                    if subscribers.is_empty() {
                        self.by_destination.remove(&sub.destination);
                    }
                }
            }
        }
        removed
    }

    pub fn get(&self, id: SubscriptionId) -> Option<&Subscription> {
        self.by_id.get(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Number of destinations with at least one subscriber.
    pub fn destinations(&self) -> usize {
        self.by_destination.len()
    }
}
