pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod ipc;
pub mod registry;
pub mod relay;
pub mod router;
pub mod services;
pub mod stats;
pub mod subscriptions;
pub mod transport;

pub use error::{HandlerError, RelayError};
pub use registry::ConnectionId;
pub use relay::Relay;
pub use router::{Delivery, Message, Router, RouterSettings};
pub use subscriptions::SubscriptionId;
