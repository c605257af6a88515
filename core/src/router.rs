use std::{fmt, sync::Arc};

use serde::Deserialize;
use tracing::warn;

use crate::{
    error::{HandlerError, RelayError},
    subscriptions::SubscriptionId,
};

/// A message in flight. Only exists while it is being routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub destination: String,
    pub payload: String,
    pub reply_to: Option<String>,
    pub correlation: Option<String>,
}

impl Message {
    pub fn new(destination: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            payload: payload.into(),
            reply_to: None,
            correlation: None,
        }
    }

    /// Build a message on another destination that keeps this message's
    /// correlation data.
    pub(crate) fn follow_up(
        &self,
        destination: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            destination: destination.into(),
            payload: payload.into(),
            reply_to: None,
            correlation: self.correlation.clone(),
        }
    }
}

/// What a single connection receives, tagged with the subscription it
/// matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub subscription: SubscriptionId,
    pub message: Message,
}

pub type Handler = Arc<dyn Fn(&Message) -> Result<Option<String>, HandlerError> + Send + Sync>;

/// Destination conventions used when routing.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RouterSettings {
    /// Prefix of destinations served by handlers.
    pub application_prefix: String,
    /// Prefixes relayed straight to subscribers without a handler.
    pub broker_prefixes: Vec<String>,
    /// Prefix an implicit reply destination is built from.
    pub implicit_prefix: String,
    /// Where handler failures are reported.
    pub error_destination: String,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            application_prefix: "/app".into(),
            broker_prefixes: vec!["/topic/".into(), "/queue/".into()],
            implicit_prefix: "/topic".into(),
            error_destination: "/queue/errors".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// Invoked for every message sent to the destination.
    Message,
    /// Invoked once per subscription; the result goes back to the
    /// subscriber only.
    Subscribe,
}

pub struct HandlerBinding {
    pub kind: BindingKind,
    pub destination: String,
    pub reply_to: Option<String>,
    handler: Handler,
}

impl fmt::Debug for HandlerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerBinding")
            .field("kind", &self.kind)
            .field("destination", &self.destination)
            .field("reply_to", &self.reply_to)
            .finish_non_exhaustive()
    }
}

/// Outcome of dispatching one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Handler produced a value to fan out.
    Reply(Message),
    /// Handler ran and had nothing to say.
    Handled,
    /// Broker destination, fan out unchanged.
    Relay(Message),
}

/// Collects bindings before the relay starts taking traffic.
pub struct RouterBuilder {
    settings: RouterSettings,
    bindings: Vec<HandlerBinding>,
}

impl RouterBuilder {
    pub fn new(settings: RouterSettings) -> Self {
        Self {
            settings,
            bindings: Vec::new(),
        }
    }

    fn bind<F>(mut self, kind: BindingKind, destination: &str, reply_to: Option<&str>, f: F) -> Self
    where
        F: Fn(&Message) -> Result<Option<String>, HandlerError> + Send + Sync + 'static,
    {
        self.bindings.push(HandlerBinding {
            kind,
            destination: destination.to_string(),
            reply_to: reply_to.map(str::to_string),
            handler: Arc::new(f),
        });
        self
    }

    /// Bind a handler whose result goes to the implicit reply destination.
    pub fn message<F>(self, destination: &str, f: F) -> Self
    where
        F: Fn(&Message) -> Result<Option<String>, HandlerError> + Send + Sync + 'static,
    {
        self.bind(BindingKind::Message, destination, None, f)
    }

    /// Bind a handler whose result goes to an explicit destination.
    pub fn message_to<F>(self, destination: &str, reply_to: &str, f: F) -> Self
    where
        F: Fn(&Message) -> Result<Option<String>, HandlerError> + Send + Sync + 'static,
    {
        self.bind(BindingKind::Message, destination, Some(reply_to), f)
    }

    pub fn subscribe<F>(self, destination: &str, f: F) -> Self
    where
        F: Fn(&Message) -> Result<Option<String>, HandlerError> + Send + Sync + 'static,
    {
        self.bind(BindingKind::Subscribe, destination, None, f)
    }

    /// Finish the table. Message handlers bound under a broker prefix are
    /// kept but never run, because broker destinations are relayed before any
    /// lookup. Each one is reported with a warning.
    pub fn build(self) -> Router {
        let router = Router {
            settings: self.settings,
            bindings: self.bindings,
        };
        for binding in router.shadowed_bindings() {
            warn!(
                destination = %binding.destination,
                "handler bound under a broker prefix will never run"
            );
        }
        router
    }
}

/// Immutable table of handler bindings.
#[derive(Debug)]
pub struct Router {
    settings: RouterSettings,
    bindings: Vec<HandlerBinding>,
}

impl Router {
    pub fn builder(settings: RouterSettings) -> RouterBuilder {
        RouterBuilder::new(settings)
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    pub fn bindings(&self) -> &[HandlerBinding] {
        &self.bindings
    }

    /// First binding of the given kind registered for `destination`.
    fn find(&self, kind: BindingKind, destination: &str) -> Option<&HandlerBinding> {
        self.bindings
            .iter()
            .find(|b| b.kind == kind && b.destination == destination)
    }

    /// Message bindings that broker pass-through makes unreachable.
    pub fn shadowed_bindings(&self) -> impl Iterator<Item = &HandlerBinding> {
        self.bindings.iter().filter(|b| {
            b.kind == BindingKind::Message && self.is_broker_destination(&b.destination)
        })
    }

    pub fn is_broker_destination(&self, destination: &str) -> bool {
        self.settings
            .broker_prefixes
            .iter()
            .any(|p| destination.starts_with(p.as_str()))
    }

    /// Reply destination for a handler bound without an explicit one:
    /// `/app/x` becomes `/topic/x`.
    pub fn implicit_destination(&self, request: &str) -> String {
        let rest = request
            .strip_prefix(self.settings.application_prefix.as_str())
            .filter(|rest| rest.starts_with('/'))
            .unwrap_or(request);
        format!("{}{}", self.settings.implicit_prefix, rest)
    }

    /// Route an inbound message through the handler table.
    pub fn dispatch(&self, inbound: &Message) -> Result<Dispatch, RelayError> {
        if self.is_broker_destination(&inbound.destination) {
            return Ok(Dispatch::Relay(inbound.clone()));
        }
        let binding = self
            .find(BindingKind::Message, &inbound.destination)
            .ok_or_else(|| RelayError::NoMatchingHandler(inbound.destination.clone()))?;
        let value = (binding.handler)(inbound).map_err(|source| RelayError::HandlerFailure {
            destination: inbound.destination.clone(),
            source,
        })?;
        let Some(value) = value else {
            return Ok(Dispatch::Handled);
        };
        let target = binding
            .reply_to
            .clone()
            .unwrap_or_else(|| self.implicit_destination(&inbound.destination));
        Ok(Dispatch::Reply(inbound.follow_up(target, value)))
    }

    /// Run the subscribe handler bound to `destination`, if any. The reply
    /// is addressed to the subscribed destination itself.
    pub fn on_subscribe(&self, destination: &str) -> Option<Result<Option<Message>, RelayError>> {
        let binding = self.find(BindingKind::Subscribe, destination)?;
        let request = Message::new(destination, "");
        Some(
            (binding.handler)(&request)
                .map(|value| value.map(|v| request.follow_up(destination, v)))
                .map_err(|source| RelayError::HandlerFailure {
                    destination: destination.to_string(),
                    source,
                }),
        )
    }

    /// Message reporting a handler failure on the error destination.
    pub fn error_message(&self, error: &HandlerError, inbound: Option<&Message>) -> Message {
        let payload = format!("server exception: {error}");
        match inbound {
            Some(inbound) => inbound.follow_up(self.settings.error_destination.clone(), payload),
            None => Message::new(self.settings.error_destination.clone(), payload),
        }
    }
}
