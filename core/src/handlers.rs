//! Demo handler table served under the application prefix.

use std::sync::{Arc, Weak};

use tracing::info;

use crate::{
    error::HandlerError,
    relay::Relay,
    router::{Message, Router, RouterSettings},
    stats::StatsSnapshot,
};

pub const RESPONSES: &str = "/queue/responses";
pub const PERFORMANCE_REPLIES: &str = "/queue/performance";

/// Escape the characters HTML treats specially so echoed payloads render
/// as text in browser clients.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn respond(message: &Message) -> String {
    format!("response to {}", escape_html(&message.payload))
}

/// Build the router with every demo binding. Performance requests are
/// answered with `snapshot`, which the caller wires to the live relay.
pub fn demo_router<F>(settings: RouterSettings, snapshot: F) -> Router
where
    F: Fn() -> Option<StatsSnapshot> + Send + Sync + 'static,
{
    let app = settings.application_prefix.clone();
    Router::builder(settings)
        .message(&format!("{app}/request-without-response"), |m| {
            info!(payload = %m.payload, "message without response");
            Ok(None)
        })
        .message(&format!("{app}/request-with-implicit-response"), |m| {
            info!(payload = %m.payload, "message with implicit response");
            Ok(Some(respond(m)))
        })
        .message_to(&format!("{app}/request"), RESPONSES, |m| {
            info!(payload = %m.payload, "message with explicit response");
            if m.payload == "zero" {
                return Err(HandlerError::new(format!("'{}' is rejected", m.payload)));
            }
            Ok(Some(respond(m)))
        })
        .message_to(&format!("{app}/performance"), PERFORMANCE_REPLIES, move |_| {
            let stats = snapshot().ok_or_else(|| HandlerError::new("relay is shutting down"))?;
            serde_json::to_string(&stats)
                .map(Some)
                .map_err(|e| HandlerError::new(e.to_string()))
        })
        .subscribe(&format!("{app}/subscribe"), |_| {
            info!("subscription via the application");
            Ok(Some("server one-time message via the application".into()))
        })
        .subscribe(&format!("{app}/names"), |_| {
            serde_json::to_string(&StatsSnapshot::METRIC_NAMES)
                .map(Some)
                .map_err(|e| HandlerError::new(e.to_string()))
        })
        .build()
}

/// Relay serving the demo handlers, with performance requests answered
/// from its own stats.
pub fn demo_relay(settings: RouterSettings) -> Arc<Relay> {
    Arc::new_cyclic(|weak: &Weak<Relay>| {
        let weak = weak.clone();
        Relay::new(demo_router(settings, move || {
            weak.upgrade().map(|relay| relay.stats())
        }))
    })
}
