use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;
use serde_json::json;
use time::{macros::format_description, OffsetDateTime};
use tokio::{
    task::JoinHandle,
    time::{interval, Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::{relay::Relay, stats::Counters};

/// Produces the payload of a periodic broadcast.
pub trait PayloadSource: Send + Sync + 'static {
    fn generate(&self, relay: &Relay) -> Result<String>;
}

/// Human readable wall-clock message.
pub struct ClockSource;

impl PayloadSource for ClockSource {
    fn generate(&self, _relay: &Relay) -> Result<String> {
        let now = OffsetDateTime::now_utc()
            .format(format_description!("[hour]:[minute]:[second]"))?;
        Ok(format!("server periodic message {now} via the broker"))
    }
}

/// JSON snapshot of the relay's own metrics.
pub struct PerformanceSource;

impl PayloadSource for PerformanceSource {
    fn generate(&self, relay: &Relay) -> Result<String> {
        let now = OffsetDateTime::now_utc();
        let body = json!({
            "timestamp_ms": (now.unix_timestamp_nanos() / 1_000_000) as i64,
            "metrics": relay.stats(),
        });
        Ok(serde_json::to_string(&body)?)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Clock,
    Performance,
}

impl SourceKind {
    pub fn source(self) -> Arc<dyn PayloadSource> {
        match self {
            SourceKind::Clock => Arc::new(ClockSource),
            SourceKind::Performance => Arc::new(PerformanceSource),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BroadcastParams {
    pub destination: String,
    pub interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Broker unavailable, nothing sent.
    Skipped,
    /// Payload fanned out to this many subscribers.
    Delivered(usize),
    /// The payload source failed; the tick is dropped.
    Failed,
}

/// Run a single broadcast tick.
pub fn tick(relay: &Relay, destination: &str, source: &dyn PayloadSource) -> TickOutcome {
    if !relay.is_broker_available() {
        Counters::bump(&relay.counters().broadcasts_skipped, 1);
        trace!(%destination, "broker unavailable, tick skipped");
        return TickOutcome::Skipped;
    }
    match source.generate(relay) {
        Ok(payload) => {
            Counters::bump(&relay.counters().broadcasts_sent, 1);
            TickOutcome::Delivered(relay.publish(destination, payload))
        }
        Err(err) => {
            warn!(%destination, "broadcast payload failed: {err:#}");
            TickOutcome::Failed
        }
    }
}

/// Spawn a repeating broadcast that stops when `shutdown` is cancelled.
/// Ticks missed while the task was busy are skipped, never replayed.
pub fn spawn_broadcaster(
    relay: Arc<Relay>,
    params: BroadcastParams,
    source: Arc<dyn PayloadSource>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let BroadcastParams {
        destination,
        interval: period,
    } = params;
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    tick(&relay, &destination, source.as_ref());
                }
            }
        }
    })
}
