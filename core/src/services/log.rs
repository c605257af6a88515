use relay_api::Frame;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. `RUST_LOG` takes precedence over the
/// configured default.
pub fn init(logging_enabled: bool) {
    let default = if logging_enabled { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[derive(Debug, Clone, Copy)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Trace a frame crossing a transport boundary.
pub fn frame(direction: Direction, transport: &str, frame: &Frame) {
    match direction {
        Direction::Inbound => debug!(transport, ?frame, "frame received"),
        Direction::Outbound => debug!(transport, ?frame, "frame sent"),
    }
}
