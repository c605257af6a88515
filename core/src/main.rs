use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use topicrelay::{
    cli::{Cli, Command},
    config::Config,
    events::spawn_event_logger,
    handlers::demo_relay,
    router::BindingKind,
    services::{broadcast::spawn_broadcaster, log},
    transport::{tcp, ws},
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli)?;
    log::init(config.logging_enabled);
    let relay = demo_relay(config.relay.clone());

    if cli.command == Some(Command::Bindings) {
        let router = relay.router();
        for binding in router.bindings() {
            let reply = match (binding.kind, &binding.reply_to) {
                (BindingKind::Subscribe, _) => "(subscriber only)".to_string(),
                (BindingKind::Message, Some(to)) => to.clone(),
                (BindingKind::Message, None) => router.implicit_destination(&binding.destination),
            };
            println!(
                "{:<10} {:<40} {}",
                format!("{:?}", binding.kind),
                binding.destination,
                reply
            );
        }
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let events = spawn_event_logger(relay.events());
    let broadcasters: Vec<_> = config
        .broadcasts
        .iter()
        .map(|b| spawn_broadcaster(relay.clone(), b.params(), b.source.source(), shutdown.clone()))
        .collect();

    let tcp_listener = tokio::net::TcpListener::bind(config.tcp_bind)
        .await
        .with_context(|| format!("binding tcp transport to {}", config.tcp_bind))?;
    let ws_listener = std::net::TcpListener::bind(config.ws_bind)
        .with_context(|| format!("binding websocket gateway to {}", config.ws_bind))?;
    ws_listener.set_nonblocking(true)?;
    let tcp_task = tokio::spawn(tcp::serve(tcp_listener, relay.clone(), shutdown.clone()));
    let ws_task = tokio::spawn(ws::serve(ws_listener, relay.clone(), shutdown.clone()));

    relay.set_broker_availability(true);
    info!("relay running - press Ctrl+C to exit");
    tokio::signal::ctrl_c().await?;

    relay.set_broker_availability(false);
    shutdown.cancel();
    for task in broadcasters {
        let _ = task.await;
    }
    for (name, task) in [("tcp", tcp_task), ("ws", ws_task)] {
        if let Ok(Err(err)) = task.await {
            warn!("{name} transport failed: {err:#}");
        }
    }
    events.abort();
    Ok(())
}
