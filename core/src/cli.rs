use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command line interface for the topic relay.
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Override the line-delimited JSON transport address (host:port).
    #[arg(long)]
    pub tcp_bind: Option<String>,
    /// Override the WebSocket gateway address (host:port).
    #[arg(long)]
    pub ws_bind: Option<String>,
    /// Enable or disable logging (true/false).
    #[arg(long)]
    pub logging: Option<bool>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the relay (default).
    Run,
    /// Print the handler bindings and exit.
    Bindings,
}
