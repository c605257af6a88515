use std::{fs, net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;

use crate::{
    cli::Cli,
    router::RouterSettings,
    services::broadcast::{BroadcastParams, SourceKind},
};

/// A periodic broadcast to run while the broker is available.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct BroadcastConfig {
    pub destination: String,
    pub interval_ms: u64,
    pub source: SourceKind,
}

impl BroadcastConfig {
    pub fn params(&self) -> BroadcastParams {
        BroadcastParams {
            destination: self.destination.clone(),
            interval: Duration::from_millis(self.interval_ms),
        }
    }
}

/// Runtime configuration resolved from file, env and CLI.
#[derive(Clone, Debug)]
pub struct Config {
    /// Address of the line-delimited JSON transport.
    pub tcp_bind: SocketAddr,
    /// Address of the WebSocket gateway and status endpoint.
    pub ws_bind: SocketAddr,
    pub logging_enabled: bool,
    pub relay: RouterSettings,
    pub broadcasts: Vec<BroadcastConfig>,
}

#[derive(Deserialize)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    logging: FileLogging,
    #[serde(default)]
    relay: RouterSettings,
    #[serde(default = "default_broadcasts")]
    broadcast: Vec<BroadcastConfig>,
}

#[derive(Deserialize, Default)]
struct FileServer {
    tcp_bind: Option<String>,
    ws_bind: Option<String>,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

fn default_tcp_bind() -> String {
    "127.0.0.1:61613".into()
}

fn default_ws_bind() -> String {
    "127.0.0.1:8080".into()
}

fn default_logging() -> bool {
    true
}

fn default_broadcasts() -> Vec<BroadcastConfig> {
    vec![
        BroadcastConfig {
            destination: "/topic/periodic".into(),
            interval_ms: 10_000,
            source: SourceKind::Clock,
        },
        BroadcastConfig {
            destination: "/topic/performance".into(),
            interval_ms: 5_000,
            source: SourceKind::Performance,
        },
    ]
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_logging(),
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            server: FileServer::default(),
            logging: FileLogging::default(),
            relay: RouterSettings::default(),
            broadcast: default_broadcasts(),
        }
    }
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        // config file path precedence: CLI -> ENV -> per-user config dir
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("TOPICRELAY_CONFIG").ok().map(PathBuf::from))
            .or_else(default_config_path);

        let file_cfg = match config_path.map(fs::read) {
            Some(Ok(bytes)) => {
                let contents = String::from_utf8_lossy(&bytes);
                toml::from_str(&contents).context("invalid config file")?
            }
            _ => FileConfig::default(),
        };

        let mut tcp_bind = file_cfg.server.tcp_bind.unwrap_or_else(default_tcp_bind);
        let mut ws_bind = file_cfg.server.ws_bind.unwrap_or_else(default_ws_bind);
        let mut logging = file_cfg.logging.enabled;

        // environment overrides
        if let Ok(b) = std::env::var("TOPICRELAY_TCP_BIND") {
            tcp_bind = b;
        }
        if let Ok(b) = std::env::var("TOPICRELAY_WS_BIND") {
            ws_bind = b;
        }
        if let Ok(l) = std::env::var("TOPICRELAY_LOGGING") {
            if let Ok(l) = l.parse::<bool>() {
                logging = l;
            }
        }

        // CLI overrides
        if let Some(b) = &cli.tcp_bind {
            tcp_bind = b.clone();
        }
        if let Some(b) = &cli.ws_bind {
            ws_bind = b.clone();
        }
        if let Some(l) = cli.logging {
            logging = l;
        }

        let config = Self {
            tcp_bind: tcp_bind
                .parse()
                .with_context(|| format!("invalid tcp bind address {tcp_bind}"))?,
            ws_bind: ws_bind
                .parse()
                .with_context(|| format!("invalid ws bind address {ws_bind}"))?,
            logging_enabled: logging,
            relay: file_cfg.relay,
            broadcasts: file_cfg.broadcast,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let relay = &self.relay;
        let mut destinations = vec![
            &relay.application_prefix,
            &relay.implicit_prefix,
            &relay.error_destination,
        ];
        destinations.extend(relay.broker_prefixes.iter());
        destinations.extend(self.broadcasts.iter().map(|b| &b.destination));
        if let Some(bad) = destinations.iter().find(|d| !d.starts_with('/')) {
            anyhow::bail!("destination {bad:?} must start with '/'");
        }
        let app_root = format!("{}/", relay.application_prefix.trim_end_matches('/'));
        if let Some(broker) = relay
            .broker_prefixes
            .iter()
            .find(|p| app_root.starts_with(p.as_str()))
        {
            anyhow::bail!(
                "application prefix {:?} is shadowed by broker prefix {broker:?}",
                relay.application_prefix
            );
        }
        if let Some(bad) = self.broadcasts.iter().find(|b| b.interval_ms == 0) {
            anyhow::bail!("broadcast to {} needs a non-zero interval", bad.destination);
        }
        Ok(())
    }
}

/// `relay.toml` in the per-user configuration directory, if one exists.
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "topicrelay", "topicrelay").map(|p| p.config_dir().join("relay.toml"))
}
