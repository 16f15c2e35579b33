//! # gymcast
//!
//! Server binary: loads settings, starts the HTTP/WebSocket listener, and
//! shuts down gracefully on SIGINT or SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use gymcast_server::config::ServerConfig;
use gymcast_server::server::GymcastServer;
use gymcast_settings::GymcastSettings;

/// Real-time gym activity broadcaster.
#[derive(Parser, Debug)]
#[command(name = "gymcast", about = "Real-time gym activity broadcaster")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to a JSON settings file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level filter, e.g. `info` or `gymcast_server=debug` (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Overlay CLI flags on loaded settings.
    fn apply(&self, settings: &mut GymcastSettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            _ = sigint.recv() => tracing::info!("received SIGINT"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for ctrl-c")?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let (mut settings, load_error) = match gymcast_settings::load_settings(args.config.as_deref()) {
        Ok(settings) => (settings, None),
        Err(e) => (GymcastSettings::default(), Some(e)),
    };
    args.apply(&mut settings);

    gymcast_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);
    if let Some(e) = load_error {
        tracing::warn!(error = %e, "failed to load settings, using defaults");
    }

    let config = ServerConfig::from(&settings);
    let mut server = GymcastServer::new(config);
    match gymcast_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => tracing::warn!(error = %e, "metrics recorder unavailable"),
    }

    let addr = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        environment = %settings.server.environment,
        frontend = %settings.server.frontend_url,
        "gymcast listening on http://{addr}"
    );

    wait_for_signal().await?;

    tracing::info!("Shutting down...");
    server.shutdown().graceful_shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_are_none() {
        let cli = Cli::parse_from(["gymcast"]);
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert!(cli.config.is_none());
        assert!(cli.log_level.is_none());
    }

    #[test]
    fn cli_custom_port() {
        let cli = Cli::parse_from(["gymcast", "--port", "8080"]);
        assert_eq!(cli.port, Some(8080));
    }

    #[test]
    fn cli_config_path() {
        let cli = Cli::parse_from(["gymcast", "--config", "/tmp/gymcast.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/gymcast.json")));
    }

    #[test]
    fn cli_rejects_invalid_port() {
        assert!(Cli::try_parse_from(["gymcast", "--port", "99999"]).is_err());
    }

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli::parse_from([
            "gymcast",
            "--host",
            "127.0.0.1",
            "--port",
            "6000",
            "--log-level",
            "debug",
        ]);
        let mut settings = GymcastSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 6000);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn absent_flags_keep_settings() {
        let cli = Cli::parse_from(["gymcast"]);
        let mut settings = GymcastSettings::default();
        settings.server.port = 7000;
        cli.apply(&mut settings);
        assert_eq!(settings.server.port, 7000);
        assert_eq!(settings.server.host, "0.0.0.0");
    }

    #[test]
    fn config_file_feeds_server_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 5050, "frontendUrl": "https://gym.example"}}"#,
        )
        .unwrap();

        let settings =
            gymcast_settings::loader::load_settings_with_env(&path, |_| None).unwrap();
        let config = ServerConfig::from(&settings);
        assert_eq!(config.port, 5050);
        assert_eq!(config.frontend_url, "https://gym.example");
        assert_eq!(config.host, "0.0.0.0");
    }
}
