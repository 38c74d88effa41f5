use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use warden_core::{LogStore, TelemetryUpdate};
use warden_engine::activity::ActivityConfig;
use warden_engine::{BridgeConfig, BridgeConnector, ControllerConfig, ReconnectController, VisionLog};
use warden_server::ServerConfig;
use warden_settings::{LoadedSettings, WardenSettings};
use warden_telemetry::{FileLogStore, TelemetryConfig};

const TELEMETRY_CHANNEL: usize = 1024;

/// Keeps one game session alive and streams its telemetry to viewers.
#[derive(Debug, Parser)]
#[command(name = "warden", version)]
struct Args {
    /// Settings file (defaults to ~/.warden/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Viewer server bind address.
    #[arg(long)]
    host: Option<String>,
    /// Viewer server port.
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    bridge_host: Option<String>,
    #[arg(long)]
    bridge_port: Option<u16>,
    /// Display-name prefix for generated identities.
    #[arg(long)]
    identity_prefix: Option<String>,
    /// Fixed RNG seed for reproducible identities and movement.
    #[arg(long)]
    seed: Option<u64>,
    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn apply(&self, settings: &mut WardenSettings) {
        if let Some(host) = &self.host {
            settings.server.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(host) = &self.bridge_host {
            settings.bridge.host = host.clone();
        }
        if let Some(port) = self.bridge_port {
            settings.bridge.port = port;
        }
        if let Some(prefix) = &self.identity_prefix {
            settings.session.identity_prefix = prefix.clone();
        }
        if self.seed.is_some() {
            settings.session.seed = self.seed;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level = level.clone();
        }
    }
}

fn controller_config(settings: &WardenSettings) -> ControllerConfig {
    let s = &settings.session;
    ControllerConfig {
        identity_prefix: s.identity_prefix.clone(),
        reconnect_delay: Duration::from_millis(s.reconnect_delay_ms),
        connect_timeout: Duration::from_millis(s.connect_timeout_ms),
        sample_period: Duration::from_millis(s.sample_period_ms),
        activity: ActivityConfig {
            period: Duration::from_millis(s.activity_period_ms),
            release_after: Duration::from_millis(s.activity_release_ms),
            jump_probability: s.jump_probability,
        },
        seed: s.seed,
    }
}

fn bridge_config(settings: &WardenSettings) -> BridgeConfig {
    BridgeConfig {
        host: settings.bridge.host.clone(),
        port: settings.bridge.port,
        protocol_version: settings.bridge.protocol_version.clone(),
        ..Default::default()
    }
}

fn server_config(settings: &WardenSettings) -> ServerConfig {
    ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
        max_send_queue: settings.server.max_send_queue,
        heartbeat_interval: Duration::from_millis(settings.server.heartbeat_interval_ms),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let LoadedSettings {
        mut settings,
        warnings,
    } = match &args.config {
        Some(path) => warden_settings::load_settings_from_path(path),
        None => warden_settings::load_settings(),
    }
    .context("failed to load settings")?;
    args.apply(&mut settings);
    settings.validate().context("invalid settings")?;

    let telemetry = warden_telemetry::init_telemetry(TelemetryConfig {
        log_level: TelemetryConfig::level_from_str(&settings.logging.level),
        module_levels: Vec::new(),
        log_to_sqlite: settings.logging.log_to_sqlite,
        log_db_path: warden_settings::resolve_path(&settings.logging.log_db_path),
    });

    for w in &warnings {
        tracing::warn!(key = %w.key, value = %w.value, reason = %w.reason, "invalid env var, ignoring");
    }
    tracing::info!("starting warden");

    let (telemetry_tx, _) = broadcast::channel::<TelemetryUpdate>(TELEMETRY_CHANNEL);

    let mut vision = VisionLog::new(telemetry_tx.clone());
    let vision_path = warden_settings::resolve_path(&settings.logging.vision_log_path);
    match FileLogStore::open(&vision_path) {
        Ok(store) => {
            tracing::info!(path = %vision_path.display(), "vision log opened");
            let store: Arc<dyn LogStore> = Arc::new(store);
            vision = vision.with_store(store);
        }
        Err(e) => {
            tracing::warn!(path = %vision_path.display(), error = %e, "vision log unavailable, continuing without it");
        }
    }

    let connector = Arc::new(BridgeConnector::new(bridge_config(&settings)));
    let controller = ReconnectController::new(
        controller_config(&settings),
        connector,
        vision,
        telemetry_tx.clone(),
    )
    .context("invalid controller config")?;

    let shutdown = CancellationToken::new();
    let server = warden_server::start(
        server_config(&settings),
        &telemetry_tx,
        controller.handle(),
        shutdown.clone(),
    )
    .await
    .context("failed to start viewer server")?;

    tracing::info!(port = server.port, "warden ready");

    let controller_task = tokio::spawn(controller.run(shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    shutdown.cancel();
    let _ = controller_task.await;
    server.join().await;

    if let Some(logs) = telemetry.logs() {
        match logs.count() {
            Ok(n) => tracing::info!(persisted = n, "log database closed"),
            Err(e) => tracing::warn!(error = %e, "could not read log database"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_settings() {
        let args = Args::parse_from(["warden", "--port", "4000", "--bridge-host", "10.0.0.2", "--seed", "7"]);
        let mut settings = WardenSettings::default();
        args.apply(&mut settings);
        assert_eq!(settings.server.port, 4000);
        assert_eq!(settings.bridge.host, "10.0.0.2");
        assert_eq!(settings.session.seed, Some(7));
        assert_eq!(settings.bridge.port, 25570);
    }

    #[test]
    fn default_settings_map_to_valid_controller_config() {
        let config = controller_config(&WardenSettings::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.connect_timeout, Duration::from_secs(15));
        assert_eq!(config.reconnect_delay, Duration::from_secs(10));
        assert_eq!(config.activity.period, Duration::from_secs(8));
    }
}
