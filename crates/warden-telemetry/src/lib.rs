mod logging;
mod vision_file;

pub use logging::{LogQuery, LogRecord, SqliteLogLayer, SqliteLogSink};
pub use vision_file::FileLogStore;

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "warden_engine" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Whether to persist warn+ logs to SQLite.
    pub log_to_sqlite: bool,
    /// Path to the log database.
    pub log_db_path: PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            log_to_sqlite: true,
            log_db_path: std::env::temp_dir().join("warden-logs.db"),
        }
    }
}

impl TelemetryConfig {
    /// Parse a level name ("info", "DEBUG", ...), falling back to INFO.
    pub fn level_from_str(level: &str) -> Level {
        Level::from_str(level).unwrap_or(Level::INFO)
    }

    fn filter_directive(&self) -> String {
        let mut filter_str = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter_str
    }
}

/// Keeps the SQLite sink reachable for queries after init.
pub struct TelemetryGuard {
    log_sink: Option<Arc<SqliteLogSink>>,
}

impl TelemetryGuard {
    /// Access the log sink for querying persisted logs.
    pub fn logs(&self) -> Option<&SqliteLogSink> {
        self.log_sink.as_deref()
    }
}

/// Initialize the global tracing subscriber. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_span_list(true)
        .with_filter(env_filter);

    let (sqlite_layer, sqlite_sink) = if config.log_to_sqlite {
        match SqliteLogSink::new(&config.log_db_path) {
            Ok(sink) => {
                let sink = Arc::new(sink);
                (Some(SqliteLogLayer::new(sink.clone())), Some(sink))
            }
            Err(e) => {
                eprintln!("warden-telemetry: failed to open log DB: {e}");
                (None, None)
            }
        }
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(sqlite_layer)
        .init();

    TelemetryGuard {
        log_sink: sqlite_sink,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_directive_includes_modules() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![("warden_engine".into(), Level::DEBUG)],
            ..Default::default()
        };
        assert_eq!(config.filter_directive(), "warn,warden_engine=debug");
    }

    #[test]
    fn level_parsing_falls_back_to_info() {
        assert_eq!(TelemetryConfig::level_from_str("debug"), Level::DEBUG);
        assert_eq!(TelemetryConfig::level_from_str("TRACE"), Level::TRACE);
        assert_eq!(TelemetryConfig::level_from_str("loud"), Level::INFO);
    }
}
