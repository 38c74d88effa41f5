//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a settings file may specify any subset of fields.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "bridge": { "host": "play.example.net", "port": 25565 },
///   "session": { "reconnectDelayMs": 10000 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WardenSettings {
    /// Where the game client bridge lives.
    pub bridge: BridgeSettings,
    /// Session lifecycle timing.
    pub session: SessionSettings,
    /// Telemetry push server.
    pub server: ServerSettings,
    /// Logging and durable vision log.
    pub logging: LoggingSettings,
}

impl WardenSettings {
    /// Reject values the controller cannot run with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.session;
        if !(0.0..=1.0).contains(&s.jump_probability) {
            return Err(SettingsError::InvalidValue(format!(
                "jumpProbability must be within [0, 1], got {}",
                s.jump_probability
            )));
        }
        for (name, value) in [
            ("reconnectDelayMs", s.reconnect_delay_ms),
            ("connectTimeoutMs", s.connect_timeout_ms),
            ("activityPeriodMs", s.activity_period_ms),
            ("samplePeriodMs", s.sample_period_ms),
        ] {
            if value == 0 {
                return Err(SettingsError::InvalidValue(format!("{name} must be > 0")));
            }
        }
        if s.activity_release_ms >= s.activity_period_ms {
            return Err(SettingsError::InvalidValue(
                "activityReleaseMs must be shorter than activityPeriodMs".into(),
            ));
        }
        if s.identity_prefix.is_empty() {
            return Err(SettingsError::InvalidValue("identityPrefix is empty".into()));
        }
        Ok(())
    }
}

/// Game client bridge endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    pub host: String,
    pub port: u16,
    /// Protocol version string passed through to the game client.
    pub protocol_version: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 25570,
            protocol_version: "1.12.2".to_string(),
        }
    }
}

/// Session lifecycle timing and identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Display names are `<identityPrefix>_<n>`.
    pub identity_prefix: String,
    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub activity_period_ms: u64,
    /// How long a movement pulse is held before intents are cleared.
    pub activity_release_ms: u64,
    pub jump_probability: f64,
    pub sample_period_ms: u64,
    /// Fixed RNG seed for reproducible runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            identity_prefix: "ByteBot".to_string(),
            reconnect_delay_ms: 10_000,
            connect_timeout_ms: 15_000,
            activity_period_ms: 8_000,
            activity_release_ms: 1_000,
            jump_probability: 0.3,
            sample_period_ms: 1_000,
            seed: None,
        }
    }
}

/// Telemetry push server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Per-subscriber outbound queue length.
    pub max_send_queue: usize,
    pub heartbeat_interval_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_send_queue: 256,
            heartbeat_interval_ms: 30_000,
        }
    }
}

/// Logging configuration. Paths are relative to `~/.warden` unless absolute.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` wins when set.
    pub level: String,
    /// Persist warn+ tracing events to SQLite.
    pub log_to_sqlite: bool,
    pub log_db_path: String,
    /// Append-only text file for vision log lines. Empty disables it.
    pub vision_log_path: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_to_sqlite: true,
            log_db_path: "database/logs.db".to_string(),
            vision_log_path: "vision.log".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        WardenSettings::default().validate().unwrap();
    }

    #[test]
    fn defaults_match_recommended_timings() {
        let s = SessionSettings::default();
        assert_eq!(s.reconnect_delay_ms, 10_000);
        assert_eq!(s.connect_timeout_ms, 15_000);
        assert_eq!(s.activity_period_ms, 8_000);
        assert_eq!(s.activity_release_ms, 1_000);
        assert_eq!(s.sample_period_ms, 1_000);
        assert!((s.jump_probability - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn camel_case_wire_names() {
        let json = serde_json::to_value(WardenSettings::default()).unwrap();
        assert!(json["session"].get("reconnectDelayMs").is_some());
        assert!(json["bridge"].get("protocolVersion").is_some());
        assert!(json["server"].get("maxSendQueue").is_some());
        assert!(json["session"].get("seed").is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: WardenSettings =
            serde_json::from_str(r#"{"session": {"jumpProbability": 0.4}}"#).unwrap();
        assert!((s.session.jump_probability - 0.4).abs() < f64::EPSILON);
        assert_eq!(s.session.reconnect_delay_ms, 10_000);
        assert_eq!(s.server.port, 3000);
    }

    #[test]
    fn rejects_out_of_range_probability() {
        let mut s = WardenSettings::default();
        s.session.jump_probability = 1.5;
        assert!(matches!(s.validate(), Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn rejects_zero_period() {
        let mut s = WardenSettings::default();
        s.session.sample_period_ms = 0;
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("samplePeriodMs"));
    }

    #[test]
    fn rejects_release_longer_than_period() {
        let mut s = WardenSettings::default();
        s.session.activity_release_ms = 9_000;
        assert!(s.validate().is_err());
    }
}
