//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::cell::RefCell;
use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::WardenSettings;

/// Root directory for warden state (`~/.warden`).
pub fn warden_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".warden")
}

/// Resolve the path to the settings file (`~/.warden/settings.json`).
pub fn settings_path() -> PathBuf {
    warden_home().join("settings.json")
}

/// Resolve a configured path: absolute paths are kept, relative ones are
/// placed under [`warden_home`].
pub fn resolve_path(configured: &str) -> PathBuf {
    let path = Path::new(configured);
    if path.is_absolute() {
        path.to_owned()
    } else {
        warden_home().join(path)
    }
}

/// An environment override that was rejected during loading.
///
/// Settings load before the subscriber exists, so rejections are returned
/// to the caller for logging once telemetry is up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvWarning {
    pub key: String,
    pub value: String,
    pub reason: String,
}

impl fmt::Display for EnvWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={:?} ignored: {}", self.key, self.value, self.reason)
    }
}

/// Settings plus the env overrides that were ignored while building them.
#[derive(Clone, Debug)]
pub struct LoadedSettings {
    pub settings: WardenSettings,
    pub warnings: Vec<EnvWarning>,
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<LoadedSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<LoadedSettings> {
    let mut settings = load_file_layer(path)?;
    let warnings = apply_env_overrides(&mut settings);
    Ok(LoadedSettings { settings, warnings })
}

fn load_file_layer(path: &Path) -> Result<WardenSettings> {
    let defaults = serde_json::to_value(WardenSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored (fall back to file/default) and reported in
/// the returned list.
pub fn apply_env_overrides(settings: &mut WardenSettings) -> Vec<EnvWarning> {
    apply_overrides_from(settings, |name| std::env::var(name).ok())
}

/// Override source abstracted so tests need not touch the process env.
fn apply_overrides_from<F>(settings: &mut WardenSettings, lookup: F) -> Vec<EnvWarning>
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader {
        lookup,
        warnings: RefCell::new(Vec::new()),
    };

    // ── Bridge ──────────────────────────────────────────────────────
    if let Some(v) = env.string("WARDEN_BRIDGE_HOST") {
        settings.bridge.host = v;
    }
    if let Some(v) = env.u16("WARDEN_BRIDGE_PORT", 1, 65535) {
        settings.bridge.port = v;
    }
    if let Some(v) = env.string("WARDEN_PROTOCOL_VERSION") {
        settings.bridge.protocol_version = v;
    }

    // ── Session ─────────────────────────────────────────────────────
    if let Some(v) = env.string("WARDEN_IDENTITY_PREFIX") {
        settings.session.identity_prefix = v;
    }
    if let Some(v) = env.u64("WARDEN_RECONNECT_DELAY_MS", 100, 3_600_000) {
        settings.session.reconnect_delay_ms = v;
    }
    if let Some(v) = env.u64("WARDEN_CONNECT_TIMEOUT_MS", 100, 3_600_000) {
        settings.session.connect_timeout_ms = v;
    }
    let activity_before = (
        settings.session.activity_period_ms,
        settings.session.activity_release_ms,
    );
    if let Some(v) = env.u64("WARDEN_ACTIVITY_PERIOD_MS", 100, 3_600_000) {
        settings.session.activity_period_ms = v;
    }
    if let Some(v) = env.u64("WARDEN_ACTIVITY_RELEASE_MS", 10, 3_600_000) {
        settings.session.activity_release_ms = v;
    }
    // The release must land before the next pulse.
    if settings.session.activity_release_ms >= settings.session.activity_period_ms
        && (settings.session.activity_period_ms, settings.session.activity_release_ms)
            != activity_before
    {
        let key = if settings.session.activity_release_ms != activity_before.1 {
            "WARDEN_ACTIVITY_RELEASE_MS"
        } else {
            "WARDEN_ACTIVITY_PERIOD_MS"
        };
        env.reject(
            key,
            format!(
                "{}ms period / {}ms release",
                settings.session.activity_period_ms, settings.session.activity_release_ms
            ),
            "activity release must be shorter than the period".into(),
        );
        (
            settings.session.activity_period_ms,
            settings.session.activity_release_ms,
        ) = activity_before;
    }
    if let Some(v) = env.f64("WARDEN_JUMP_PROBABILITY", 0.0, 1.0) {
        settings.session.jump_probability = v;
    }
    if let Some(v) = env.u64("WARDEN_SAMPLE_PERIOD_MS", 10, 3_600_000) {
        settings.session.sample_period_ms = v;
    }

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("WARDEN_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("WARDEN_PORT", 1, 65535) {
        settings.server.port = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.bool("WARDEN_LOG_TO_SQLITE") {
        settings.logging.log_to_sqlite = v;
    }
    if let Some(v) = env.string("WARDEN_VISION_LOG") {
        settings.logging.vision_log_path = v;
    }

    env.warnings.into_inner()
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a finite `f64` within a range.
pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.parse().ok()?;
    (n.is_finite() && n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
    warnings: RefCell<Vec<EnvWarning>>,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "boolean", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn f64(&self, name: &str, min: f64, max: f64) -> Option<f64> {
        self.parsed(name, "f64", |v| parse_f64_range(v, min, max))
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            self.reject(name, val, format!("not a valid {kind}"));
        }
        result
    }

    fn reject(&self, key: &str, value: String, reason: String) {
        self.warnings.borrow_mut().push(EnvWarning {
            key: key.to_string(),
            value,
            reason,
        });
    }
}
