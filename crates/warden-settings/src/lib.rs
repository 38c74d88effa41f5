//! # warden-settings
//!
//! Configuration with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`WardenSettings::default()`]
//! 2. **User file**: `~/.warden/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `WARDEN_*` overrides (highest priority)
//!
//! The binary applies command-line flags on top of the result.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    deep_merge, load_settings, load_settings_from_path, resolve_path, settings_path, warden_home,
    EnvWarning, LoadedSettings,
};
pub use types::*;
