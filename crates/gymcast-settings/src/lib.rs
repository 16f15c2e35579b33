//! # gymcast-settings
//!
//! Configuration management with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`GymcastSettings::default()`]
//! 2. **Settings file**: `--config`, `$GYMCAST_CONFIG`, or `~/.gymcast/settings.json`
//! 3. **Environment variables**: `PORT`, `FRONTEND_URL`, `GYMCAST_*` (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
