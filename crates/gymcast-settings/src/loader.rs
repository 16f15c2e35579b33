//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`GymcastSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::GymcastSettings;

/// Env var naming an explicit settings file.
pub const CONFIG_ENV: &str = "GYMCAST_CONFIG";

/// Resolve the default settings file path (`~/.gymcast/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".gymcast").join("settings.json")
}

/// Load settings from `explicit`, else `$GYMCAST_CONFIG`, else the default
/// path, with process env overrides applied.
pub fn load_settings(explicit: Option<&Path>) -> Result<GymcastSettings> {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(|| read_env_string(CONFIG_ENV).map(PathBuf::from))
        .unwrap_or_else(settings_path);
    load_settings_from_path(&path)
}

/// Load settings from a specific path with process env overrides.
pub fn load_settings_from_path(path: &Path) -> Result<GymcastSettings> {
    load_settings_with_env(path, |name| std::env::var(name).ok())
}

/// Load settings from a specific path, reading overrides through `env`.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_with_env<F>(path: &Path, env: F) -> Result<GymcastSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(GymcastSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: GymcastSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, env);
    Ok(settings)
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
/// - Integers must be valid and within the specified range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Invalid values are ignored with a warning (fall back to file/default)
pub fn apply_env_overrides<F>(settings: &mut GymcastSettings, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let vars = EnvReader { env };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = vars.string("HOST") {
        settings.server.host = v;
    }
    if let Some(v) = vars.parsed("PORT", |s| parse_u16_range(s, 1, 65535)) {
        settings.server.port = v;
    }
    if let Some(v) = vars.string("FRONTEND_URL") {
        settings.server.frontend_url = v;
    }
    if let Some(v) = vars.string("GYMCAST_ENV").or_else(|| vars.string("NODE_ENV")) {
        settings.server.environment = v;
    }

    // ── Realtime ────────────────────────────────────────────────────
    if let Some(v) = vars.parsed("GYMCAST_SEND_QUEUE", |s| parse_usize_range(s, 1, 65_536)) {
        settings.realtime.send_queue_capacity = v;
    }
    if let Some(v) =
        vars.parsed("GYMCAST_MAX_CONNECTIONS", |s| parse_usize_range(s, 1, 1_000_000))
    {
        settings.realtime.max_connections = v;
    }
    if let Some(v) =
        vars.parsed("GYMCAST_SHUTDOWN_GRACE_MS", |s| parse_u64_range(s, 0, 600_000))
    {
        settings.realtime.shutdown_grace_ms = v;
    }
    if let Some(v) =
        vars.parsed("GYMCAST_HEARTBEAT_INTERVAL_MS", |s| parse_u64_range(s, 1000, 600_000))
    {
        settings.realtime.heartbeat_interval_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = vars.string("GYMCAST_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = vars.parsed("GYMCAST_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
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

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

struct EnvReader<F> {
    env: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.env)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }
}
