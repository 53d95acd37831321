//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TetherSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::TetherSettings;

/// Accepted `queueCapacity` values (`0` means unbounded).
pub const QUEUE_CAPACITY_RANGE: RangeInclusive<usize> = 0..=1_000_000;
/// Accepted `maxMessageSize` values, in bytes.
pub const MAX_MESSAGE_SIZE_RANGE: RangeInclusive<usize> = 1024..=1_073_741_824;
/// Accepted `tickIntervalMs` values.
pub const TICK_INTERVAL_MS_RANGE: RangeInclusive<u64> = 10..=3_600_000;

/// Resolve the path to the settings file (`~/.tether/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tether").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TetherSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<TetherSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Defaults with the settings file merged over them, without env overrides.
///
/// Out-of-range values are an error, with the same bounds the env
/// overrides use.
pub fn load_file_layer(path: &Path) -> Result<TetherSettings> {
    let defaults = serde_json::to_value(TetherSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let settings: TetherSettings = serde_json::from_value(merged)?;
    validate(&settings)?;
    Ok(settings)
}

/// Check numeric settings against their accepted ranges.
pub fn validate(settings: &TetherSettings) -> Result<()> {
    let server = &settings.server;
    check_range("server.queueCapacity", server.queue_capacity, &QUEUE_CAPACITY_RANGE)?;
    check_range("server.maxMessageSize", server.max_message_size, &MAX_MESSAGE_SIZE_RANGE)?;
    check_range("server.tickIntervalMs", server.tick_interval_ms, &TICK_INTERVAL_MS_RANGE)
}

fn check_range<T>(key: &str, value: T, range: &RangeInclusive<T>) -> Result<()>
where
    T: PartialOrd + std::fmt::Display,
{
    if range.contains(&value) {
        Ok(())
    } else {
        Err(SettingsError::InvalidValue(format!(
            "{key} = {value}, expected {}..={}",
            range.start(),
            range.end()
        )))
    }
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

/// Apply `TETHER_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut TetherSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides using an arbitrary variable lookup.
///
/// Invalid values are logged and ignored (the file/default value stays).
pub fn apply_overrides_from<F>(settings: &mut TetherSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read("TETHER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("TETHER_PORT") {
        match parse_u16_range(&v, 0, 65535) {
            Some(port) => settings.server.port = port,
            None => warn!(key = "TETHER_PORT", value = %v, "invalid u16 env var, ignoring"),
        }
    }
    if let Some(v) = read("TETHER_QUEUE_CAPACITY") {
        let (min, max) = (*QUEUE_CAPACITY_RANGE.start(), *QUEUE_CAPACITY_RANGE.end());
        match parse_usize_range(&v, min, max) {
            Some(cap) => settings.server.queue_capacity = cap,
            None => {
                warn!(key = "TETHER_QUEUE_CAPACITY", value = %v, "invalid usize env var, ignoring");
            }
        }
    }
    if let Some(v) = read("TETHER_MAX_MESSAGE_SIZE") {
        let (min, max) = (*MAX_MESSAGE_SIZE_RANGE.start(), *MAX_MESSAGE_SIZE_RANGE.end());
        match parse_usize_range(&v, min, max) {
            Some(size) => settings.server.max_message_size = size,
            None => {
                warn!(key = "TETHER_MAX_MESSAGE_SIZE", value = %v, "invalid usize env var, ignoring");
            }
        }
    }
    if let Some(v) = read("TETHER_TICK_INTERVAL_MS") {
        let (min, max) = (*TICK_INTERVAL_MS_RANGE.start(), *TICK_INTERVAL_MS_RANGE.end());
        match parse_u64_range(&v, min, max) {
            Some(ms) => settings.server.tick_interval_ms = ms,
            None => {
                warn!(key = "TETHER_TICK_INTERVAL_MS", value = %v, "invalid u64 env var, ignoring");
            }
        }
    }

    // ── Auth ────────────────────────────────────────────────────────
    if let Some(v) = read("TETHER_JWT_SECRET") {
        settings.auth.jwt_secret = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read("TETHER_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("TETHER_LOG_JSON") {
        match parse_bool(&v) {
            Some(json) => settings.logging.json = json,
            None => warn!(key = "TETHER_LOG_JSON", value = %v, "invalid boolean env var, ignoring"),
        }
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

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
