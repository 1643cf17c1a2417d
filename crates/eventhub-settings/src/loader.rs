//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`HubSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `EVENTHUB_*` environment overrides (highest priority)
//! 4. Validate the result

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{BRUTE_FORCE_MAX_SECS, BRUTE_FORCE_MIN_SECS, HubSettings};

/// Resolve the default settings file (`~/.eventhub/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".eventhub").join("settings.json")
}

/// Load settings from the default path.
pub fn load_settings() -> Result<HubSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with env overrides applied.
///
/// A missing file yields the defaults; a malformed one is an error.
pub fn load_settings_from_path(path: &Path) -> Result<HubSettings> {
    let defaults = serde_json::to_value(HubSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: HubSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key; arrays and primitives from `source` replace the
/// target; nulls in `source` are skipped.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `EVENTHUB_*` environment overrides. Unparseable or out-of-range
/// values are logged and ignored.
pub fn apply_env_overrides(settings: &mut HubSettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("EVENTHUB_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("EVENTHUB_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_string("EVENTHUB_BASE_PATH") {
        settings.server.base_path = v;
    }
    if let Some(v) = read_env_u64("EVENTHUB_SSE_KEEPALIVE_MS", 1_000, 300_000) {
        settings.server.sse_keep_alive_ms = v;
    }
    if let Some(v) = read_env_u64("EVENTHUB_POLL_TIMEOUT_MS", 1_000, 600_000) {
        settings.server.poll_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("EVENTHUB_HEARTBEAT_INTERVAL", 1_000, 600_000) {
        settings.server.heartbeat_interval_ms = v;
    }

    // ── Driver ──────────────────────────────────────────────────────
    if let Some(v) = read_env_u64(
        "EVENTHUB_BRUTE_FORCE_SECS",
        BRUTE_FORCE_MIN_SECS,
        BRUTE_FORCE_MAX_SECS,
    ) {
        settings.driver.brute_force_interval_secs = v;
    }
    if let Some(v) = read_env_bool("EVENTHUB_FORCE_AUTH") {
        settings.driver.force_authentication = v;
    }
    if let Some(v) = read_env_u64("EVENTHUB_COOKIE_TIMEOUT", 0, 10_080) {
        settings.driver.cookie_timeout_minutes = u32::try_from(v).unwrap_or(u32::MAX);
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("EVENTHUB_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("EVENTHUB_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a boolean: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a `u16` within `min..=max`.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a `u64` within `min..=max`.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}
