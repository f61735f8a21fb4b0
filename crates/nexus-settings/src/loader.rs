//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`NexusSettings::default()`]
//! 2. If `~/.nexus/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `NEXUS_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use nexus_core::CodecConfig;
use nexus_logging::LogFormat;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::NexusSettings;

/// Resolve the path to the settings file (`~/.nexus/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".nexus").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<NexusSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or values are an error.
pub fn load_settings_from_path(path: &Path) -> Result<NexusSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults deep-merged with the file at `path`, without env overrides.
pub fn read_settings_file(path: &Path) -> Result<NexusSettings> {
    let defaults = serde_json::to_value(NexusSettings::default())?;

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

/// Apply `NEXUS_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut NexusSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply `NEXUS_*` overrides read through `lookup`.
///
/// Empty or unparsable values are ignored with a warning so a typo in the
/// environment never prevents startup.
pub fn apply_overrides_from<F>(settings: &mut NexusSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read("NEXUS_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("NEXUS_PORT") {
        match parse_u16_range(&v, 0, 65535) {
            Some(port) => settings.server.port = port,
            None => warn!(key = "NEXUS_PORT", value = %v, "invalid port env var, ignoring"),
        }
    }
    if let Some(v) = read("NEXUS_WS_PATH") {
        settings.server.path = v;
    }

    // ── Router ──────────────────────────────────────────────────────
    if let Some(v) = read("NEXUS_CODEC") {
        match v.parse::<CodecConfig>() {
            Ok(codec) => settings.router.codec = codec,
            Err(e) => warn!(key = "NEXUS_CODEC", value = %v, error = %e, "invalid codec env var, ignoring"),
        }
    }
    if let Some(v) = read("NEXUS_DELIMITER") {
        match &mut settings.router.codec {
            CodecConfig::Delimited { delimiter } => *delimiter = v,
            CodecConfig::Json => {
                warn!(key = "NEXUS_DELIMITER", "delimiter set but codec is json, ignoring");
            }
        }
    }
    if let Some(v) = read("NEXUS_QUEUE_CAPACITY") {
        match parse_usize_range(&v, 1, 1_000_000) {
            Some(n) => settings.router.queue_capacity = n,
            None => warn!(key = "NEXUS_QUEUE_CAPACITY", value = %v, "invalid queue capacity env var, ignoring"),
        }
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read("NEXUS_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("NEXUS_LOG_FORMAT") {
        match v.parse::<LogFormat>() {
            Ok(format) => settings.logging.format = format,
            Err(e) => warn!(key = "NEXUS_LOG_FORMAT", error = %e, "invalid log format env var, ignoring"),
        }
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
