//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`BeaconSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::BeaconSettings;

/// Resolve the path to the settings file (`~/.beacon/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".beacon").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<BeaconSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults (plus env overrides). If the
/// file contains invalid JSON or the merged result fails validation, returns
/// an error.
pub fn load_settings_from_path(path: &Path) -> Result<BeaconSettings> {
    let mut settings = read_layers(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults deep-merged with the file at `path`, without env overrides.
fn read_layers(path: &Path) -> Result<BeaconSettings> {
    let defaults = serde_json::to_value(BeaconSettings::default())?;

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
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply `BEACON_*` environment variable overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut BeaconSettings) {
    apply_env_overrides_with(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup` instead of the process environment.
///
/// Each variable has strict parsing rules:
/// - Integers must be valid and within the specified range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Invalid values are ignored with a warning (file/default value stays)
pub fn apply_env_overrides_with<F>(settings: &mut BeaconSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };
    let realtime = &mut settings.realtime;

    // ── Connection ──────────────────────────────────────────────────
    if let Some(v) = env.string("BEACON_BASE_URL") {
        realtime.base_url = v;
    }
    if let Some(v) = env.string("BEACON_EVENTS_PATH") {
        realtime.events_path = v;
    }
    if let Some(v) = env.bool("BEACON_WITH_CREDENTIALS") {
        realtime.with_credentials = v;
    }
    if let Some(v) = env.string("BEACON_COOKIE") {
        realtime.cookie = Some(v);
    }
    if let Some(v) = env.u64("BEACON_CONNECT_TIMEOUT_MS", 100, 600_000) {
        realtime.connect_timeout_ms = v;
    }

    // ── Backoff ─────────────────────────────────────────────────────
    if let Some(v) = env.u32("BEACON_MAX_ATTEMPTS", 0, 100) {
        realtime.backoff.max_attempts = v;
    }
    if let Some(v) = env.u64("BEACON_BASE_DELAY_MS", 1, 600_000) {
        realtime.backoff.base_delay_ms = v;
    }
    if let Some(v) = env.u64("BEACON_MAX_DELAY_MS", 1, 3_600_000) {
        realtime.backoff.max_delay_ms = v;
    }
    if let Some(v) = env.bool("BEACON_RESET_ON_FOREGROUND") {
        realtime.reset_attempts_on_foreground = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("BEACON_LOG_LEVEL") {
        settings.logging.level = v;
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

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u32(&self, name: &str, min: u32, max: u32) -> Option<u32> {
        let val = (self.lookup)(name)?;
        let result = parse_u32_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u32 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use assert_matches::assert_matches;
    use serde_json::json;

    use crate::errors::SettingsError;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ───────────────────────────────────────────────────

    #[test]
    fn merge_nested_objects() {
        let target = json!({"realtime": {"baseUrl": "a", "withCredentials": true}});
        let source = json!({"realtime": {"baseUrl": "b"}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["realtime"]["baseUrl"], "b");
        assert_eq!(merged["realtime"]["withCredentials"], true);
    }

    #[test]
    fn merge_skips_null() {
        let merged = deep_merge(json!({"a": 1}), json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_replaces_arrays() {
        let merged = deep_merge(json!({"a": [1, 2]}), json!({"a": [3]}));
        assert_eq!(merged["a"], json!([3]));
    }

    #[test]
    fn merge_adds_new_keys() {
        let merged = deep_merge(json!({"a": 1}), json!({"b": 2}));
        assert_eq!(merged, json!({"a": 1, "b": 2}));
    }

    // ── file loading ─────────────────────────────────────────────────

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = read_layers(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings, BeaconSettings::default());
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"realtime": {"baseUrl": "https://jobs.example.com", "backoff": {"maxAttempts": 3}}}"#,
        )
        .unwrap();

        let settings = read_layers(&path).unwrap();
        assert_eq!(settings.realtime.base_url, "https://jobs.example.com");
        assert_eq!(settings.realtime.backoff.max_attempts, 3);
        assert_eq!(settings.realtime.backoff.base_delay_ms, 1000);
        assert_eq!(settings.realtime.events_path, "/realtime/events");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_matches!(read_layers(&path), Err(SettingsError::Json(_)));
    }

    #[test]
    fn invalid_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"realtime": {"backoff": {"baseDelayMs": 5000, "maxDelayMs": 10}}}"#,
        )
        .unwrap();
        assert_matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue { field: "realtime.backoff.maxDelayMs", .. })
        );
    }

    // ── env overrides ────────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let mut settings = BeaconSettings::default();
        apply_env_overrides_with(
            &mut settings,
            lookup_from(&[
                ("BEACON_BASE_URL", "https://override.example.com"),
                ("BEACON_MAX_ATTEMPTS", "8"),
                ("BEACON_BASE_DELAY_MS", "250"),
                ("BEACON_WITH_CREDENTIALS", "off"),
                ("BEACON_RESET_ON_FOREGROUND", "yes"),
                ("BEACON_COOKIE", "session=abc"),
                ("BEACON_LOG_LEVEL", "debug"),
            ]),
        );
        assert_eq!(settings.realtime.base_url, "https://override.example.com");
        assert_eq!(settings.realtime.backoff.max_attempts, 8);
        assert_eq!(settings.realtime.backoff.base_delay_ms, 250);
        assert!(!settings.realtime.with_credentials);
        assert!(settings.realtime.reset_attempts_on_foreground);
        assert_eq!(settings.realtime.cookie.as_deref(), Some("session=abc"));
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn env_invalid_values_ignored() {
        let mut settings = BeaconSettings::default();
        apply_env_overrides_with(
            &mut settings,
            lookup_from(&[
                ("BEACON_MAX_ATTEMPTS", "1000"),
                ("BEACON_CONNECT_TIMEOUT_MS", "abc"),
                ("BEACON_WITH_CREDENTIALS", "maybe"),
                ("BEACON_BASE_URL", ""),
            ]),
        );
        assert_eq!(settings, BeaconSettings::default());
    }

    // ── parsers ──────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "TRUE", "1", "yes", "on"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "No", "off"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u32_range("5", 0, 100), Some(5));
        assert_eq!(parse_u32_range("101", 0, 100), None);
        assert_eq!(parse_u32_range("-1", 0, 100), None);
        assert_eq!(parse_u64_range("100", 100, 200), Some(100));
        assert_eq!(parse_u64_range("99", 100, 200), None);
    }
}
