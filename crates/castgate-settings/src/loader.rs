//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`GatewaySettings::default()`]
//! 2. If a settings file is given and exists, deep-merge its values over defaults
//! 3. Apply `CASTGATE_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::Path;

use castgate_core::logging::LogFormat;
use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::GatewaySettings;

/// Load settings from an optional file with env var overrides.
///
/// A missing file yields defaults. A file with invalid JSON is an error.
pub fn load_settings(path: Option<&Path>) -> Result<GatewaySettings> {
    let defaults = serde_json::to_value(GatewaySettings::default())?;

    let merged = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading settings from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        Some(path) => {
            debug!(?path, "settings file not found, using defaults");
            defaults
        }
        None => defaults,
    };

    let mut settings: GatewaySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
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
/// `lookup` resolves a variable name; production passes `std::env::var`.
/// Invalid values are logged and ignored (fall back to file/default).
pub fn apply_env_overrides<F>(settings: &mut GatewaySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("CASTGATE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("CASTGATE_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("CASTGATE_PATH") {
        settings.server.path = v;
    }
    if let Some(v) = env.usize("CASTGATE_OUTBOUND_BUFFER", 1, 1_000_000) {
        settings.server.outbound_buffer_size = v;
    }
    if let Some(v) = env.usize("CASTGATE_ACTION_QUEUE", 1, 100_000) {
        settings.server.action_queue_size = v;
    }
    if let Some(v) = env.u64("CASTGATE_PING_INTERVAL", 1, 3_600) {
        settings.server.ping_interval_secs = v;
    }
    if let Some(v) = env.u64("CASTGATE_HEARTBEAT_TIMEOUT", 1, 86_400) {
        settings.server.heartbeat_timeout_secs = v;
    }
    if let Some(v) = env.usize("CASTGATE_MAX_MESSAGE_SIZE", 1024, 64 * 1024 * 1024) {
        settings.server.max_message_size = v;
    }

    // ── RPC ─────────────────────────────────────────────────────────
    if let Some(v) = env.string("CASTGATE_RPC_URL") {
        settings.rpc.url = v;
    }
    if let Some(v) = env.u64("CASTGATE_RPC_TIMEOUT_MS", 1, 600_000) {
        settings.rpc.timeout_ms = v;
    }
    if let Some(v) = env.usize("CASTGATE_RPC_CONCURRENCY", 1, 10_000) {
        settings.rpc.concurrency = v;
    }
    if let Some(v) = env.u64("CASTGATE_RPC_ACQUIRE_TIMEOUT_MS", 0, 600_000) {
        settings.rpc.acquire_timeout_ms = v;
    }

    // ── Broadcast ───────────────────────────────────────────────────
    if let Some(v) = env.string("CASTGATE_BROADCAST_SECRET") {
        settings.broadcast.secret = Some(v);
    }

    // ── Cluster ─────────────────────────────────────────────────────
    if let Some(v) = env.string("CASTGATE_NODE_ID") {
        settings.cluster.node_id = Some(v);
    }
    if let Some(v) = env.string("CASTGATE_CLUSTER_LISTEN") {
        settings.cluster.listen = Some(v);
    }
    if let Some(v) = env.string("CASTGATE_CLUSTER_PEERS") {
        settings.cluster.peers = parse_list(&v);
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("CASTGATE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.string("CASTGATE_LOG_FORMAT") {
        match parse_log_format(&v) {
            Some(format) => settings.logging.format = format,
            None => tracing::warn!(key = "CASTGATE_LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a comma-separated list, dropping blanks.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a log format name (case-insensitive).
pub fn parse_log_format(val: &str) -> Option<LogFormat> {
    match val.to_lowercase().as_str() {
        "compact" | "text" => Some(LogFormat::Compact),
        "json" => Some(LogFormat::Json),
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

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
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

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}
