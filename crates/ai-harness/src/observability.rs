//! Opt-in tracing subscriber setup for binaries and demos.
//!
//! The library only emits `tracing` events; nothing here runs unless the host
//! calls [`init_observability`].

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const ENABLED_KEYS: [&str; 2] = ["AI_HARNESS_OBSERVABILITY_ENABLED", "AI_HARNESS_OBSERVABILITY"];
const LEVEL_KEY: &str = "AI_HARNESS_LOG_LEVEL";
const JSON_PATH_KEY: &str = "AI_HARNESS_JSON_LOG_PATH";
const DEFAULT_JSON_FILE: &str = "ai-harness.logs.jsonl";

/// Logging settings resolved from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservabilityConfig {
    pub enabled: bool,
    /// Filter directive; `None` defers to `RUST_LOG`, then `info`.
    pub level: Option<String>,
    /// JSONL output file; console output when `None`.
    pub json_log_path: Option<PathBuf>,
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

impl ObservabilityConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves settings through `lookup` (an environment accessor).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = ENABLED_KEYS
            .iter()
            .find_map(|key| lookup(key))
            .map(|value| parse_bool(&value).unwrap_or(true))
            .unwrap_or(true);
        let level = lookup(LEVEL_KEY).filter(|v| !v.trim().is_empty());
        let json_log_path = lookup(JSON_PATH_KEY)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        Self {
            enabled,
            level,
            json_log_path,
        }
    }

    fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        if let Some(level) = &self.level
            && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
        {
            return filter;
        }
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    }
}

/// Installs a global subscriber once per process.
///
/// Environment variables:
/// - `AI_HARNESS_OBSERVABILITY_ENABLED` / `AI_HARNESS_OBSERVABILITY`: enable flag (default on).
/// - `AI_HARNESS_LOG_LEVEL`: filter override (`info`, `ai_harness=debug`, ...).
/// - `AI_HARNESS_JSON_LOG_PATH`: write JSONL to this file instead of stdout.
/// - `RUST_LOG`: fallback filter.
pub fn init_observability() {
    INIT.get_or_init(|| install(&ObservabilityConfig::from_env()));
}

fn install(config: &ObservabilityConfig) {
    if !config.enabled {
        return;
    }
    let env_filter = config.env_filter();
    match &config.json_log_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                let _ = std::fs::create_dir_all(parent);
            }
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(DEFAULT_JSON_FILE);
            let writer = tracing_appender::rolling::never(dir, file_name);
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_target(true)
                .with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer)
                .try_init();
        }
        None => {
            let console_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stdout);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init();
        }
    }
}
