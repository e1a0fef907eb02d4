use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_LOG_FILE: &str = "chat-relay.logs.jsonl";
/// Request spans from `TraceLayer` are emitted at debug level.
const DEFAULT_FILTER: &str = "info,tower_http=debug";
const ENABLED_KEYS: [&str; 2] = ["CHAT_RELAY_OBSERVABILITY_ENABLED", "CHAT_RELAY_OBSERVABILITY"];

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Logging settings resolved from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogSettings {
    pub enabled: bool,
    /// Filter directive; `None` falls back to `RUST_LOG`, then the relay default.
    pub filter: Option<String>,
    /// JSONL output file. Console output when unset.
    pub json_log_path: Option<PathBuf>,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves settings through `lookup`.
    ///
    /// - `CHAT_RELAY_OBSERVABILITY_ENABLED` / `CHAT_RELAY_OBSERVABILITY`: enable flag, first key set wins (default enabled).
    /// - `CHAT_RELAY_LOG_LEVEL`: filter override (`info`, `chat_stream=debug`, etc.), then `RUST_LOG`.
    /// - `CHAT_RELAY_JSON_LOG_PATH`: JSONL log file path.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let enabled = ENABLED_KEYS
            .iter()
            .find_map(|key| lookup(*key))
            .map(|value| parse_bool_env(&value).unwrap_or(true))
            .unwrap_or(true);
        let filter = ["CHAT_RELAY_LOG_LEVEL", "RUST_LOG"]
            .iter()
            .filter_map(|key| lookup(*key))
            .find(|value| !value.trim().is_empty());
        let json_log_path = lookup("CHAT_RELAY_JSON_LOG_PATH")
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);
        Self {
            enabled,
            filter,
            json_log_path,
        }
    }

    fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        self.filter
            .as_deref()
            .and_then(|directive| tracing_subscriber::EnvFilter::try_new(directive).ok())
            .unwrap_or_else(|| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER))
    }
}

fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    (dir, file_name)
}

/// Initialize relay logging once per process from the environment.
pub fn init_observability() {
    init_with(LogSettings::from_env());
}

/// Initialize relay logging once per process. Later calls are no-ops.
pub fn init_with(settings: LogSettings) {
    INIT.get_or_init(|| {
        if !settings.enabled {
            return;
        }

        let env_filter = settings.env_filter();
        if let Some(path) = &settings.json_log_path {
            let (dir, file_name) = split_log_path(path);
            let _ = std::fs::create_dir_all(&dir);
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
        } else {
            let console_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stdout);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init();
        }
    });
}
