use std::{collections::HashMap, fs, path::Path, time::Duration};

use client_core::CorrelatorConfig;
use serde::Serialize;
use shared::domain::ActionKind;

pub const SETTINGS_FILE: &str = "lockctl.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeSettings {
    pub database_url: String,
    /// `0` disables expiry for kinds without their own timeout.
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub sweep_interval_ms: u64,
    pub terminal_latency_ms: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/lockctl.db".into(),
            request_timeout_ms: 30_000,
            connect_timeout_ms: 60_000,
            sweep_interval_ms: 500,
            terminal_latency_ms: 20,
        }
    }
}

impl BridgeSettings {
    pub fn correlator_config(&self) -> CorrelatorConfig {
        let mut config = CorrelatorConfig {
            default_timeout: (self.request_timeout_ms > 0)
                .then(|| Duration::from_millis(self.request_timeout_ms)),
            kind_timeouts: HashMap::new(),
            sweep_interval: Duration::from_millis(self.sweep_interval_ms.max(1)),
        };
        if self.connect_timeout_ms > 0 {
            config = config.with_kind_timeout(
                ActionKind::ScanAndConnect,
                Duration::from_millis(self.connect_timeout_ms),
            );
        }
        config
    }

    pub fn terminal_latency(&self) -> Duration {
        Duration::from_millis(self.terminal_latency_ms)
    }
}

pub fn load_settings() -> BridgeSettings {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

/// Defaults, then the flat TOML file at `path`, then environment overrides.
pub fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> BridgeSettings {
    let mut settings = BridgeSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<HashMap<String, String>>(&raw) {
            Ok(file_cfg) => {
                if let Some(v) = file_cfg.get("database_url") {
                    settings.database_url = v.clone();
                }
                apply_millis(&mut settings.request_timeout_ms, file_cfg.get("request_timeout_ms"));
                apply_millis(&mut settings.connect_timeout_ms, file_cfg.get("connect_timeout_ms"));
                apply_millis(&mut settings.sweep_interval_ms, file_cfg.get("sweep_interval_ms"));
                apply_millis(
                    &mut settings.terminal_latency_ms,
                    file_cfg.get("terminal_latency_ms"),
                );
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "ignoring unreadable settings file");
            }
        }
    }

    if let Some(v) = env("LOCKCTL_DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = env("APP__DATABASE_URL") {
        settings.database_url = v;
    }
    apply_millis(
        &mut settings.request_timeout_ms,
        env("LOCKCTL_REQUEST_TIMEOUT_MS").as_ref(),
    );
    apply_millis(
        &mut settings.connect_timeout_ms,
        env("LOCKCTL_CONNECT_TIMEOUT_MS").as_ref(),
    );
    apply_millis(
        &mut settings.sweep_interval_ms,
        env("LOCKCTL_SWEEP_INTERVAL_MS").as_ref(),
    );

    settings
}

fn apply_millis(slot: &mut u64, raw: Option<&String>) {
    if let Some(parsed) = raw.and_then(|v| v.trim().parse::<u64>().ok()) {
        *slot = parsed;
    }
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    storage::ensure_sqlite_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return BridgeSettings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
