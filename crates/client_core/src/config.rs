use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

use crate::delay_ledger::DEFAULT_DELAY_WINDOW;

pub const SETTINGS_FILE: &str = "commute.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientSettings {
    pub server_url: String,
    pub database_url: String,
    pub request_timeout_secs: u64,
    pub delay_window: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".into(),
            database_url: "sqlite://./data/commute.db".into(),
            request_timeout_secs: 60,
            delay_window: DEFAULT_DELAY_WINDOW,
        }
    }
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Defaults, then `commute.toml` in the working directory, then the process
/// environment.
pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new(SETTINGS_FILE), |name| std::env::var(name).ok())
}

pub fn load_settings_from(
    file: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(file) {
        match toml::from_str::<HashMap<String, String>>(&raw) {
            Ok(file_cfg) => apply_overrides(&mut settings, |name| file_cfg.get(name).cloned()),
            Err(err) => warn!(path = %file.display(), "ignoring unreadable settings file: {err}"),
        }
    }

    apply_overrides(&mut settings, |name| {
        let upper = name.to_ascii_uppercase();
        env(&format!("APP__{upper}")).or_else(|| env(&format!("COMMUTE_{upper}")))
    });

    settings
}

fn apply_overrides(settings: &mut ClientSettings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("server_url") {
        settings.server_url = v.trim_end_matches('/').to_string();
    }
    if let Some(v) = lookup("database_url") {
        settings.database_url = v;
    }
    if let Some(v) = lookup("request_timeout_secs") {
        match v.parse::<u64>() {
            Ok(parsed) if parsed > 0 => settings.request_timeout_secs = parsed,
            _ => warn!(value = %v, "ignoring invalid request_timeout_secs"),
        }
    }
    if let Some(v) = lookup("delay_window") {
        match v.parse::<usize>() {
            Ok(parsed) if parsed > 0 => settings.delay_window = parsed,
            _ => warn!(value = %v, "ignoring invalid delay_window"),
        }
    }
}

/// Turns a database setting into an sqlx URL and creates the directory its
/// file will live in. Plain paths and `sqlite:` shorthands are accepted.
pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    if let Some(dir) = database_dir(&database_url) {
        fs::create_dir_all(&dir)
            .with_context(|| format!("cannot create database directory {}", dir.display()))?;
    }
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw = raw_database_url.trim();
    if raw.is_empty() {
        return ClientSettings::default().database_url;
    }
    if raw.contains("://") || raw.starts_with("sqlite::memory:") {
        return raw.to_string();
    }
    let path = raw.strip_prefix("sqlite:").unwrap_or(raw);
    format!("sqlite://{}", path.replace('\\', "/"))
}

/// Directory holding a file-backed `sqlite://` database; none for in-memory
/// or non-sqlite URLs.
fn database_dir(database_url: &str) -> Option<PathBuf> {
    let path = database_url.strip_prefix("sqlite://")?;
    let path = path.split_once('?').map_or(path, |(path, _)| path);
    Path::new(path)
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
