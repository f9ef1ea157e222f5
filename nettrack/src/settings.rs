//! Host settings: load/save a small JSON file.
//! Stored under XDG config dir: $XDG_CONFIG_HOME/nettrack/settings.json (fallback ~/.config/nettrack/settings.json)

use serde::{Deserialize, Serialize};
use std::{fs, io, path::Path, path::PathBuf};

use crate::history::DEFAULT_HISTORY_CAPACITY;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub filters: Vec<String>,
    pub history_capacity: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
    // run the worker out of process when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            store_path: None,
            agent_path: None,
        }
    }
}

pub fn config_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("nettrack")
    } else {
        dirs_next::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nettrack")
    }
}

pub fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

pub fn default_store_path() -> PathBuf {
    config_dir().join("traffic.json")
}

pub fn load_settings() -> Settings {
    load_settings_from(&settings_path())
}

pub fn load_settings_from(path: &Path) -> Settings {
    let mut s: Settings = match fs::read_to_string(path) {
        Ok(s) => serde_json::from_str(&s).unwrap_or_default(),
        Err(_) => Settings::default(),
    };
    if s.history_capacity == 0 {
        s.history_capacity = DEFAULT_HISTORY_CAPACITY;
    }
    s
}

pub fn save_settings_to(path: &Path, s: &Settings) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_vec_pretty(s).map_err(io::Error::other)?;
    fs::write(path, data)
}
