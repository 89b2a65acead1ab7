use std::{
    fmt::Write,
    path::{Path, PathBuf},
};

use chrono::NaiveTime;
use directories::ProjectDirs;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    io,
};

/// what happens to an alarm after it rings
#[derive(Debug, Serialize, Deserialize, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    /// rings again the next day
    #[default]
    Daily,
    /// disabled once it has rung
    Once,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub alarms_path: PathBuf,
    pub sounds_dir: PathBuf,
    /// ringtone used by alarms without their own
    pub default_sound: String,
    /// volume of new alarms, 0-100
    pub volume: f32,
    pub poll_interval_ms: u64,
    pub recurrence: Recurrence,
    /// chrono format string for showing times
    pub time_format: String,
    pub http_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            alarms_path: Self::data_path().join("alarms.toml"),
            sounds_dir: Self::data_path().join("sounds"),
            default_sound: "beep_beep.mp3".to_string(),
            volume: 100.0,
            poll_interval_ms: 1000,
            recurrence: Recurrence::Daily,
            time_format: "%l:%M %p".to_string(),
            http_addr: "127.0.0.1:8000".to_string(),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "reveille")
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the config at `path`, falling back to the defaults when there is none.
    ///
    /// # Errors
    /// `Error::Config` if the file isn't valid, `Error::Io` if it can't be read
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text).map_err(|source| Error::Config {
                path: path.to_path_buf(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// # Errors
    /// `Error::Encode` or `Error::Persistence`
    pub fn save(&self, path: &Path) -> Result<()> {
        let config = toml::to_string(self)?;
        io::atomic_write(path, config.as_bytes())
    }

    #[must_use]
    pub fn config_path() -> PathBuf {
        project_dirs().map_or_else(
            || PathBuf::from("reveille.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }

    #[must_use]
    pub fn data_path() -> PathBuf {
        project_dirs().map_or_else(|| PathBuf::from("."), |dirs| dirs.data_dir().to_path_buf())
    }

    #[must_use]
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms.max(10))
    }

    /// `time` in the configured `time_format`, or `HH:MM` if that format is invalid
    #[must_use]
    pub fn format_time(&self, time: NaiveTime) -> String {
        let mut out = String::new();
        if write!(out, "{}", time.format(&self.time_format)).is_err() {
            out = time.format("%H:%M").to_string();
        }
        out.trim().to_string()
    }
}
