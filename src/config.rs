use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::broadcast::DEFAULT_BROADCAST_THROTTLE_MS;
use crate::idle::DEFAULT_IDLE_TIMEOUT_MS;
use crate::scoring::DispatchMode;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub idle_timeout_ms: u64,
    pub metrics_throttle_ms: u64,
    pub sample_interval_ms: u64,
    pub frame_interval_ms: u64,
    pub broadcast_throttle_ms: u64,
    pub final_score_grace_ms: u64,
    pub player_name: String,
    pub race_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            metrics_throttle_ms: 250,
            sample_interval_ms: 1000,
            frame_interval_ms: 16,
            broadcast_throttle_ms: DEFAULT_BROADCAST_THROTTLE_MS,
            final_score_grace_ms: 1000,
            player_name: "player".to_string(),
            race_dir: None,
        }
    }
}

/// Timing knobs handed to the session controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub idle_timeout_ms: u64,
    pub metrics_throttle_ms: u64,
    pub sample_interval_ms: u64,
    pub frame_interval_ms: u64,
    pub final_score_grace_ms: u64,
    pub dispatch: DispatchMode,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings::from(&Config::default())
    }
}

impl From<&Config> for EngineSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            idle_timeout_ms: cfg.idle_timeout_ms,
            metrics_throttle_ms: cfg.metrics_throttle_ms,
            sample_interval_ms: cfg.sample_interval_ms,
            frame_interval_ms: cfg.frame_interval_ms,
            final_score_grace_ms: cfg.final_score_grace_ms,
            dispatch: DispatchMode::Threaded,
        }
    }
}

pub trait ConfigStore {
    fn load(&self) -> Config;
    fn save(&self, cfg: &Config) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let path = if let Some(pd) = ProjectDirs::from("", "", "ghosttype") {
            pd.config_dir().join("config.json")
        } else {
            PathBuf::from("ghosttype_config.json")
        };
        Self { path }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Config {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice::<Config>(&bytes).unwrap_or_else(|e| {
                tracing::warn!(path = %self.path.display(), "ignoring unreadable config: {}", e);
                Config::default()
            }),
            Err(_) => Config::default(),
        }
    }

    fn save(&self, cfg: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(cfg)?;
        fs::write(&self.path, data)
    }
}
