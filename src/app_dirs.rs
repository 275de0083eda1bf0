use directories::ProjectDirs;
use std::path::PathBuf;

/// Centralized application directory resolution
pub struct AppDirs;

impl AppDirs {
    fn state_dir() -> Option<PathBuf> {
        if let Ok(home) = std::env::var("HOME") {
            Some(
                PathBuf::from(home)
                    .join(".local")
                    .join("state")
                    .join("ghosttype"),
            )
        } else {
            ProjectDirs::from("", "", "ghosttype").map(|pd| pd.data_local_dir().to_path_buf())
        }
    }

    pub fn db_path() -> Option<PathBuf> {
        Self::state_dir().map(|dir| dir.join("attempts.db"))
    }

    pub fn log_path() -> Option<PathBuf> {
        Self::state_dir().map(|dir| dir.join("ghosttype.log"))
    }

    /// CSV mirror written on sync.
    pub fn mirror_path() -> Option<PathBuf> {
        Self::state_dir().map(|dir| dir.join("attempts.csv"))
    }

    pub fn race_dir() -> Option<PathBuf> {
        Self::state_dir().map(|dir| dir.join("races"))
    }
}
