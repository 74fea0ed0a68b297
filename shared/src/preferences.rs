use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::config_dir;

/// Small persisted UI state shared between daemon and clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    pub countdown_seconds: Option<i64>,
    pub logs_expanded: Option<bool>,
}

impl Preferences {
    pub fn countdown_seconds(&self) -> u32 {
        self.countdown_seconds
            .unwrap_or(0)
            .clamp(0, u32::MAX as i64) as u32
    }

    pub fn logs_expanded(&self) -> bool {
        self.logs_expanded.unwrap_or(false)
    }
}

pub fn preferences_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("preferences.toml"))
}

pub fn load_preferences() -> Preferences {
    preferences_path()
        .map(|path| load_preferences_from(&path))
        .unwrap_or_default()
}

pub fn load_preferences_from(path: &Path) -> Preferences {
    if let Ok(content) = fs::read_to_string(path) {
        toml::from_str(&content).unwrap_or_default()
    } else {
        Preferences::default()
    }
}

pub fn save_preferences(preferences: &Preferences) -> Result<()> {
    let path = preferences_path().context("Could not find config directory")?;
    save_preferences_to(preferences, &path)
}

pub fn save_preferences_to(preferences: &Preferences, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let toml_string = toml::to_string_pretty(preferences)?;
    fs::write(path, toml_string)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_countdown_clamps_to_zero() {
        let prefs = Preferences {
            countdown_seconds: Some(-4),
            logs_expanded: None,
        };
        assert_eq!(prefs.countdown_seconds(), 0);
        assert!(!prefs.logs_expanded());
    }

    #[test]
    fn saved_preferences_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("preferences.toml");
        let prefs = Preferences {
            countdown_seconds: Some(3),
            logs_expanded: Some(true),
        };

        save_preferences_to(&prefs, &path).unwrap();
        assert_eq!(load_preferences_from(&path), prefs);
    }

    #[test]
    fn unreadable_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.toml");
        fs::write(&path, "countdown_seconds = \"soon\"").unwrap();
        assert_eq!(load_preferences_from(&path), Preferences::default());
    }
}
