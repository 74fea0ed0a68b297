use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::Credentials;

pub const API_KEY_ENV: &str = "SPEECH_KEY";
pub const REGION_ENV: &str = "SPEECH_REGION";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub speech: SpeechConfig,
    pub session: SessionDefaults,
    pub audio: AudioConfig,
    pub ipc: IpcConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub api_key: Option<String>,
    pub region: Option<String>,
    /// Replaces the built-in language/voice catalog when set.
    pub catalog_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionDefaults {
    pub source_language: String,
    pub target_language: String,
    pub voice: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub playback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    pub socket_path: PathBuf,
    pub timeout_seconds: u64,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            source_language: "en".to_string(),
            target_language: "fr".to_string(),
            voice: None,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None, // Use default device
            output_device: None,
            playback: true,
        }
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/speech-translator.sock"),
            timeout_seconds: 30,
        }
    }
}

pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("speech-translator"))
}

impl Config {
    /// Loads `config.yaml` from the XDG config directory, falling back to
    /// defaults, then applies credential overrides from the environment.
    pub fn load() -> Result<Self> {
        let mut config = match config_dir().map(|dir| dir.join("config.yaml")) {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        config.apply_env(
            std::env::var(API_KEY_ENV).ok(),
            std::env::var(REGION_ENV).ok(),
        );
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        let config = serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid config {:?}", path))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let dir = config_dir().context("Could not find config directory")?;
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("config.yaml"), serde_yaml::to_string(self)?)?;
        Ok(())
    }

    fn apply_env(&mut self, api_key: Option<String>, region: Option<String>) {
        if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
            self.speech.api_key = Some(key);
        }
        if let Some(region) = region.filter(|r| !r.trim().is_empty()) {
            self.speech.region = Some(region);
        }
    }

    /// Both the key and the region, or nothing.
    pub fn credentials(&self) -> Option<Credentials> {
        let api_key = self.speech.api_key.as_ref().filter(|k| !k.trim().is_empty())?;
        let region = self.speech.region.as_ref().filter(|r| !r.trim().is_empty())?;
        Some(Credentials {
            api_key: api_key.clone(),
            region: region.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "speech:\n  api_key: abc\nsession:\n  target_language: de").unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.speech.api_key.as_deref(), Some("abc"));
        assert_eq!(config.session.source_language, "en");
        assert_eq!(config.session.target_language, "de");
        assert!(config.audio.playback);
        assert_eq!(config.ipc.timeout_seconds, 30);
    }

    #[test]
    fn credentials_require_key_and_region() {
        let mut config = Config::default();
        assert!(config.credentials().is_none());

        config.apply_env(Some("key".to_string()), None);
        assert!(config.credentials().is_none());

        config.apply_env(None, Some("westeurope".to_string()));
        let credentials = config.credentials().unwrap();
        assert_eq!(credentials.api_key, "key");
        assert_eq!(credentials.region, "westeurope");
    }

    #[test]
    fn blank_env_values_do_not_override() {
        let mut config = Config::default();
        config.speech.api_key = Some("from-file".to_string());
        config.apply_env(Some("  ".to_string()), None);
        assert_eq!(config.speech.api_key.as_deref(), Some("from-file"));
    }
}
