use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Starting,
    Active,
    Stopping,
}

impl SessionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, SessionState::Idle)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Idle
    }
}

/// Everything a session needs from the caller. Fixed for the session's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub source_language: String,
    pub target_language: String,
    pub voice: String,
    pub input_device: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub api_key: String,
    pub region: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Female,
    Male,
    Neutral,
}

impl Gender {
    pub(crate) fn rank(&self) -> u8 {
        match self {
            Gender::Female => 0,
            Gender::Male => 1,
            Gender::Neutral => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub short_name: String,
    pub name: String,
    pub gender: Gender,
}

/// A catalog voice tagged with the locale it was listed under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocaleVoice {
    pub short_name: String,
    pub name: String,
    pub gender: Gender,
    pub locale: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub name: String,
    pub native_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageOption {
    pub code: String,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    Status,
    Speech,
    Translation,
    Settings,
    Error,
}

impl LogCategory {
    pub fn label(&self) -> &'static str {
        match self {
            LogCategory::Status => "STATUS",
            LogCategory::Speech => "SPEECH",
            LogCategory::Translation => "TRANSLATION",
            LogCategory::Settings => "SETTINGS",
            LogCategory::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub category: LogCategory,
    pub message: String,
    pub metadata: BTreeMap<String, String>,
}

impl LogEntry {
    pub fn new(category: LogCategory, message: String, metadata: BTreeMap<String, String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            category,
            message,
            metadata,
        }
    }

    /// Wall-clock time of the entry as `HH:MM:SS` in the local timezone.
    pub fn clock_time(&self) -> String {
        self.timestamp
            .with_timezone(&Local)
            .format("%H:%M:%S")
            .to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    Input,
    Output,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDevice {
    pub id: String,
    pub label: String,
    pub kind: DeviceKind,
}

impl AudioDevice {
    pub fn display_label(&self) -> String {
        if !self.label.trim().is_empty() {
            return self.label.clone();
        }
        let noun = match self.kind {
            DeviceKind::Input => "Microphone",
            DeviceKind::Output => "Speaker",
        };
        let short_id: String = self.id.chars().take(5).collect();
        format!("{} {}", noun, short_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceList {
    pub inputs: Vec<AudioDevice>,
    pub outputs: Vec<AudioDevice>,
}

impl DeviceList {
    pub fn default_input(&self) -> Option<&AudioDevice> {
        self.inputs.first()
    }

    pub fn default_output(&self) -> Option<&AudioDevice> {
        self.outputs.first()
    }
}

/// A synthesized clip as handed to playback and to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioClip {
    pub handle: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}
