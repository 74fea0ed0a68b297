//! Seam to the external recognition / translation / synthesis engine.
//!
//! The engine pushes recognition events into the sender it is handed when a
//! recognition stream is opened; the session controller is the only consumer.

use async_trait::async_trait;
use log::{debug, warn};
use shared::Credentials;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to open {0}")]
    Open(String),
    #[error("synthesis failed: {0}")]
    Synthesis(String),
    #[error("failed to close {0}")]
    Close(String),
}

/// Why the engine finalized an utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalReason {
    TranslatedSpeech,
    RecognizedSpeech,
    NoMatch,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    Interim(String),
    Final {
        reason: FinalReason,
        text: String,
        translations: HashMap<String, String>,
    },
    Canceled(Option<String>),
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionRequest {
    pub credentials: Credentials,
    pub source_locale: String,
    pub target_language: String,
    pub input_device: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisSetup {
    pub credentials: Credentials,
    pub voice: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisOutcome {
    Completed { data: Vec<u8>, mime_type: String },
    Canceled(String),
}

#[async_trait]
pub trait RecognitionHandle: Send {
    async fn close(self: Box<Self>) -> Result<(), EngineError>;
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<SynthesisOutcome, EngineError>;

    async fn close(&self) -> Result<(), EngineError>;
}

#[async_trait]
pub trait SpeechEngine: Send + Sync {
    async fn open_recognition(
        &self,
        request: RecognitionRequest,
        events: mpsc::Sender<RecognitionEvent>,
    ) -> Result<Box<dyn RecognitionHandle>, EngineError>;

    async fn open_synthesizer(
        &self,
        setup: SynthesisSetup,
    ) -> Result<Arc<dyn Synthesizer>, EngineError>;
}

/// Offline engine for exercising the daemon without a speech service.
///
/// Recognition replays a script of utterances, one every `pace`, then stays
/// silent until closed. Synthesis renders silence as a 16 kHz mono WAV,
/// roughly 60 ms per character of text.
#[derive(Debug, Default)]
pub struct DryRunEngine {
    script: Arc<Vec<ScriptStep>>,
    pace: Duration,
}

/// One line of a dry-run script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    Speech {
        text: String,
        translation: Option<String>,
    },
    NoMatch,
    Cancel(Option<String>),
    End,
}

/// Parses a dry-run script.
///
/// ```text
/// # comment
/// Good morning => Bonjour
/// heard but not translated
/// !nomatch
/// !cancel Quota exceeded
/// !end
/// ```
pub fn parse_script(content: &str) -> Vec<ScriptStep> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match line.strip_prefix('!') {
            Some(directive) => {
                let (name, rest) = directive.split_once(' ').unwrap_or((directive, ""));
                let rest = rest.trim();
                match name {
                    "nomatch" => Some(ScriptStep::NoMatch),
                    "end" => Some(ScriptStep::End),
                    "cancel" => Some(ScriptStep::Cancel(
                        (!rest.is_empty()).then(|| rest.to_string()),
                    )),
                    _ => {
                        warn!("Ignoring unknown script directive '!{}'", name);
                        None
                    }
                }
            }
            None => {
                let (text, translation) = match line.split_once("=>") {
                    Some((text, translation)) => (text, Some(translation.trim())),
                    None => (line, None),
                };
                Some(ScriptStep::Speech {
                    text: text.trim().to_string(),
                    translation: translation
                        .filter(|t| !t.is_empty())
                        .map(str::to_string),
                })
            }
        })
        .collect()
}

impl DryRunEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(script: Vec<ScriptStep>, pace: Duration) -> Self {
        Self {
            script: Arc::new(script),
            pace,
        }
    }
}

const DRY_RUN_SAMPLE_RATE: u32 = 16000;
const DRY_RUN_MS_PER_CHAR: u32 = 60;
const DRY_RUN_MAX_MS: u32 = 30_000;

struct DryRunRecognition {
    feeder: JoinHandle<()>,
}

#[async_trait]
impl RecognitionHandle for DryRunRecognition {
    async fn close(self: Box<Self>) -> Result<(), EngineError> {
        self.feeder.abort();
        Ok(())
    }
}

async fn replay(
    script: Arc<Vec<ScriptStep>>,
    pace: Duration,
    target_language: String,
    events: mpsc::Sender<RecognitionEvent>,
) {
    for step in script.iter() {
        tokio::time::sleep(pace).await;
        let event = match step {
            ScriptStep::Speech { text, translation } => {
                if events.send(RecognitionEvent::Interim(text.clone())).await.is_err() {
                    return;
                }
                match translation {
                    Some(translation) => RecognitionEvent::Final {
                        reason: FinalReason::TranslatedSpeech,
                        text: text.clone(),
                        translations: HashMap::from([(
                            target_language.clone(),
                            translation.clone(),
                        )]),
                    },
                    None => RecognitionEvent::Final {
                        reason: FinalReason::RecognizedSpeech,
                        text: text.clone(),
                        translations: HashMap::new(),
                    },
                }
            }
            ScriptStep::NoMatch => RecognitionEvent::Final {
                reason: FinalReason::NoMatch,
                text: String::new(),
                translations: HashMap::new(),
            },
            ScriptStep::Cancel(reason) => RecognitionEvent::Canceled(reason.clone()),
            ScriptStep::End => RecognitionEvent::Ended,
        };
        if events.send(event).await.is_err() {
            return;
        }
    }
    // Dropping the sender would read as the stream ending.
    events.closed().await;
}

struct DryRunSynthesizer;

#[async_trait]
impl Synthesizer for DryRunSynthesizer {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<SynthesisOutcome, EngineError> {
        let chars = text.chars().count();
        debug!("Dry-run synthesis of {} chars with {}", chars, voice);
        let chars = u32::try_from(chars).unwrap_or(u32::MAX).max(1);
        let millis = DRY_RUN_MS_PER_CHAR.saturating_mul(chars).min(DRY_RUN_MAX_MS);
        let data = silent_wav(millis).map_err(|e| EngineError::Synthesis(e.to_string()))?;
        Ok(SynthesisOutcome::Completed {
            data,
            mime_type: "audio/wav".to_string(),
        })
    }

    async fn close(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

fn silent_wav(millis: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: DRY_RUN_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let samples = DRY_RUN_SAMPLE_RATE / 1000 * millis;

    let mut buffer = Vec::new();
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut buffer), spec)?;
        for _ in 0..samples {
            writer.write_sample(0i16)?;
        }
        writer.finalize()?;
    }
    Ok(buffer)
}

#[async_trait]
impl SpeechEngine for DryRunEngine {
    async fn open_recognition(
        &self,
        request: RecognitionRequest,
        events: mpsc::Sender<RecognitionEvent>,
    ) -> Result<Box<dyn RecognitionHandle>, EngineError> {
        debug!(
            "Dry-run recognition {} -> {} ({} scripted steps)",
            request.source_locale,
            request.target_language,
            self.script.len()
        );
        let feeder = tokio::spawn(replay(
            self.script.clone(),
            self.pace,
            request.target_language,
            events,
        ));
        Ok(Box::new(DryRunRecognition { feeder }))
    }

    async fn open_synthesizer(
        &self,
        _setup: SynthesisSetup,
    ) -> Result<Arc<dyn Synthesizer>, EngineError> {
        Ok(Arc::new(DryRunSynthesizer))
    }
}
