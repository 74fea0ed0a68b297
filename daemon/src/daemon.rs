use log::{debug, error, info};
use shared::locale;
use shared::{
    Catalog, ClientMessage, Config, DaemonMessage, DaemonStatus, LogCategory, Preferences,
    SessionConfig, StartRequest,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Notify, RwLock};

use crate::countdown::CountdownGate;
use crate::devices;
use crate::diagnostics::{metadata, DiagnosticLog};
use crate::engine::SpeechEngine;
use crate::error::SessionError;
use crate::playback::Player;
use crate::session::{validate, SessionController, SessionEvent, SessionObserver};

const EVENT_BUFFER: usize = 256;

/// Fans session events out to IPC subscribers and to local playback.
pub struct DaemonObserver {
    events: broadcast::Sender<DaemonMessage>,
    player: Option<Player>,
}

impl SessionObserver for DaemonObserver {
    fn notify(&self, event: SessionEvent) {
        let message = match event {
            SessionEvent::StateChanged(state) => {
                if state.is_idle() {
                    if let Some(player) = &self.player {
                        player.stop();
                    }
                }
                DaemonMessage::StateChanged(state)
            }
            SessionEvent::Cleared => {
                let _ = self.events.send(DaemonMessage::Transcript(String::new()));
                DaemonMessage::Translation(String::new())
            }
            SessionEvent::Transcript(text) => DaemonMessage::Transcript(text),
            SessionEvent::Translation(text) => DaemonMessage::Translation(text),
            SessionEvent::AudioReady(clip) => {
                if let Some(player) = &self.player {
                    player.play(clip.clone());
                }
                DaemonMessage::AudioReady(clip)
            }
            SessionEvent::Error(message) => DaemonMessage::Error(message),
        };
        // No subscribers is fine.
        let _ = self.events.send(message);
    }
}

pub struct Daemon {
    config: Config,
    catalog: Arc<Catalog>,
    controller: SessionController,
    log: Arc<DiagnosticLog>,
    countdown: CountdownGate,
    events: broadcast::Sender<DaemonMessage>,
    preferences: RwLock<Preferences>,
    persist_preferences: bool,
    shutdown: Notify,
    start_time: Instant,
}

impl Daemon {
    pub fn new(
        config: Config,
        catalog: Catalog,
        engine: Arc<dyn SpeechEngine>,
        preferences: Preferences,
    ) -> Self {
        let log = Arc::new(DiagnosticLog::new());
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        let player = if config.audio.playback {
            match Player::spawn(config.audio.output_device.clone()) {
                Ok(player) => Some(player),
                Err(e) => {
                    log.append(
                        LogCategory::Error,
                        format!("Playback disabled: {:#}", e),
                    );
                    None
                }
            }
        } else {
            None
        };

        let catalog = Arc::new(catalog);
        let observer = Arc::new(DaemonObserver {
            events: events.clone(),
            player,
        });
        let controller =
            SessionController::new(engine, catalog.clone(), log.clone(), observer);

        Self {
            config,
            catalog,
            controller,
            log,
            countdown: CountdownGate::new(),
            events,
            preferences: RwLock::new(preferences),
            persist_preferences: true,
            shutdown: Notify::new(),
            start_time: Instant::now(),
        }
    }

    /// Keeps preference changes in memory only.
    #[cfg(test)]
    pub fn without_persistence(mut self) -> Self {
        self.persist_preferences = false;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DaemonMessage> {
        self.events.subscribe()
    }

    pub async fn wait_for_shutdown(&self) {
        self.shutdown.notified().await;
    }

    pub async fn handle_message(&self, message: ClientMessage) -> DaemonMessage {
        debug!("Handling client message: {:?}", message);

        match message {
            ClientMessage::StartTranslation(request) => self.start_translation(request).await,
            ClientMessage::StopTranslation => self.stop_translation().await,
            ClientMessage::CancelCountdown => {
                if self.countdown.cancel() {
                    self.log.append(LogCategory::Status, "Countdown canceled");
                    let _ = self.events.send(DaemonMessage::CountdownCanceled);
                    DaemonMessage::CountdownCanceled
                } else {
                    DaemonMessage::Error("No countdown is running".to_string())
                }
            }
            ClientMessage::GetStatus => self.get_status().await,
            ClientMessage::GetLogs => DaemonMessage::Logs(self.log.entries()),
            ClientMessage::ClearLogs => {
                self.log.clear();
                DaemonMessage::LogsCleared
            }
            ClientMessage::ListDevices => DaemonMessage::Devices(devices::enumerate(&self.log)),
            ClientMessage::ListLanguages => {
                DaemonMessage::Languages(locale::language_options(&self.catalog))
            }
            ClientMessage::ListVoices { language } => {
                DaemonMessage::Voices(locale::voices_for_language(&self.catalog, &language))
            }
            ClientMessage::GetPreferences => {
                DaemonMessage::Preferences(self.preferences.read().await.clone())
            }
            ClientMessage::SetPreferences(preferences) => self.set_preferences(preferences).await,
            ClientMessage::Subscribe => DaemonMessage::Subscribed,
            ClientMessage::Shutdown => {
                info!("Received shutdown command");
                self.shutdown().await;
                DaemonMessage::TranslationStopped
            }
        }
    }

    /// Stops everything in flight and wakes `wait_for_shutdown`.
    pub async fn shutdown(&self) {
        self.countdown.cancel();
        self.controller.stop().await;
        self.shutdown.notify_one();
    }

    fn session_config(&self, request: &StartRequest) -> SessionConfig {
        let defaults = &self.config.session;
        let source_language = request
            .source_language
            .clone()
            .unwrap_or_else(|| defaults.source_language.clone());
        let target_language = request
            .target_language
            .clone()
            .unwrap_or_else(|| defaults.target_language.clone());

        let voice = request
            .voice
            .clone()
            .or_else(|| {
                (request.target_language.is_none())
                    .then(|| defaults.voice.clone())
                    .flatten()
            })
            .or_else(|| {
                let voices = locale::voices_for_language(&self.catalog, &target_language);
                locale::default_voice(&voices).map(|v| v.short_name.clone())
            })
            .unwrap_or_default();

        let configured = request
            .input_device
            .as_deref()
            .or(self.config.audio.input_device.as_deref());
        let input_device = match configured {
            Some(id) => Some(id.to_string()),
            None => devices::resolve_input(&devices::enumerate(&self.log), None),
        };

        SessionConfig {
            source_language,
            target_language,
            voice,
            input_device,
        }
    }

    async fn start_translation(&self, request: StartRequest) -> DaemonMessage {
        let config = self.session_config(&request);
        let credentials = self.config.credentials();

        if let Err(e) = validate(&config, credentials.clone()) {
            self.log.append(LogCategory::Error, e.to_string());
            return DaemonMessage::Error(e.to_string());
        }
        if self.countdown.is_counting() || !self.controller.state().is_idle() {
            return DaemonMessage::Error(SessionError::AlreadyActive.to_string());
        }

        self.log.append_with(
            LogCategory::Settings,
            format!(
                "Translating {} to {}",
                locale::language_display_name(&self.catalog, &config.source_language),
                locale::language_display_name(&self.catalog, &config.target_language),
            ),
            metadata([("voice", config.voice.as_str())]),
        );

        let seconds = match request.countdown_seconds {
            Some(seconds) => seconds,
            None => self.preferences.read().await.countdown_seconds(),
        };
        if seconds == 0 {
            return match self.controller.start(config, credentials).await {
                Ok(id) => DaemonMessage::TranslationStarted(id),
                Err(e) => DaemonMessage::Error(e.to_string()),
            };
        }

        self.log.append(
            LogCategory::Status,
            format!("Starting in {} seconds", seconds),
        );
        let ticks = self.events.clone();
        let events = self.events.clone();
        let controller = self.controller.clone();
        self.countdown.begin(
            seconds,
            move |remaining| {
                let _ = ticks.send(DaemonMessage::CountdownTick { remaining });
            },
            move || {
                // The controller is `Starting` before this returns, so a stop
                // arriving after the last tick waits for the start to unwind.
                let claimed = validate(&config, credentials)
                    .and_then(|credentials| Ok((controller.reserve()?, credentials)));
                let (ticket, credentials) = match claimed {
                    Ok(claimed) => claimed,
                    Err(e) => {
                        error!("Deferred start failed: {}", e);
                        let _ = events.send(DaemonMessage::Error(e.to_string()));
                        return;
                    }
                };
                tokio::spawn(async move {
                    let message = match controller.start_reserved(ticket, config, credentials).await
                    {
                        Ok(id) => DaemonMessage::TranslationStarted(id),
                        Err(SessionError::Interrupted) => {
                            debug!("Deferred start was stopped");
                            return;
                        }
                        Err(e) => {
                            error!("Deferred start failed: {}", e);
                            DaemonMessage::Error(e.to_string())
                        }
                    };
                    let _ = events.send(message);
                });
            },
        );
        DaemonMessage::CountdownStarted { seconds }
    }

    async fn stop_translation(&self) -> DaemonMessage {
        if self.countdown.cancel() {
            let _ = self.events.send(DaemonMessage::CountdownCanceled);
        }
        self.controller.stop().await;
        let _ = self.events.send(DaemonMessage::TranslationStopped);
        DaemonMessage::TranslationStopped
    }

    async fn set_preferences(&self, preferences: Preferences) -> DaemonMessage {
        if self.persist_preferences {
            if let Err(e) = shared::save_preferences(&preferences) {
                self.log
                    .append(LogCategory::Error, format!("Failed to save preferences: {}", e));
                return DaemonMessage::Error(e.to_string());
            }
        }
        let countdown = preferences.countdown_seconds().to_string();
        let expanded = preferences.logs_expanded().to_string();
        self.log.append_with(
            LogCategory::Settings,
            "Preferences updated",
            metadata([
                ("countdown_seconds", countdown.as_str()),
                ("logs_expanded", expanded.as_str()),
            ]),
        );
        *self.preferences.write().await = preferences.clone();
        DaemonMessage::Preferences(preferences)
    }

    async fn get_status(&self) -> DaemonMessage {
        DaemonMessage::Status(DaemonStatus {
            state: self.controller.state(),
            session_id: self.controller.session_id(),
            session: self.controller.session_config(),
            countdown_remaining: self.countdown.remaining(),
            current_audio: self.controller.current_audio(),
            log_entries: self.log.len(),
            uptime: self.start_time.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{parse_script, DryRunEngine};
    use shared::SessionState;
    use std::time::Duration;

    fn daemon(with_credentials: bool) -> Daemon {
        daemon_with(with_credentials, DryRunEngine::new())
    }

    fn daemon_with(with_credentials: bool, engine: DryRunEngine) -> Daemon {
        let mut config = Config::default();
        config.audio.playback = false;
        config.audio.input_device = Some("Test Mic".to_string());
        if with_credentials {
            config.speech.api_key = Some("key".to_string());
            config.speech.region = Some("westeurope".to_string());
        }
        Daemon::new(
            config,
            Catalog::builtin().unwrap(),
            Arc::new(engine),
            Preferences::default(),
        )
        .without_persistence()
    }

    fn start(countdown: u32) -> ClientMessage {
        ClientMessage::StartTranslation(StartRequest {
            target_language: Some("fr".to_string()),
            countdown_seconds: Some(countdown),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn missing_credentials_are_reported() {
        let daemon = daemon(false);
        let reply = daemon.handle_message(start(0)).await;
        assert!(matches!(reply, DaemonMessage::Error(m) if m.contains("key or region")));
        assert_eq!(daemon.log.entries()[0].category, LogCategory::Error);
    }

    #[tokio::test]
    async fn start_picks_default_voice_and_stop_returns_to_idle() {
        let daemon = daemon(true);
        let reply = daemon.handle_message(start(0)).await;
        assert!(matches!(reply, DaemonMessage::TranslationStarted(_)));

        let session = daemon.controller.session_config().unwrap();
        assert_eq!(session.voice, "fr-FR-DeniseNeural");
        assert_eq!(session.input_device.as_deref(), Some("Test Mic"));

        let again = daemon.handle_message(start(0)).await;
        assert!(matches!(again, DaemonMessage::Error(_)));

        daemon.handle_message(ClientMessage::StopTranslation).await;
        match daemon.handle_message(ClientMessage::GetStatus).await {
            DaemonMessage::Status(status) => {
                assert_eq!(status.state, SessionState::Idle);
                assert!(status.session_id.is_none());
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_defers_start_and_can_be_canceled() {
        let daemon = daemon(true);
        let mut events = daemon.subscribe();

        let reply = daemon.handle_message(start(3)).await;
        assert!(matches!(reply, DaemonMessage::CountdownStarted { seconds: 3 }));
        assert!(matches!(
            events.recv().await.unwrap(),
            DaemonMessage::CountdownTick { remaining: 3 }
        ));

        let reply = daemon.handle_message(ClientMessage::CancelCountdown).await;
        assert!(matches!(reply, DaemonMessage::CountdownCanceled));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(daemon.controller.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_fires_into_a_session() {
        let daemon = daemon(true);
        let mut events = daemon.subscribe();

        daemon.handle_message(start(2)).await;
        loop {
            match events.recv().await.unwrap() {
                DaemonMessage::TranslationStarted(_) => break,
                DaemonMessage::Error(e) => panic!("start failed: {}", e),
                _ => {}
            }
        }
        assert_eq!(daemon.controller.state(), SessionState::Active);
        daemon.shutdown().await;
        assert_eq!(daemon.controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn preferences_round_trip_in_memory() {
        let daemon = daemon(false);
        let prefs = Preferences {
            countdown_seconds: Some(4),
            logs_expanded: Some(true),
        };
        daemon
            .handle_message(ClientMessage::SetPreferences(prefs.clone()))
            .await;
        match daemon.handle_message(ClientMessage::GetPreferences).await {
            DaemonMessage::Preferences(stored) => assert_eq!(stored, prefs),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn voices_and_languages_come_from_the_catalog() {
        let daemon = daemon(false);
        match daemon
            .handle_message(ClientMessage::ListVoices {
                language: "zh-Hant".to_string(),
            })
            .await
        {
            DaemonMessage::Voices(voices) => {
                assert!(!voices.is_empty());
                assert!(voices
                    .iter()
                    .all(|v| v.locale == "zh-TW" || v.locale == "zh-HK"));
            }
            other => panic!("unexpected reply {:?}", other),
        }
        assert!(matches!(
            daemon.handle_message(ClientMessage::ListLanguages).await,
            DaemonMessage::Languages(options) if !options.is_empty()
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_right_after_the_countdown_fires_is_honored() {
        let daemon = daemon(true);
        let mut events = daemon.subscribe();

        daemon.handle_message(start(1)).await;
        loop {
            if let DaemonMessage::CountdownTick { remaining: 0 } = events.recv().await.unwrap() {
                break;
            }
        }
        // The deferred start has been claimed but has not run yet.
        let reply = daemon.handle_message(ClientMessage::StopTranslation).await;
        assert!(matches!(reply, DaemonMessage::TranslationStopped));
        assert_eq!(daemon.controller.state(), SessionState::Idle);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(daemon.controller.state(), SessionState::Idle);
        assert!(daemon.controller.session_id().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn scripted_speech_flows_through_to_audio() {
        let engine = DryRunEngine::with_script(
            parse_script("Good morning => Bonjour\nnot translated\n!end"),
            Duration::from_millis(100),
        );
        let daemon = daemon_with(true, engine);
        let mut events = daemon.subscribe();

        let reply = daemon.handle_message(start(0)).await;
        assert!(matches!(reply, DaemonMessage::TranslationStarted(_)));

        let mut seen = Vec::new();
        loop {
            match events.recv().await.unwrap() {
                DaemonMessage::StateChanged(SessionState::Idle) => break,
                DaemonMessage::Transcript(text) if !text.is_empty() => {
                    seen.push(format!("transcript:{}", text))
                }
                DaemonMessage::Translation(text) if !text.is_empty() => {
                    seen.push(format!("translation:{}", text))
                }
                DaemonMessage::AudioReady(clip) => {
                    assert_eq!(clip.mime_type, "audio/wav");
                    seen.push("audio".to_string());
                }
                _ => {}
            }
        }
        assert_eq!(
            seen,
            vec![
                "transcript:Good morning",
                "translation:Bonjour",
                "audio",
                "transcript:not translated",
            ]
        );
        assert!(daemon
            .log
            .entries()
            .iter()
            .any(|e| e.category == LogCategory::Speech && e.message == "Good morning"));
    }
}
