//! Translation session state machine.
//!
//! `Idle → Starting → Active → Stopping → Idle`; a stop that lands during
//! `Starting` also passes through `Stopping`. The engine delivers events on
//! one ordered channel per session; a single task consumes it. Every event is
//! checked against the session generation under the controller lock, so
//! callbacks from a session that is already stopping are dropped.

use log::{debug, info, warn};
use parking_lot::Mutex;
use shared::{locale, AudioClip, Catalog, Credentials, LogCategory, SessionConfig, SessionState};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::diagnostics::{metadata, DiagnosticLog};
use crate::engine::{
    FinalReason, RecognitionEvent, RecognitionHandle, RecognitionRequest, SpeechEngine,
    SynthesisSetup, Synthesizer,
};
use crate::error::SessionError;
use crate::synthesis::{AudioRegistry, SynthesisQueue, SynthesisRequest};

const EVENT_CHANNEL_CAPACITY: usize = 64;
const START_FAILED: &str = "Unable to start translation. Check mic permissions.";
const DEFAULT_CANCEL_REASON: &str = "Translation canceled.";

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// Transcript, translation and error from the previous run are void.
    Cleared,
    Transcript(String),
    Translation(String),
    AudioReady(AudioClip),
    Error(String),
}

/// Receives session side effects.
///
/// Called with controller or queue locks held: implementations must not block
/// and must not call back into the controller.
pub trait SessionObserver: Send + Sync {
    fn notify(&self, event: SessionEvent);
}

struct ActiveSession {
    id: Uuid,
    config: SessionConfig,
    target_code: String,
    recognition: Box<dyn RecognitionHandle>,
    synthesizer: Arc<dyn Synthesizer>,
    queue: SynthesisQueue,
    shutdown: oneshot::Sender<()>,
}

struct Inner {
    state: SessionState,
    generation: u64,
    active: Option<ActiveSession>,
}

impl Inner {
    fn is_live(&self, generation: u64) -> bool {
        self.generation == generation && self.state == SessionState::Active
    }

    fn is_starting(&self, generation: u64) -> bool {
        self.generation == generation && self.state == SessionState::Starting
    }

    /// Stopping with no session to tear down: a stop interrupted a start and
    /// waits for it to close its handles.
    fn is_releasing_start(&self) -> bool {
        self.state == SessionState::Stopping && self.active.is_none()
    }
}

/// Proof that `reserve` moved the controller to `Starting`.
#[derive(Debug)]
pub struct StartTicket {
    generation: u64,
}

enum StopPlan {
    Done,
    WaitForIdle,
    Teardown(ActiveSession),
}

#[derive(Clone)]
pub struct SessionController {
    engine: Arc<dyn SpeechEngine>,
    catalog: Arc<Catalog>,
    log: Arc<DiagnosticLog>,
    observer: Arc<dyn SessionObserver>,
    registry: Arc<AudioRegistry>,
    inner: Arc<Mutex<Inner>>,
    state: Arc<watch::Sender<SessionState>>,
}

/// Checks what `start` needs before anything is opened.
pub fn validate(
    config: &SessionConfig,
    credentials: Option<Credentials>,
) -> Result<Credentials, SessionError> {
    let credentials = credentials
        .filter(|c| !c.api_key.trim().is_empty() && !c.region.trim().is_empty())
        .ok_or_else(|| SessionError::Config("Missing speech key or region".to_string()))?;
    if config.voice.trim().is_empty() {
        return Err(SessionError::Config(
            "Please select a voice for the target language".to_string(),
        ));
    }
    Ok(credentials)
}

impl SessionController {
    pub fn new(
        engine: Arc<dyn SpeechEngine>,
        catalog: Arc<Catalog>,
        log: Arc<DiagnosticLog>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            engine,
            catalog,
            log,
            observer,
            registry: AudioRegistry::new(),
            inner: Arc::new(Mutex::new(Inner {
                state: SessionState::Idle,
                generation: 0,
                active: None,
            })),
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Watch channel mirroring `state()`.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.inner.lock().active.as_ref().map(|a| a.id)
    }

    pub fn session_config(&self) -> Option<SessionConfig> {
        self.inner.lock().active.as_ref().map(|a| a.config.clone())
    }

    pub fn current_audio(&self) -> Option<String> {
        self.inner
            .lock()
            .active
            .as_ref()
            .and_then(|a| a.queue.current_handle())
    }

    #[cfg(test)]
    pub fn registry(&self) -> &Arc<AudioRegistry> {
        &self.registry
    }

    fn set_state(&self, inner: &mut Inner, state: SessionState) {
        if inner.state == state {
            return;
        }
        debug!("session state: {:?} -> {:?}", inner.state, state);
        inner.state = state;
        self.state.send_replace(state);
        self.observer.notify(SessionEvent::StateChanged(state));
    }

    /// Opens the engine handles and returns once the session is `Active`.
    /// Recognition runs in the background from then on.
    pub async fn start(
        &self,
        config: SessionConfig,
        credentials: Option<Credentials>,
    ) -> Result<Uuid, SessionError> {
        let credentials = validate(&config, credentials)?;
        let ticket = self.reserve()?;
        self.start_reserved(ticket, config, credentials).await
    }

    /// Claims the controller for a start: `Idle → Starting`, synchronously.
    ///
    /// A `stop` issued after this returns waits for the matching
    /// `start_reserved` to give up before it reports `Idle`.
    pub fn reserve(&self) -> Result<StartTicket, SessionError> {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Idle {
            warn!("Start rejected, session is {:?}", inner.state);
            return Err(SessionError::AlreadyActive);
        }
        inner.generation += 1;
        self.set_state(&mut inner, SessionState::Starting);
        self.observer.notify(SessionEvent::Cleared);
        Ok(StartTicket {
            generation: inner.generation,
        })
    }

    /// Finishes a start claimed with `reserve`.
    pub async fn start_reserved(
        &self,
        ticket: StartTicket,
        config: SessionConfig,
        credentials: Credentials,
    ) -> Result<Uuid, SessionError> {
        let generation = ticket.generation;
        let current = self.inner.lock().is_starting(generation);
        if !current {
            info!("Start abandoned before opening the engine");
            self.release_interrupted();
            return Err(SessionError::Interrupted);
        }

        let source_locale = locale::source_locale(&self.catalog, &config.source_language);
        let target_code = locale::base_language(&config.target_language).to_string();
        self.log.append_with(
            LogCategory::Settings,
            "Session configured",
            metadata([
                ("source_locale", source_locale.as_str()),
                ("target", target_code.as_str()),
                ("voice", config.voice.as_str()),
                ("input", config.input_device.as_deref().unwrap_or("default")),
            ]),
        );

        let synthesizer = match self
            .engine
            .open_synthesizer(SynthesisSetup {
                credentials: credentials.clone(),
                voice: config.voice.clone(),
            })
            .await
        {
            Ok(synthesizer) => synthesizer,
            Err(err) => return Err(self.abort_start(generation, err.to_string())),
        };

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let request = RecognitionRequest {
            credentials,
            source_locale,
            target_language: target_code.clone(),
            input_device: config.input_device.clone(),
        };
        let recognition = match self.engine.open_recognition(request, events_tx).await {
            Ok(recognition) => recognition,
            Err(err) => {
                self.close_synthesizer(synthesizer).await;
                return Err(self.abort_start(generation, err.to_string()));
            }
        };

        let id = Uuid::new_v4();
        {
            let mut inner = self.inner.lock();
            if inner.is_starting(generation) {
                let (shutdown, shutdown_rx) = oneshot::channel();
                let queue = SynthesisQueue::spawn(
                    synthesizer.clone(),
                    config.voice.clone(),
                    self.registry.clone(),
                    self.log.clone(),
                    self.observer.clone(),
                );
                inner.active = Some(ActiveSession {
                    id,
                    config,
                    target_code,
                    recognition,
                    synthesizer,
                    queue,
                    shutdown,
                });
                self.set_state(&mut inner, SessionState::Active);
                self.spawn_event_loop(generation, events_rx, shutdown_rx);
                self.log.append_with(
                    LogCategory::Status,
                    "Translation started",
                    metadata([("session", id.to_string().as_str())]),
                );
                return Ok(id);
            }
        }

        // Stopped while the handles were opening.
        info!("Session {} stopped before it became active", id);
        self.close_recognition(recognition).await;
        self.close_synthesizer(synthesizer).await;
        self.release_interrupted();
        Err(SessionError::Interrupted)
    }

    /// A stop hit this start while it was opening: everything it opened is
    /// closed, so the waiting stop can complete.
    fn release_interrupted(&self) {
        let mut inner = self.inner.lock();
        if inner.is_releasing_start() {
            self.set_state(&mut inner, SessionState::Idle);
        }
    }

    fn abort_start(&self, generation: u64, reason: String) -> SessionError {
        {
            let mut inner = self.inner.lock();
            // A stop may be waiting on this start.
            if inner.is_starting(generation) || inner.is_releasing_start() {
                self.set_state(&mut inner, SessionState::Idle);
            }
            self.observer.notify(SessionEvent::Error(START_FAILED.to_string()));
        }
        self.log.append_with(
            LogCategory::Error,
            START_FAILED,
            metadata([("error", reason.as_str())]),
        );
        SessionError::Recognition(reason)
    }

    /// Ends the session, if any. Safe to call from any state and any number
    /// of times; the session is `Idle` when this returns.
    pub async fn stop(&self) {
        self.stop_session(None).await;
    }

    async fn stop_session(&self, generation: Option<u64>) {
        let plan = {
            let mut inner = self.inner.lock();
            match (generation, inner.state) {
                (Some(g), _) if g != inner.generation => StopPlan::Done,
                (_, SessionState::Idle) => StopPlan::Done,
                (_, SessionState::Stopping) => StopPlan::WaitForIdle,
                (_, SessionState::Starting) => {
                    // The pending start sees the new generation, closes what it
                    // opened and only then moves to Idle.
                    inner.generation += 1;
                    self.set_state(&mut inner, SessionState::Stopping);
                    StopPlan::WaitForIdle
                }
                (_, SessionState::Active) => {
                    inner.generation += 1;
                    self.set_state(&mut inner, SessionState::Stopping);
                    match inner.active.take() {
                        Some(active) => StopPlan::Teardown(active),
                        None => {
                            self.set_state(&mut inner, SessionState::Idle);
                            StopPlan::Done
                        }
                    }
                }
            }
        };

        match plan {
            StopPlan::Done => {}
            StopPlan::WaitForIdle => {
                let mut state = self.subscribe();
                let reached = state.wait_for(SessionState::is_idle).await.is_ok();
                if !reached {
                    warn!("State channel closed while waiting for stop");
                }
            }
            StopPlan::Teardown(active) => self.teardown(active).await,
        }
    }

    async fn teardown(&self, active: ActiveSession) {
        let ActiveSession {
            id,
            recognition,
            synthesizer,
            queue,
            shutdown,
            ..
        } = active;

        let _ = shutdown.send(());
        queue.shutdown();
        drop(queue);

        self.close_recognition(recognition).await;
        self.close_synthesizer(synthesizer).await;

        {
            let mut inner = self.inner.lock();
            self.set_state(&mut inner, SessionState::Idle);
        }
        self.log.append_with(
            LogCategory::Status,
            "Translation stopped",
            metadata([("session", id.to_string().as_str())]),
        );
    }

    async fn close_recognition(&self, recognition: Box<dyn RecognitionHandle>) {
        if let Err(err) = recognition.close().await {
            self.log.append(LogCategory::Error, err.to_string());
        }
    }

    async fn close_synthesizer(&self, synthesizer: Arc<dyn Synthesizer>) {
        if let Err(err) = synthesizer.close().await {
            self.log.append(LogCategory::Error, err.to_string());
        }
    }

    fn spawn_event_loop(
        &self,
        generation: u64,
        mut events: mpsc::Receiver<RecognitionEvent>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let controller = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown => break,
                    event = events.recv() => {
                        let keep_going = match event {
                            Some(event) => controller.handle_event(generation, event).await,
                            None => {
                                controller.on_ended(generation).await;
                                false
                            }
                        };
                        if !keep_going {
                            break;
                        }
                    }
                }
            }
            debug!("Event loop for generation {} finished", generation);
        });
    }

    /// Returns false once the event ended the session.
    async fn handle_event(&self, generation: u64, event: RecognitionEvent) -> bool {
        match event {
            RecognitionEvent::Interim(text) => {
                self.on_interim(generation, text);
                true
            }
            RecognitionEvent::Final {
                reason,
                text,
                translations,
            } => {
                self.on_final(generation, reason, text, translations);
                true
            }
            RecognitionEvent::Canceled(reason) => {
                self.on_canceled(generation, reason).await;
                false
            }
            RecognitionEvent::Ended => {
                self.on_ended(generation).await;
                false
            }
        }
    }

    fn on_interim(&self, generation: u64, text: String) {
        let inner = self.inner.lock();
        if !inner.is_live(generation) {
            debug!("Dropping interim result from a closed session");
            return;
        }
        self.observer.notify(SessionEvent::Transcript(text));
    }

    fn on_final(
        &self,
        generation: u64,
        reason: FinalReason,
        text: String,
        translations: HashMap<String, String>,
    ) {
        let inner = self.inner.lock();
        let Some(active) = inner.active.as_ref().filter(|_| inner.is_live(generation)) else {
            debug!("Dropping final result from a closed session");
            return;
        };
        if reason != FinalReason::TranslatedSpeech {
            debug!("Ignoring final result with reason {:?}", reason);
            return;
        }
        let Some(translated) = translations
            .get(&active.target_code)
            .filter(|t| !t.is_empty())
        else {
            debug!("No {} translation in final result", active.target_code);
            return;
        };

        self.log.append(LogCategory::Speech, text);
        self.log.append_with(
            LogCategory::Translation,
            translated.clone(),
            metadata([("language", active.target_code.as_str())]),
        );
        self.observer
            .notify(SessionEvent::Translation(translated.clone()));

        let request = SynthesisRequest {
            text: translated.clone(),
            target_language: active.config.target_language.clone(),
        };
        if !active.queue.enqueue(request) {
            warn!("Synthesis queue closed, dropping utterance");
        }
    }

    async fn on_canceled(&self, generation: u64, reason: Option<String>) {
        let message = reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());
        {
            let inner = self.inner.lock();
            if !inner.is_live(generation) {
                return;
            }
            self.observer.notify(SessionEvent::Error(message.clone()));
        }
        let error = SessionError::Canceled(message);
        self.log.append(LogCategory::Error, error.to_string());
        self.stop_session(Some(generation)).await;
    }

    async fn on_ended(&self, generation: u64) {
        if !self.inner.lock().is_live(generation) {
            return;
        }
        self.log
            .append(LogCategory::Status, "Recognition session ended");
        self.stop_session(Some(generation)).await;
    }
}
