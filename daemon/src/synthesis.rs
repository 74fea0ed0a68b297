//! Per-utterance synthesis, one request at a time, and ownership of the
//! single playable audio resource.

use log::{debug, warn};
use parking_lot::Mutex;
use shared::{AudioClip, LogCategory};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::diagnostics::{metadata, DiagnosticLog};
use crate::engine::{SynthesisOutcome, Synthesizer};
use crate::error::SessionError;
use crate::session::{SessionEvent, SessionObserver};

pub const PLAYBACK_CANCELED: &str = "Text synthesized but playback was canceled.";
pub const SYNTHESIS_FAILED: &str = "Unable to synthesize the translated audio.";

/// Table of live audio handles. A handle stays live until its resource is
/// dropped.
#[derive(Debug, Default)]
pub struct AudioRegistry {
    live: Mutex<HashSet<Uuid>>,
}

impl AudioRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(self: &Arc<Self>, data: Vec<u8>, mime_type: String) -> AudioResource {
        let id = Uuid::new_v4();
        self.live.lock().insert(id);
        AudioResource {
            id,
            data,
            mime_type,
            registry: Arc::clone(self),
        }
    }

    fn revoke(&self, id: &Uuid) {
        if self.live.lock().remove(id) {
            debug!("Revoked audio {}", id);
        }
    }

    #[cfg(test)]
    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    #[cfg(test)]
    pub fn is_live(&self, handle: &str) -> bool {
        handle
            .strip_prefix("audio:")
            .and_then(|id| Uuid::parse_str(id).ok())
            .map(|id| self.live.lock().contains(&id))
            .unwrap_or(false)
    }
}

/// One synthesized clip. Dropping it revokes its handle.
#[derive(Debug)]
pub struct AudioResource {
    id: Uuid,
    data: Vec<u8>,
    mime_type: String,
    registry: Arc<AudioRegistry>,
}

impl AudioResource {
    pub fn handle(&self) -> String {
        format!("audio:{}", self.id)
    }

    pub fn clip(&self) -> AudioClip {
        AudioClip {
            handle: self.handle(),
            mime_type: self.mime_type.clone(),
            data: self.data.clone(),
        }
    }
}

impl Drop for AudioResource {
    fn drop(&mut self) {
        self.registry.revoke(&self.id);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    pub text: String,
    pub target_language: String,
}

struct QueueState {
    current: Mutex<Option<AudioResource>>,
    closed: AtomicBool,
}

pub struct SynthesisQueue {
    requests: mpsc::UnboundedSender<SynthesisRequest>,
    state: Arc<QueueState>,
    worker: JoinHandle<()>,
}

struct Worker {
    synthesizer: Arc<dyn Synthesizer>,
    voice: String,
    registry: Arc<AudioRegistry>,
    log: Arc<DiagnosticLog>,
    observer: Arc<dyn SessionObserver>,
    state: Arc<QueueState>,
}

impl SynthesisQueue {
    pub fn spawn(
        synthesizer: Arc<dyn Synthesizer>,
        voice: String,
        registry: Arc<AudioRegistry>,
        log: Arc<DiagnosticLog>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        let (requests, rx) = mpsc::unbounded_channel();
        let state = Arc::new(QueueState {
            current: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        let worker = Worker {
            synthesizer,
            voice,
            registry,
            log,
            observer,
            state: state.clone(),
        };

        Self {
            requests,
            state,
            worker: tokio::spawn(worker.run(rx)),
        }
    }

    /// Queues an utterance behind any in flight. False once shut down.
    pub fn enqueue(&self, request: SynthesisRequest) -> bool {
        if self.state.closed.load(Ordering::SeqCst) {
            return false;
        }
        self.requests.send(request).is_ok()
    }

    pub fn current_handle(&self) -> Option<String> {
        self.state.current.lock().as_ref().map(AudioResource::handle)
    }

    /// Drops pending work and releases the current resource. Idempotent.
    pub fn shutdown(&self) {
        let mut current = self.state.current.lock();
        self.state.closed.store(true, Ordering::SeqCst);
        self.worker.abort();
        if let Some(resource) = current.take() {
            debug!("Releasing {}", resource.handle());
        }
    }
}

impl Drop for SynthesisQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Worker {
    async fn run(self, mut requests: mpsc::UnboundedReceiver<SynthesisRequest>) {
        while let Some(request) = requests.recv().await {
            if self.state.closed.load(Ordering::SeqCst) {
                break;
            }
            let outcome = self.synthesizer.synthesize(&request.text, &self.voice).await;
            self.complete(&request, outcome);
        }
    }

    fn complete(
        &self,
        request: &SynthesisRequest,
        outcome: Result<SynthesisOutcome, crate::engine::EngineError>,
    ) {
        match outcome {
            Ok(SynthesisOutcome::Completed { data, mime_type }) => {
                let mut current = self.state.current.lock();
                if self.state.closed.load(Ordering::SeqCst) {
                    return;
                }
                // The previous clip is revoked before the next is registered.
                current.take();
                let resource = self.registry.register(data, mime_type);
                let clip = resource.clip();
                *current = Some(resource);

                let bytes = clip.data.len().to_string();
                self.log.append_with(
                    LogCategory::Translation,
                    "Translated audio ready",
                    metadata([
                        ("handle", clip.handle.as_str()),
                        ("language", request.target_language.as_str()),
                        ("bytes", bytes.as_str()),
                    ]),
                );
                self.observer.notify(SessionEvent::AudioReady(clip));
            }
            Ok(SynthesisOutcome::Canceled(reason)) => {
                warn!("Synthesis canceled: {}", reason);
                self.log.append_with(
                    LogCategory::Error,
                    PLAYBACK_CANCELED,
                    metadata([("reason", reason.as_str())]),
                );
                self.surface(PLAYBACK_CANCELED.to_string());
            }
            Err(err) => {
                let error = SessionError::Synthesis(err.to_string());
                self.log.append_with(
                    LogCategory::Error,
                    SYNTHESIS_FAILED,
                    metadata([("error", error.to_string().as_str())]),
                );
                self.surface(SYNTHESIS_FAILED.to_string());
            }
        }
    }

    fn surface(&self, message: String) {
        let _current = self.state.current.lock();
        if !self.state.closed.load(Ordering::SeqCst) {
            self.observer.notify(SessionEvent::Error(message));
        }
    }
}
