#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{0}")]
    Config(String),
    #[error("a translation session is already active")]
    AlreadyActive,
    #[error("unable to start translation: {0}")]
    Recognition(String),
    #[error("unable to synthesize the translated audio: {0}")]
    Synthesis(String),
    #[error("translation canceled: {0}")]
    Canceled(String),
    #[error("session was stopped while starting")]
    Interrupted,
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to enumerate {kind} devices: {source}")]
    Enumerate {
        kind: &'static str,
        #[source]
        source: cpal::DevicesError,
    },
}
