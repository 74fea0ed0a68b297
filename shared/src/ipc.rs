use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::preferences::Preferences;
use crate::types::{
    AudioClip, DeviceList, LanguageOption, LocaleVoice, LogEntry, SessionConfig, SessionState,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartRequest {
    /// Falls back to the daemon's configured defaults when unset.
    pub source_language: Option<String>,
    pub target_language: Option<String>,
    pub voice: Option<String>,
    pub input_device: Option<String>,
    /// Overrides the persisted countdown preference.
    pub countdown_seconds: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    StartTranslation(StartRequest),
    StopTranslation,
    CancelCountdown,
    GetStatus,
    GetLogs,
    ClearLogs,
    ListDevices,
    ListLanguages,
    ListVoices { language: String },
    GetPreferences,
    SetPreferences(Preferences),
    Subscribe,
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DaemonMessage {
    TranslationStarted(Uuid),
    TranslationStopped,
    CountdownStarted { seconds: u32 },
    CountdownTick { remaining: u32 },
    CountdownCanceled,
    StateChanged(SessionState),
    Transcript(String),
    Translation(String),
    AudioReady(AudioClip),
    Status(DaemonStatus),
    Logs(Vec<LogEntry>),
    LogsCleared,
    Devices(DeviceList),
    Languages(Vec<LanguageOption>),
    Voices(Vec<LocaleVoice>),
    Preferences(Preferences),
    Subscribed,
    Error(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub state: SessionState,
    pub session_id: Option<Uuid>,
    pub session: Option<SessionConfig>,
    pub countdown_remaining: Option<u32>,
    pub current_audio: Option<String>,
    pub log_entries: usize,
    pub uptime: std::time::Duration,
}

pub mod protocol {
    use super::*;
    use anyhow::{bail, Result};
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

    /// Frames larger than this are treated as a corrupt stream.
    pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

    pub async fn send_message<S, T>(stream: &mut S, message: &T) -> Result<()>
    where
        S: AsyncWrite + Unpin,
        T: Serialize,
    {
        let serialized = rmp_serde::to_vec(message)?;
        let len = serialized.len() as u32;

        stream.write_all(&len.to_le_bytes()).await?;
        stream.write_all(&serialized).await?;
        stream.flush().await?;

        Ok(())
    }

    pub async fn receive_message<S, T>(stream: &mut S) -> Result<T>
    where
        S: AsyncRead + Unpin,
        T: for<'de> Deserialize<'de>,
    {
        let mut len_bytes = [0u8; 4];
        stream.read_exact(&mut len_bytes).await?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_FRAME_LEN {
            bail!("Frame of {} bytes exceeds limit", len);
        }

        let mut buffer = vec![0u8; len];
        stream.read_exact(&mut buffer).await?;

        let message = rmp_serde::from_slice(&buffer)?;
        Ok(message)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn oversized_frame_is_rejected() {
            let (mut writer, mut reader) = tokio::io::duplex(64);
            writer
                .write_all(&((MAX_FRAME_LEN as u32) + 1).to_le_bytes())
                .await
                .unwrap();

            let result = receive_message::<_, ClientMessage>(&mut reader).await;
            assert!(result.is_err());
        }

        #[tokio::test]
        async fn messages_arrive_in_order_on_one_stream() {
            let (mut writer, mut reader) = tokio::io::duplex(4096);
            send_message(&mut writer, &ClientMessage::GetStatus).await.unwrap();
            send_message(
                &mut writer,
                &ClientMessage::ListVoices {
                    language: "fr".to_string(),
                },
            )
            .await
            .unwrap();

            let first: ClientMessage = receive_message(&mut reader).await.unwrap();
            let second: ClientMessage = receive_message(&mut reader).await.unwrap();
            assert!(matches!(first, ClientMessage::GetStatus));
            assert!(matches!(second, ClientMessage::ListVoices { language } if language == "fr"));
        }
    }
}
