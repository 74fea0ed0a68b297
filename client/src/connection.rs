use anyhow::{bail, Context, Result};
use log::debug;
use shared::ipc::protocol;
use shared::{ClientMessage, DaemonMessage};
use std::path::Path;
use std::time::Duration;
use tokio::net::UnixStream;

pub struct Connection {
    stream: UnixStream,
    timeout: Duration,
}

impl Connection {
    pub async fn open(socket_path: &Path, timeout: Duration) -> Result<Self> {
        let stream = UnixStream::connect(socket_path).await.with_context(|| {
            format!(
                "Daemon not available at {:?}. Please start translator-daemon first.",
                socket_path
            )
        })?;
        debug!("Connected to {:?}", socket_path);
        Ok(Self { stream, timeout })
    }

    /// Sends one request and waits for its reply. Daemon errors become `Err`.
    pub async fn request(&mut self, message: ClientMessage) -> Result<DaemonMessage> {
        protocol::send_message(&mut self.stream, &message).await?;
        let reply = tokio::time::timeout(
            self.timeout,
            protocol::receive_message::<_, DaemonMessage>(&mut self.stream),
        )
        .await
        .context("Timed out waiting for the daemon")??;

        match reply {
            DaemonMessage::Error(message) => bail!(message),
            reply => Ok(reply),
        }
    }

    /// Switches the connection to event streaming.
    pub async fn subscribe(mut self) -> Result<Subscription> {
        match self.request(ClientMessage::Subscribe).await? {
            DaemonMessage::Subscribed => Ok(Subscription {
                stream: self.stream,
            }),
            other => bail!("Unexpected reply to subscribe: {:?}", other),
        }
    }
}

pub struct Subscription {
    stream: UnixStream,
}

impl Subscription {
    /// Next pushed event, or `None` once the daemon closes the stream.
    pub async fn next(&mut self) -> Option<DaemonMessage> {
        protocol::receive_message(&mut self.stream).await.ok()
    }
}
