use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use shared::ipc::protocol;
use shared::{ClientMessage, DaemonMessage};
use std::path::Path;
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;

use crate::daemon::Daemon;

/// Binds the control socket, replacing a stale one left by a previous run.
pub fn bind(path: &Path) -> Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove stale socket {:?}", path))?;
    }
    let listener =
        UnixListener::bind(path).with_context(|| format!("Failed to bind {:?}", path))?;
    info!("Listening on {:?}", path);
    Ok(listener)
}

pub async fn serve(listener: UnixListener, daemon: Arc<Daemon>) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let daemon = daemon.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, daemon).await {
                        warn!("Client connection ended with error: {:#}", e);
                    }
                });
            }
            Err(e) => error!("Failed to accept client: {}", e),
        }
    }
}

async fn handle_connection(mut stream: UnixStream, daemon: Arc<Daemon>) -> Result<()> {
    loop {
        // A failed read means the client hung up.
        let message: ClientMessage = match protocol::receive_message(&mut stream).await {
            Ok(message) => message,
            Err(e) => {
                debug!("Client disconnected: {}", e);
                return Ok(());
            }
        };

        if let ClientMessage::Subscribe = message {
            return stream_events(stream, daemon).await;
        }

        let reply = daemon.handle_message(message).await;
        protocol::send_message(&mut stream, &reply).await?;
    }
}

/// Forwards daemon events until the subscriber goes away.
async fn stream_events(mut stream: UnixStream, daemon: Arc<Daemon>) -> Result<()> {
    let mut events = daemon.subscribe();
    protocol::send_message(&mut stream, &DaemonMessage::Subscribed).await?;

    loop {
        match events.recv().await {
            Ok(event) => protocol::send_message(&mut stream, &event).await?,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Subscriber fell behind, skipped {} events", skipped);
            }
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DryRunEngine;
    use shared::{Catalog, Config, Preferences};

    fn daemon() -> Arc<Daemon> {
        let mut config = Config::default();
        config.audio.playback = false;
        Arc::new(
            Daemon::new(
                config,
                Catalog::builtin().unwrap(),
                Arc::new(DryRunEngine::new()),
                Preferences::default(),
            )
            .without_persistence(),
        )
    }

    #[tokio::test]
    async fn requests_and_subscriptions_share_the_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.sock");
        std::fs::write(&path, b"stale").unwrap();

        let listener = bind(&path).unwrap();
        let daemon = daemon();
        tokio::spawn(serve(listener, daemon.clone()));

        let mut watcher = UnixStream::connect(&path).await.unwrap();
        protocol::send_message(&mut watcher, &ClientMessage::Subscribe)
            .await
            .unwrap();
        let ack: DaemonMessage = protocol::receive_message(&mut watcher).await.unwrap();
        assert!(matches!(ack, DaemonMessage::Subscribed));

        let mut client = UnixStream::connect(&path).await.unwrap();
        protocol::send_message(&mut client, &ClientMessage::StopTranslation)
            .await
            .unwrap();
        let reply: DaemonMessage = protocol::receive_message(&mut client).await.unwrap();
        assert!(matches!(reply, DaemonMessage::TranslationStopped));

        protocol::send_message(&mut client, &ClientMessage::GetLogs)
            .await
            .unwrap();
        let reply: DaemonMessage = protocol::receive_message(&mut client).await.unwrap();
        assert!(matches!(reply, DaemonMessage::Logs(_)));

        let event: DaemonMessage = protocol::receive_message(&mut watcher).await.unwrap();
        assert!(matches!(event, DaemonMessage::TranslationStopped));
    }
}
