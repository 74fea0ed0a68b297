//! Plays synthesized clips on an output device.
//!
//! rodio's output stream is not `Send`, so it lives on a dedicated thread
//! that receives commands over a channel.

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use shared::AudioClip;
use std::io::Cursor;
use std::sync::mpsc;
use std::thread;

enum PlayerCommand {
    Play(AudioClip),
    Stop,
}

pub struct Player {
    tx: mpsc::Sender<PlayerCommand>,
}

impl Player {
    /// Opens the named output device (or the default one) on a new thread.
    pub fn spawn(output_device: Option<String>) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || {
                let stream = match open_output(output_device.as_deref()) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                playback_loop(&stream.1, rx);
                drop(stream);
            })
            .context("Failed to spawn playback thread")?;

        ready_rx
            .recv()
            .context("Playback thread exited during startup")??;
        Ok(Self { tx })
    }

    /// Replaces whatever is playing with `clip`.
    pub fn play(&self, clip: AudioClip) {
        if self.tx.send(PlayerCommand::Play(clip)).is_err() {
            warn!("Playback thread is gone");
        }
    }

    pub fn stop(&self) {
        let _ = self.tx.send(PlayerCommand::Stop);
    }
}

fn open_output(name: Option<&str>) -> Result<(OutputStream, OutputStreamHandle)> {
    if let Some(name) = name {
        let host = rodio::cpal::default_host();
        let device = host
            .output_devices()?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false));
        match device {
            Some(device) => {
                info!("Playing audio on {}", name);
                return OutputStream::try_from_device(&device)
                    .with_context(|| format!("Failed to open output device '{}'", name));
            }
            None => warn!("Output device '{}' not found, using default", name),
        }
    }
    OutputStream::try_default().context("No default output device available")
}

fn playback_loop(handle: &OutputStreamHandle, rx: mpsc::Receiver<PlayerCommand>) {
    let mut current: Option<Sink> = None;

    while let Ok(command) = rx.recv() {
        match command {
            PlayerCommand::Play(clip) => {
                // Dropping the old sink stops it.
                current = None;
                let source = match Decoder::new(Cursor::new(clip.data)) {
                    Ok(source) => source,
                    Err(e) => {
                        error!("Audio playback error for {}: {}", clip.handle, e);
                        continue;
                    }
                };
                match Sink::try_new(handle) {
                    Ok(sink) => {
                        sink.append(source);
                        debug!("Playing {}", clip.handle);
                        current = Some(sink);
                    }
                    Err(e) => error!("Audio playback error: {}", e),
                }
            }
            PlayerCommand::Stop => {
                if current.take().is_some() {
                    debug!("Playback stopped");
                }
            }
        }
    }
}
