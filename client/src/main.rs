mod connection;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use log::info;
use shared::{
    AudioDevice, ClientMessage, Config, DaemonMessage, LogEntry, Preferences, StartRequest,
};
use std::path::PathBuf;
use std::time::Duration;

use crate::connection::Connection;

#[derive(Parser)]
#[command(name = "translator-client")]
#[command(about = "Control the speech translation daemon")]
struct Args {
    /// Control socket path, overriding the config file
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start translating, after the configured countdown
    Start {
        #[arg(short, long)]
        source: Option<String>,
        #[arg(short, long)]
        target: Option<String>,
        #[arg(short, long)]
        voice: Option<String>,
        /// Input device name
        #[arg(short, long)]
        input: Option<String>,
        /// Seconds to wait before starting; 0 starts immediately
        #[arg(short, long)]
        countdown: Option<u32>,
        /// Keep printing events after the session starts
        #[arg(short, long)]
        follow: bool,
    },
    /// Stop the session or cancel a pending countdown
    Stop,
    /// Cancel a pending countdown
    Cancel,
    Status,
    /// Show the diagnostic log
    Logs {
        /// Show every entry even when the log is collapsed
        #[arg(short, long)]
        all: bool,
        #[arg(long)]
        clear: bool,
    },
    Devices,
    Languages,
    /// List voices for a language code
    Voices { language: String },
    /// Show or change persisted preferences
    Prefs {
        #[arg(long)]
        countdown: Option<i64>,
        #[arg(long)]
        logs_expanded: Option<bool>,
    },
    /// Print session events as they happen
    Watch,
    /// Stop the daemon
    Shutdown,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = Config::load()?;
    let socket_path = args.socket.unwrap_or(config.ipc.socket_path);
    let timeout = Duration::from_secs(config.ipc.timeout_seconds);
    let mut conn = Connection::open(&socket_path, timeout).await?;

    match args.command {
        Command::Start {
            source,
            target,
            voice,
            input,
            countdown,
            follow,
        } => {
            let request = StartRequest {
                source_language: source,
                target_language: target,
                voice,
                input_device: input,
                countdown_seconds: countdown,
            };
            // Subscribe first so no countdown tick is missed.
            let mut events = if follow || countdown != Some(0) {
                Some(Connection::open(&socket_path, timeout).await?.subscribe().await?)
            } else {
                None
            };

            match conn.request(ClientMessage::StartTranslation(request)).await? {
                DaemonMessage::TranslationStarted(id) => {
                    println!("Translation started ({})", id);
                    if !follow {
                        return Ok(());
                    }
                }
                DaemonMessage::CountdownStarted { seconds } => {
                    println!("Starting in {}...", seconds);
                }
                other => bail!("Unexpected reply: {:?}", other),
            }

            if let Some(events) = events.as_mut() {
                while let Some(event) = events.next().await {
                    let started = matches!(event, DaemonMessage::TranslationStarted(_));
                    let ended = matches!(
                        event,
                        DaemonMessage::CountdownCanceled | DaemonMessage::TranslationStopped
                    ) || (matches!(event, DaemonMessage::Error(_)) && !follow);
                    print_event(&event);
                    if ended || (started && !follow) {
                        break;
                    }
                }
            }
        }
        Command::Stop => {
            conn.request(ClientMessage::StopTranslation).await?;
            println!("Translation stopped");
        }
        Command::Cancel => {
            conn.request(ClientMessage::CancelCountdown).await?;
            println!("Countdown canceled");
        }
        Command::Status => {
            if let DaemonMessage::Status(status) = conn.request(ClientMessage::GetStatus).await? {
                println!("State:       {:?}", status.state);
                if let Some(id) = status.session_id {
                    println!("Session:     {}", id);
                }
                if let Some(session) = status.session {
                    println!(
                        "Languages:   {} -> {}",
                        session.source_language, session.target_language
                    );
                    println!("Voice:       {}", session.voice);
                    if let Some(device) = session.input_device {
                        println!("Input:       {}", device);
                    }
                }
                if let Some(remaining) = status.countdown_remaining {
                    println!("Countdown:   {}", remaining);
                }
                if let Some(audio) = status.current_audio {
                    println!("Audio:       {}", audio);
                }
                println!("Log entries: {}", status.log_entries);
                println!("Uptime:      {}s", status.uptime.as_secs());
            }
        }
        Command::Logs { all, clear } => {
            if clear {
                conn.request(ClientMessage::ClearLogs).await?;
                println!("Logs cleared");
                return Ok(());
            }
            let expanded = match conn.request(ClientMessage::GetPreferences).await? {
                DaemonMessage::Preferences(prefs) => prefs.logs_expanded(),
                _ => false,
            };
            if let DaemonMessage::Logs(entries) = conn.request(ClientMessage::GetLogs).await? {
                if entries.is_empty() {
                    println!("No diagnostic entries yet.");
                }
                let shown = if all || expanded { entries.len() } else { 1 };
                for entry in entries.iter().take(shown) {
                    print_entry(entry);
                }
                if entries.len() > shown {
                    println!("({} older entries hidden, use --all)", entries.len() - shown);
                }
            }
        }
        Command::Devices => {
            if let DaemonMessage::Devices(devices) = conn.request(ClientMessage::ListDevices).await? {
                println!("Inputs:");
                print_devices(&devices.inputs);
                println!("Outputs:");
                print_devices(&devices.outputs);
            }
        }
        Command::Languages => {
            if let DaemonMessage::Languages(options) =
                conn.request(ClientMessage::ListLanguages).await?
            {
                for option in options {
                    println!("{:<10} {}", option.code, option.label);
                }
            }
        }
        Command::Voices { language } => {
            if let DaemonMessage::Voices(voices) =
                conn.request(ClientMessage::ListVoices { language }).await?
            {
                if voices.is_empty() {
                    println!("No voices available");
                }
                for voice in voices {
                    println!(
                        "{:<32} {:<12} {:?} ({})",
                        voice.short_name, voice.name, voice.gender, voice.locale
                    );
                }
            }
        }
        Command::Prefs {
            countdown,
            logs_expanded,
        } => {
            let mut prefs = match conn.request(ClientMessage::GetPreferences).await? {
                DaemonMessage::Preferences(prefs) => prefs,
                _ => Preferences::default(),
            };
            if countdown.is_some() || logs_expanded.is_some() {
                if countdown.is_some() {
                    prefs.countdown_seconds = countdown;
                }
                if logs_expanded.is_some() {
                    prefs.logs_expanded = logs_expanded;
                }
                if let DaemonMessage::Preferences(saved) =
                    conn.request(ClientMessage::SetPreferences(prefs.clone())).await?
                {
                    prefs = saved;
                }
            }
            println!("countdown_seconds = {}", prefs.countdown_seconds());
            println!("logs_expanded = {}", prefs.logs_expanded());
        }
        Command::Watch => {
            let mut events = conn.subscribe().await?;
            info!("Watching daemon events");
            while let Some(event) = events.next().await {
                print_event(&event);
            }
        }
        Command::Shutdown => {
            conn.request(ClientMessage::Shutdown).await?;
            println!("Daemon shutting down");
        }
    }

    Ok(())
}

fn print_entry(entry: &LogEntry) {
    println!(
        "{} {:<11} {}",
        entry.clock_time(),
        entry.category.label(),
        entry.message
    );
    for (key, value) in &entry.metadata {
        println!("           {}: {}", key, value);
    }
}

fn print_devices(devices: &[AudioDevice]) {
    if devices.is_empty() {
        println!("  (none)");
    }
    for device in devices {
        println!("  {}", device.display_label());
    }
}

fn print_event(event: &DaemonMessage) {
    match event {
        DaemonMessage::CountdownTick { remaining } => println!("{}...", remaining),
        DaemonMessage::CountdownCanceled => println!("Countdown canceled"),
        DaemonMessage::TranslationStarted(id) => println!("Translation started ({})", id),
        DaemonMessage::TranslationStopped => println!("Translation stopped"),
        DaemonMessage::StateChanged(state) => println!("[{:?}]", state),
        DaemonMessage::Transcript(text) if !text.is_empty() => println!("> {}", text),
        DaemonMessage::Translation(text) if !text.is_empty() => println!("= {}", text),
        DaemonMessage::AudioReady(clip) => {
            println!("~ {} ({} bytes)", clip.handle, clip.data.len())
        }
        DaemonMessage::Error(message) => eprintln!("! {}", message),
        _ => {}
    }
}
