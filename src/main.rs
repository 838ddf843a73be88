use anyhow::{Context, Result};
use chat_protocol::BROADCAST_RECIPIENT;
use clap::Parser;
use relay_chat::config::parse_port;
use relay_chat::{
    BoxedProgress, ChatError, ClientConfig, Connection, Dispatcher, InboundMessage, Storage,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use voice::VoicePipeline;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Relay host (overrides RELAY_CHAT_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Relay port (overrides RELAY_CHAT_PORT)
    #[arg(long, value_parser = parse_port)]
    port: Option<u16>,

    /// Username to log in with (overrides RELAY_CHAT_USER)
    #[arg(long)]
    user: Option<String>,

    /// Folder for downloads and voice notes (overrides RELAY_CHAT_DATA_DIR)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Payload bytes per socket write (overrides RELAY_CHAT_CHUNK_SIZE)
    #[arg(long)]
    chunk_size: Option<usize>,
}

impl Args {
    fn apply(self, config: &mut ClientConfig) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(user) = self.user {
            config.username = user;
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(size) = self.chunk_size {
            config.chunk_size = size;
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    To(String),
    Users,
    File { path: PathBuf, allow_empty: bool },
    Record,
    Stop,
    Play(PathBuf),
    Quit,
    Help,
    Text(String),
    Empty,
}

impl Command {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        match word {
            "" => Command::Empty,
            "/to" if !rest.is_empty() => Command::To(rest.to_string()),
            "/users" => Command::Users,
            "/file" if !rest.is_empty() => Command::File {
                path: PathBuf::from(rest),
                allow_empty: false,
            },
            "/file!" if !rest.is_empty() => Command::File {
                path: PathBuf::from(rest),
                allow_empty: true,
            },
            "/rec" => Command::Record,
            "/stop" => Command::Stop,
            "/play" if !rest.is_empty() => Command::Play(PathBuf::from(rest)),
            "/quit" => Command::Quit,
            _ if word.starts_with('/') => Command::Help,
            _ => Command::Text(line.to_string()),
        }
    }
}

const HELP: &str = "Commands: /to NAME, /users, /file PATH, /file! PATH (allow empty), \
/rec, /stop, /play PATH, /quit. Anything else is sent as text.";

fn log_line(line: &str) {
    println!("* {}", line);
}

fn progress_bar() -> BoxedProgress {
    Box::new(|percent: u8| {
        eprint!("\r📤 {:3}%", percent);
        if percent == 100 {
            eprintln!();
        }
    })
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::init();

    let args = Args::parse();
    log::info!("🚀 Starting relay-chat with args: {:?}", args);

    let mut config = ClientConfig::from_env().context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let connection = Connection::connect_with_chunk_size(
        &config.host,
        config.port,
        &config.username,
        config.chunk_size,
    )
    .context("Failed to connect to relay")?;

    let (inbound, dispatcher) =
        Dispatcher::for_connection(&connection, Storage::from_config(&config))
            .context("Failed to open receive stream")?
            .with_notifier(|_: &InboundMessage| {
                // Terminal bell
                print!("\x07");
                let _ = io::stdout().flush();
            })
            .spawn()
            .context("Failed to start dispatcher")?;

    let messages = inbound.messages.clone();
    let printer = thread::spawn(move || {
        for message in messages.iter() {
            println!("[{}] {}", chrono::Local::now().format("%H:%M"), message);
        }
    });

    let voice = VoicePipeline::with_cpal(config.sent_audio_dir());
    let mut recipient = BROADCAST_RECIPIENT.to_string();
    let mut users: Vec<String> = Vec::new();

    println!(
        "✅ Logged in as {} on {}. Sending to {}. /quit to exit.",
        connection.username(),
        connection.peer_addr(),
        recipient
    );

    for line in io::stdin().lock().lines() {
        let line = line.context("Failed to read from stdin")?;

        match Command::parse(&line) {
            Command::Empty => {}
            Command::To(name) => {
                recipient = name;
                log_line(&format!("Sending to {}.", recipient));
            }
            Command::Users => {
                if let Some(latest) = inbound.latest_users() {
                    users = latest;
                }
                log_line(&format!("Online: {}", users.join(", ")));
            }
            Command::File { path, allow_empty } => {
                connection.send_file_in_background(
                    &recipient,
                    path,
                    allow_empty,
                    Some(progress_bar()),
                    log_line,
                );
            }
            Command::Record => match voice.start_recording() {
                Ok(()) if voice.is_recording() => log_line("Recording... /stop to send."),
                Ok(()) => log_line("Already recording or still saving."),
                Err(e) => log_line(&format!("Could not start recording: {}", e)),
            },
            Command::Stop => {
                let sender = Arc::clone(&connection);
                voice.stop_recording(
                    &recipient,
                    connection.username(),
                    move |header, bytes| sender.send(header, bytes, None),
                    log_line,
                );
            }
            Command::Play(path) => {
                voice.play_audio(path, log_line);
            }
            Command::Quit => break,
            Command::Help => log_line(HELP),
            Command::Text(text) => match connection.send_text(&recipient, &text) {
                Ok(()) => {}
                Err(ChatError::NotConnected) => log_line("Not connected to the server."),
                Err(e) => log_line(&format!("Could not send message: {}", e)),
            },
        }
    }

    if let Err(e) = voice.terminate() {
        log::warn!("Voice shutdown: {}", e);
    }
    connection.close().context("Failed to close connection")?;

    if dispatcher.join().is_err() {
        log::error!("Dispatcher thread panicked");
    }
    drop(inbound);
    if printer.join().is_err() {
        log::error!("Printer thread panicked");
    }

    log::info!("👋 Bye");
    Ok(())
}
