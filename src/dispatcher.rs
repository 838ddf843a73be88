use crate::connection::{Connection, LinkState};
use crate::storage::Storage;
use chat_protocol::{read_frame, sanitize_filename, Frame, FrameKind};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use std::fmt;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use strum::{AsRefStr, Display, EnumString};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

/// How a received payload should be presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, EnumString)]
pub enum PayloadKind {
    #[strum(serialize = "img")]
    Image,
    #[strum(serialize = "file")]
    File,
    #[strum(serialize = "audio")]
    Audio,
}

impl PayloadKind {
    /// Image for common picture extensions (any case), otherwise File
    pub fn for_filename(filename: &str) -> Self {
        let is_image = filename
            .rsplit_once('.')
            .map(|(_, ext)| {
                IMAGE_EXTENSIONS
                    .iter()
                    .any(|candidate| ext.eq_ignore_ascii_case(candidate))
            })
            .unwrap_or(false);

        if is_image {
            PayloadKind::Image
        } else {
            PayloadKind::File
        }
    }
}

/// A file or voice note saved from another user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPayload {
    pub kind: PayloadKind,
    pub saved_path: PathBuf,
    pub sender: String,
    pub original_filename: String,
}

/// Everything the dispatcher publishes for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Text {
        from: String,
        to: String,
        message: String,
    },
    System(String),
    Payload(ReceivedPayload),
    Warning(String),
    Error(String),
    ConnectionLost,
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InboundMessage::Text { from, to, message } => {
                write!(f, "{} -> {}: {}", from, to, message)
            }
            InboundMessage::System(message) => write!(f, "[SERVER] {}", message),
            InboundMessage::Payload(payload) => write!(
                f,
                "[{}] {} sent {} (saved to {})",
                payload.kind,
                payload.sender,
                payload.original_filename,
                payload.saved_path.display()
            ),
            InboundMessage::Warning(message) => write!(f, "[WARNING] {}", message),
            InboundMessage::Error(message) => write!(f, "[ERROR] {}", message),
            InboundMessage::ConnectionLost => {
                write!(f, "[CLIENT] Connection to the server was lost.")
            }
        }
    }
}

/// Called once for every inbound text, file or audio frame
pub trait InboundNotifier: Send {
    fn notify(&self, message: &InboundMessage);
}

impl<F> InboundNotifier for F
where
    F: Fn(&InboundMessage) + Send,
{
    fn notify(&self, message: &InboundMessage) {
        self(message)
    }
}

/// Queues the presentation layer reads from
pub struct Inbound {
    pub messages: Receiver<InboundMessage>,
    pub users: Receiver<Vec<String>>,
}

impl Inbound {
    /// Drain the user-list queue, keeping only the newest snapshot
    pub fn latest_users(&self) -> Option<Vec<String>> {
        self.users.try_iter().last()
    }
}

/// What a single frame turns into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    Users(Vec<String>),
    Message(InboundMessage),
}

/// Map one frame to what should be published, saving payloads to `storage`
pub fn classify(frame: Frame, storage: &Storage) -> Classified {
    let Frame { header, payload } = frame;

    let message = match header.kind {
        FrameKind::Userlist => return Classified::Users(header.users.unwrap_or_default()),
        FrameKind::Text => InboundMessage::Text {
            from: header.from,
            to: header.to,
            message: header.message.unwrap_or_default(),
        },
        FrameKind::System => InboundMessage::System(header.message.unwrap_or_default()),
        FrameKind::File | FrameKind::Audio => {
            let original = header.filename.unwrap_or_default();
            let is_audio = header.kind == FrameKind::Audio;
            let saved = if is_audio {
                storage.save_audio(&original, &payload)
            } else {
                storage.save_file(&original, &payload)
            };

            match saved {
                Ok(saved_path) => {
                    let kind = if is_audio {
                        PayloadKind::Audio
                    } else {
                        PayloadKind::for_filename(&sanitize_filename(&original))
                    };
                    InboundMessage::Payload(ReceivedPayload {
                        kind,
                        saved_path,
                        sender: header.from,
                        original_filename: original,
                    })
                }
                Err(e) => InboundMessage::Error(format!(
                    "Could not save '{}' from {}: {}",
                    original, header.from, e
                )),
            }
        }
        FrameKind::Login | FrameKind::Unknown(_) => InboundMessage::Warning(format!(
            "Unknown message type '{}' from {}",
            header.kind,
            if header.from.is_empty() {
                "the server"
            } else {
                header.from.as_str()
            }
        )),
    };

    Classified::Message(message)
}

/// Reads frames until the connection ends and publishes them to [`Inbound`]
pub struct Dispatcher<R> {
    reader: R,
    storage: Storage,
    link: LinkState,
    notifier: Option<Box<dyn InboundNotifier>>,
}

impl Dispatcher<BufReader<std::net::TcpStream>> {
    /// Dispatcher reading from a live connection
    pub fn for_connection(connection: &Connection, storage: Storage) -> io::Result<Self> {
        Ok(Self::new(
            BufReader::new(connection.reader()?),
            storage,
            connection.link_state(),
        ))
    }
}

impl<R: Read + Send + 'static> Dispatcher<R> {
    pub fn new(reader: R, storage: Storage, link: LinkState) -> Self {
        Self {
            reader,
            storage,
            link,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: impl InboundNotifier + 'static) -> Self {
        self.notifier = Some(Box::new(notifier));
        self
    }

    /// Start the receive loop on its own thread
    pub fn spawn(self) -> io::Result<(Inbound, JoinHandle<()>)> {
        let (message_tx, messages) = unbounded();
        let (users_tx, users) = unbounded();

        let handle = thread::Builder::new()
            .name("relay-dispatcher".into())
            .spawn(move || self.run(message_tx, users_tx))?;

        Ok((Inbound { messages, users }, handle))
    }

    fn run(mut self, messages: Sender<InboundMessage>, users: Sender<Vec<String>>) {
        info!("📥 Dispatcher started");

        loop {
            let frame = match read_frame(&mut self.reader) {
                Ok(frame) => frame,
                Err(e) if e.is_recoverable() => {
                    warn!("⚠️ Skipping unreadable frame: {}", e);
                    let _ = messages.send(InboundMessage::Warning(format!(
                        "Ignoring unreadable message: {}",
                        e
                    )));
                    continue;
                }
                Err(e) => {
                    if e.is_connection_closed() {
                        debug!("Relay closed the connection");
                    } else {
                        warn!("❌ Receive failed: {}", e);
                    }
                    if self.link.mark_lost() {
                        let _ = messages.send(InboundMessage::ConnectionLost);
                    }
                    break;
                }
            };

            let notify = matches!(
                frame.header.kind,
                FrameKind::Text | FrameKind::File | FrameKind::Audio
            );

            match classify(frame, &self.storage) {
                Classified::Users(list) => {
                    debug!("👥 {} users online", list.len());
                    let _ = users.send(list);
                }
                Classified::Message(message) => {
                    if notify {
                        if let Some(notifier) = &self.notifier {
                            notifier.notify(&message);
                        }
                    }
                    let _ = messages.send(message);
                }
            }
        }

        info!("📥 Dispatcher stopped");
    }
}
