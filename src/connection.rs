use crate::error::{ChatError, Result};
use chat_protocol::{
    encode_header, write_frame, Frame, Header, ProgressObserver, ProtocolError,
    DEFAULT_CHUNK_SIZE,
};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use std::fs;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

/// Progress observer handed across to the writer thread
pub type BoxedProgress = Box<dyn ProgressObserver + Send>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    LoggedIn,
    Closing,
}

/// Connection state shared between a connection, its writer and its dispatcher
#[derive(Debug, Clone)]
pub struct LinkState(Arc<Mutex<ConnectionState>>);

impl LinkState {
    pub fn new(state: ConnectionState) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    pub fn get(&self) -> ConnectionState {
        *lock(&self.0)
    }

    /// Set the state, returning the previous one
    pub fn set(&self, state: ConnectionState) -> ConnectionState {
        std::mem::replace(&mut *lock(&self.0), state)
    }

    /// Record that the transport failed.
    ///
    /// Returns false when the connection had already been closed on purpose,
    /// in which case the state stays `Disconnected`.
    pub fn mark_lost(&self) -> bool {
        let mut state = lock(&self.0);
        match *state {
            ConnectionState::Disconnected => false,
            _ => {
                *state = ConnectionState::Closing;
                true
            }
        }
    }
}

enum WriteCommand {
    Frame {
        frame: Frame,
        progress: Option<BoxedProgress>,
        reply: Sender<std::result::Result<(), ProtocolError>>,
    },
    Shutdown,
}

/// A logged-in session with the relay.
///
/// Every frame goes through a single writer thread, so concurrent senders
/// never interleave bytes on the socket.
pub struct Connection {
    username: String,
    peer_addr: SocketAddr,
    stream: TcpStream,
    state: LinkState,
    commands: Sender<WriteCommand>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Connect and log in as `username`.
    ///
    /// Does not wait for the relay to acknowledge; a rejected login shows up
    /// later as a `system` frame.
    pub fn connect(host: &str, port: u16, username: &str) -> Result<Arc<Self>> {
        Self::connect_with_chunk_size(host, port, username, DEFAULT_CHUNK_SIZE)
    }

    pub fn connect_with_chunk_size(
        host: &str,
        port: u16,
        username: &str,
        chunk_size: usize,
    ) -> Result<Arc<Self>> {
        let address = format!("{}:{}", host, port);
        info!("📡 Connecting to relay at {} as {}", address, username);

        let state = LinkState::new(ConnectionState::Connecting);
        let connect_error = |source: io::Error| ChatError::Connect {
            address: address.clone(),
            source,
        };

        let stream = TcpStream::connect(&address).map_err(connect_error)?;
        let peer_addr = stream.peer_addr().map_err(connect_error)?;
        let write_half = stream.try_clone().map_err(connect_error)?;

        let (commands, command_rx) = unbounded();
        let writer_state = state.clone();
        let writer = thread::Builder::new()
            .name("relay-writer".into())
            .spawn(move || {
                run_writer(write_half, command_rx, writer_state, chunk_size)
            })
            .map_err(connect_error)?;

        let connection = Connection {
            username: username.to_string(),
            peer_addr,
            stream,
            state,
            commands,
            writer: Mutex::new(Some(writer)),
        };

        if let Err(e) = connection.submit(Frame::bare(Header::login(username)), None) {
            error!("❌ Login as {} failed: {}", username, e);
            if let Err(close_err) = connection.close() {
                debug!("Close after failed login: {}", close_err);
            }
            return Err(match e {
                ChatError::Send(source) => ChatError::Login(source),
                other => other,
            });
        }

        connection.state.set(ConnectionState::LoggedIn);
        info!("✅ Connected to {} as {}", peer_addr, username);

        Ok(Arc::new(connection))
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Handle on the shared state, for the dispatcher
    pub fn link_state(&self) -> LinkState {
        self.state.clone()
    }

    pub fn is_usable(&self) -> bool {
        self.state() == ConnectionState::LoggedIn
    }

    /// A second handle on the socket for reading
    pub fn reader(&self) -> io::Result<TcpStream> {
        self.stream.try_clone()
    }

    /// Send one frame and wait until it has been written.
    ///
    /// A frame that cannot be encoded is refused with `Protocol` and the
    /// connection stays usable. A write failure leaves the connection
    /// unusable; later calls fail with `NotConnected`.
    pub fn send(
        &self,
        header: Header,
        payload: Vec<u8>,
        progress: Option<BoxedProgress>,
    ) -> Result<()> {
        if !self.is_usable() {
            return Err(ChatError::NotConnected);
        }
        let frame = Frame::new(header, payload)?;
        encode_header(&frame.header)?;
        self.submit(frame, progress)
    }

    pub fn send_text(&self, to: &str, message: &str) -> Result<()> {
        debug!("📤 Text to {}", to);
        self.send(Header::text(&self.username, to, message), Vec::new(), None)
    }

    /// Send a file from disk, named by its final path component.
    ///
    /// An empty file is refused with `EmptyFile` unless `allow_empty` is set.
    pub fn send_file(
        &self,
        to: &str,
        path: &Path,
        allow_empty: bool,
        progress: Option<BoxedProgress>,
    ) -> Result<u64> {
        let (header, bytes) = self.file_frame(to, path, allow_empty)?;
        let size = bytes.len() as u64;

        info!(
            "📤 Sending {} ({} bytes) to {}",
            header.filename.as_deref().unwrap_or_default(),
            size,
            to
        );
        self.send(header, bytes, progress)?;
        Ok(size)
    }

    fn file_frame(&self, to: &str, path: &Path, allow_empty: bool) -> Result<(Header, Vec<u8>)> {
        let bytes = fs::read(path)?;
        if bytes.is_empty() && !allow_empty {
            return Err(ChatError::EmptyFile(path.to_path_buf()));
        }

        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        let header = Header::file(&self.username, to, &filename, bytes.len() as u64);
        Ok((header, bytes))
    }

    /// Send a frame on its own thread, reporting the outcome through `log_fn`
    pub fn send_in_background<L>(
        self: &Arc<Self>,
        header: Header,
        payload: Vec<u8>,
        progress: Option<BoxedProgress>,
        log_fn: L,
    ) -> JoinHandle<Result<()>>
    where
        L: Fn(&str) + Send + 'static,
    {
        let connection = Arc::clone(self);
        thread::spawn(move || {
            let what = describe(&header);
            let to = header.to.clone();
            let result = connection.send(header, payload, progress);
            match &result {
                Ok(()) => log_fn(&format!("Sent {} to {}.", what, to)),
                Err(e) => {
                    warn!("❌ Failed to send {} to {}: {}", what, to, e);
                    log_fn(&format!("Could not send {} to {}: {}", what, to, e));
                }
            }
            result
        })
    }

    /// Read and send a file on its own thread, reporting through `log_fn`
    pub fn send_file_in_background<L>(
        self: &Arc<Self>,
        to: &str,
        path: impl Into<PathBuf>,
        allow_empty: bool,
        progress: Option<BoxedProgress>,
        log_fn: L,
    ) -> JoinHandle<Result<u64>>
    where
        L: Fn(&str) + Send + 'static,
    {
        let connection = Arc::clone(self);
        let to = to.to_string();
        let path = path.into();
        thread::spawn(move || {
            let result = connection.send_file(&to, &path, allow_empty, progress);
            match &result {
                Ok(size) => log_fn(&format!(
                    "Sent {} ({} bytes) to {}.",
                    path.display(),
                    size,
                    to
                )),
                Err(e) => {
                    warn!("❌ Failed to send {}: {}", path.display(), e);
                    log_fn(&format!("Could not send {}: {}", path.display(), e));
                }
            }
            result
        })
    }

    /// Shut the socket down and stop the writer. Calling it again is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.state.set(ConnectionState::Disconnected) == ConnectionState::Disconnected {
            return Ok(());
        }

        // Ignored if the writer already exited after a failure
        let _ = self.commands.send(WriteCommand::Shutdown);

        let result = match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(ChatError::Io(e)),
        };

        if let Some(handle) = lock(&self.writer).take() {
            if handle.join().is_err() {
                error!("Writer thread panicked");
            }
        }

        info!("🔌 Disconnected from {}", self.peer_addr);
        result
    }

    fn submit(&self, frame: Frame, progress: Option<BoxedProgress>) -> Result<()> {
        let (reply, reply_rx) = bounded(1);
        self.commands
            .send(WriteCommand::Frame {
                frame,
                progress,
                reply,
            })
            .map_err(|_| ChatError::NotConnected)?;

        match reply_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ChatError::Send(e)),
            Err(_) => Err(ChatError::NotConnected),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!("Error closing connection on drop: {}", e);
        }
    }
}

fn describe(header: &Header) -> String {
    match &header.filename {
        Some(name) => format!("{} '{}'", header.kind, name),
        None => format!("{} message", header.kind),
    }
}

/// Whether a failed write may have left partial bytes on the socket
fn is_transport_failure(error: &ProtocolError) -> bool {
    matches!(
        error,
        ProtocolError::Io(_) | ProtocolError::ConnectionClosed { .. }
    )
}

fn run_writer(
    mut writer: TcpStream,
    commands: Receiver<WriteCommand>,
    state: LinkState,
    chunk_size: usize,
) {
    debug!("✍️ Writer thread started");

    while let Ok(command) = commands.recv() {
        match command {
            WriteCommand::Frame {
                frame,
                mut progress,
                reply,
            } => {
                let observer: Option<&mut dyn ProgressObserver> = match progress.as_mut() {
                    Some(observer) => Some(&mut **observer),
                    None => None,
                };
                let result = write_frame(&mut writer, &frame, chunk_size, observer);
                let failed = matches!(&result, Err(e) if is_transport_failure(e));

                match &result {
                    Err(e) if failed => {
                        error!("❌ Failed to write {} frame: {}", frame.header.kind, e);
                        state.mark_lost();
                    }
                    Err(e) => warn!("⚠️ Refused {} frame: {}", frame.header.kind, e),
                    Ok(()) => {}
                }
                let _ = reply.send(result);

                if failed {
                    break;
                }
            }
            WriteCommand::Shutdown => break,
        }
    }

    debug!("✍️ Writer thread exiting");
}
