//! A scripted stand-in for the relay, for tests.
//!
//! It accepts a single client, decodes every frame the client writes onto a
//! channel, and can push frames (or raw bytes) back or drop the connection.
//! It does no routing of its own.

use chat_protocol::{read_frame, write_frame, Frame, ProtocolError, DEFAULT_CHUNK_SIZE};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use log::{debug, error, info};
use std::io::{self, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct MockPeer {
    address: SocketAddr,
    client: Arc<Mutex<Option<TcpStream>>>,
    frames: Receiver<Frame>,
}

impl MockPeer {
    /// Bind to a random local port and wait for a client in the background
    pub fn start() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let address = listener.local_addr()?;
        info!("🧪 Mock peer listening on {}", address);

        let client = Arc::new(Mutex::new(None));
        let (frame_tx, frames) = unbounded();
        let client_slot = Arc::clone(&client);

        thread::spawn(move || {
            let stream = match listener.accept() {
                Ok((stream, peer)) => {
                    info!("🧪 Mock peer accepted {}", peer);
                    stream
                }
                Err(e) => {
                    error!("Mock peer accept failed: {}", e);
                    return;
                }
            };

            let read_half = match stream.try_clone() {
                Ok(read_half) => read_half,
                Err(e) => {
                    error!("Mock peer could not clone stream: {}", e);
                    return;
                }
            };
            *lock(&client_slot) = Some(stream);

            let mut reader = BufReader::new(read_half);
            loop {
                match read_frame(&mut reader) {
                    Ok(frame) => {
                        debug!("🧪 Mock peer got {} frame", frame.header.kind);
                        if frame_tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.is_recoverable() => continue,
                    Err(e) => {
                        debug!("🧪 Mock peer read loop ended: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            address,
            client,
            frames,
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }

    /// Wait until a client has connected
    pub fn wait_for_client(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if lock(&self.client).is_some() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    /// Next frame received from the client
    pub fn next_frame(&self, timeout: Duration) -> Option<Frame> {
        match self.frames.recv_timeout(timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Send a frame to the client
    pub fn push(&self, frame: &Frame) -> Result<(), ProtocolError> {
        let mut client = lock(&self.client);
        let stream = client.as_mut().ok_or(ProtocolError::ConnectionClosed {
            context: "mock peer client",
        })?;
        write_frame(stream, frame, DEFAULT_CHUNK_SIZE, None)
    }

    /// Send arbitrary bytes to the client
    pub fn push_raw(&self, bytes: &[u8]) -> io::Result<()> {
        let mut client = lock(&self.client);
        let stream = client
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no client"))?;
        stream.write_all(bytes)?;
        stream.flush()
    }

    /// Drop the client connection
    pub fn close_client(&self) {
        if let Some(stream) = lock(&self.client).take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for MockPeer {
    fn drop(&mut self) {
        self.close_client();
    }
}
