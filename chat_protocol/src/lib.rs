//! # Chat Protocol
//!
//! Frame protocol spoken between relay-chat clients and the relay server.
//!
//! This crate provides:
//! - The header model and its JSON encoding
//! - Reading and writing whole frames on a byte stream
//! - A chunked payload writer with progress reporting
//! - Collision-safe naming for payloads persisted to disk
//!
//! ## Wire format
//!
//! ```text
//! +----------------+------------------+--------------------------------+
//! | length (4 BE)  |  JSON header     |  payload (file/audio only)     |
//! +----------------+------------------+--------------------------------+
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use chat_protocol::{read_frame, write_frame, Frame, Header, DEFAULT_CHUNK_SIZE};
//! use std::io::Cursor;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let frame = Frame::bare(Header::text("alice", "bob", "hi"));
//!
//! let mut wire = Vec::new();
//! write_frame(&mut wire, &frame, DEFAULT_CHUNK_SIZE, None)?;
//!
//! let decoded = read_frame(&mut Cursor::new(wire))?;
//! assert_eq!(decoded, frame);
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod chunked;
pub mod protocol;

// Re-export commonly used types
pub use artifact::{persist_new, sanitize_filename, unique_path};
pub use chunked::{send_chunked, ProgressObserver};
pub use protocol::{
    decode_header, encode_header, read_frame, write_frame, Frame, FrameKind, Header,
    ProtocolError,
};

/// Default size of a single payload write.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Recipient of the login frame.
pub const SERVER_RECIPIENT: &str = "SERVER";

/// Recipient name the relay treats as everyone.
pub const BROADCAST_RECIPIENT: &str = "Todos";

/// Largest encoded header accepted from the wire (1 MiB).
pub const MAX_HEADER_SIZE: u32 = 1024 * 1024;

/// Largest file/audio payload accepted from the wire (512 MiB).
pub const MAX_PAYLOAD_SIZE: u64 = 512 * 1024 * 1024;
