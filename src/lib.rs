//! Client side of a relay chat: a logged-in connection that sends text,
//! files and voice notes, and a dispatcher that turns incoming frames into
//! messages for display.

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod mock_peer;
pub mod storage;

pub use config::{ClientConfig, ConfigError};
pub use connection::{BoxedProgress, Connection, ConnectionState, LinkState};
pub use dispatcher::{
    classify, Classified, Dispatcher, Inbound, InboundMessage, InboundNotifier, PayloadKind,
    ReceivedPayload,
};
pub use error::{ChatError, Result};
pub use mock_peer::MockPeer;
pub use storage::Storage;
