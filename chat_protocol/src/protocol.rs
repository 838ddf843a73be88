use crate::chunked::{send_chunked, ProgressObserver};
use crate::{MAX_HEADER_SIZE, MAX_PAYLOAD_SIZE, SERVER_RECIPIENT};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::io::{ErrorKind, Read, Write};
use strum::EnumString;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed while reading {context}")]
    ConnectionClosed { context: &'static str },

    #[error("Malformed header: {0}")]
    MalformedHeader(#[from] serde_json::Error),

    #[error("Empty header")]
    EmptyHeader,

    #[error("Header too large: {0} bytes")]
    HeaderTooLarge(usize),

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(u64),

    #[error("Declared filesize {declared} does not match payload length {actual}")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("Frame type '{0}' cannot carry a payload")]
    UnexpectedPayload(String),
}

impl ProtocolError {
    /// True when the peer went away before a read could be satisfied.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, ProtocolError::ConnectionClosed { .. })
    }

    /// True when the stream is still positioned at a frame boundary, so the
    /// next `read_frame` can proceed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProtocolError::MalformedHeader(_) | ProtocolError::EmptyHeader
        )
    }
}

/// Value of the `type` field of a header
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum FrameKind {
    Login,
    Text,
    File,
    Audio,
    Userlist,
    System,
    /// Any type string this client does not know about
    #[strum(default)]
    Unknown(String),
}

impl FrameKind {
    pub fn as_str(&self) -> &str {
        match self {
            FrameKind::Login => "login",
            FrameKind::Text => "text",
            FrameKind::File => "file",
            FrameKind::Audio => "audio",
            FrameKind::Userlist => "userlist",
            FrameKind::System => "system",
            FrameKind::Unknown(name) => name,
        }
    }

    /// Only file and audio frames are followed by raw payload bytes.
    pub fn carries_payload(&self) -> bool {
        matches!(self, FrameKind::File | FrameKind::Audio)
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FrameKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FrameKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(match name.parse::<FrameKind>() {
            Ok(kind) => kind,
            Err(_) => FrameKind::Unknown(name),
        })
    }
}

/// Metadata preceding every frame.
///
/// Field order here is the order of the encoded JSON object. Fields that do
/// not belong to a frame type are left out of the encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    #[serde(rename = "type")]
    pub kind: FrameKind,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<String>>,
}

impl Header {
    fn bare(kind: FrameKind, from: &str, to: &str) -> Self {
        Self {
            kind,
            from: from.to_string(),
            to: to.to_string(),
            message: None,
            filename: None,
            filesize: None,
            users: None,
        }
    }

    pub fn login(username: &str) -> Self {
        Self::bare(FrameKind::Login, username, SERVER_RECIPIENT)
    }

    pub fn text(from: &str, to: &str, message: &str) -> Self {
        Self {
            message: Some(message.to_string()),
            ..Self::bare(FrameKind::Text, from, to)
        }
    }

    pub fn file(from: &str, to: &str, filename: &str, filesize: u64) -> Self {
        Self {
            filename: Some(filename.to_string()),
            filesize: Some(filesize),
            ..Self::bare(FrameKind::File, from, to)
        }
    }

    pub fn audio(from: &str, to: &str, filename: &str, filesize: u64) -> Self {
        Self {
            filename: Some(filename.to_string()),
            filesize: Some(filesize),
            ..Self::bare(FrameKind::Audio, from, to)
        }
    }

    pub fn userlist(users: Vec<String>) -> Self {
        Self {
            users: Some(users),
            ..Self::bare(FrameKind::Userlist, SERVER_RECIPIENT, "")
        }
    }

    pub fn system(message: &str) -> Self {
        Self {
            message: Some(message.to_string()),
            ..Self::bare(FrameKind::System, SERVER_RECIPIENT, "")
        }
    }

    /// Number of payload bytes that follow this header on the wire.
    pub fn payload_len(&self) -> u64 {
        if self.kind.carries_payload() {
            self.filesize.unwrap_or(0)
        } else {
            0
        }
    }
}

/// One header plus its (possibly empty) payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a frame, checking that `filesize` matches the payload.
    pub fn new(header: Header, payload: Vec<u8>) -> Result<Self, ProtocolError> {
        let frame = Self { header, payload };
        frame.validate()?;
        Ok(frame)
    }

    /// A frame without payload bytes.
    pub fn bare(header: Header) -> Self {
        Self {
            header,
            payload: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        let actual = self.payload.len() as u64;

        if self.header.kind.carries_payload() {
            let declared = self.header.filesize.unwrap_or(0);
            if declared != actual {
                return Err(ProtocolError::SizeMismatch { declared, actual });
            }
        } else if actual > 0 {
            return Err(ProtocolError::UnexpectedPayload(
                self.header.kind.to_string(),
            ));
        }

        Ok(())
    }
}

/// Encode a header to its canonical JSON bytes
pub fn encode_header(header: &Header) -> Result<Vec<u8>, ProtocolError> {
    let bytes = serde_json::to_vec(header)?;
    if bytes.len() > MAX_HEADER_SIZE as usize {
        return Err(ProtocolError::HeaderTooLarge(bytes.len()));
    }
    Ok(bytes)
}

/// Decode a header from JSON bytes
pub fn decode_header(bytes: &[u8]) -> Result<Header, ProtocolError> {
    if bytes.is_empty() {
        return Err(ProtocolError::EmptyHeader);
    }
    Ok(serde_json::from_slice(bytes)?)
}

/// Read one complete frame (blocking)
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame, ProtocolError> {
    let mut len_buf = [0u8; 4];
    read_exact_or_closed(reader, &mut len_buf, "header length")?;
    let header_len = u32::from_be_bytes(len_buf);

    if header_len == 0 {
        return Err(ProtocolError::EmptyHeader);
    }
    if header_len > MAX_HEADER_SIZE {
        return Err(ProtocolError::HeaderTooLarge(header_len as usize));
    }

    let mut header_bytes = vec![0u8; header_len as usize];
    read_exact_or_closed(reader, &mut header_bytes, "header")?;
    let header = decode_header(&header_bytes)?;

    let payload_len = header.payload_len();
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge(payload_len));
    }

    // A zero-length payload means nothing follows on the wire
    let mut payload = vec![0u8; payload_len as usize];
    if payload_len > 0 {
        read_exact_or_closed(reader, &mut payload, "payload")?;
    }

    log::trace!(
        "📥 Read {} frame ({} header bytes, {} payload bytes)",
        header.kind,
        header_len,
        payload_len
    );

    Ok(Frame { header, payload })
}

/// Write one complete frame.
///
/// The length prefix and header go out in a single write; the payload follows
/// in `chunk_size` pieces, reporting progress after each one.
pub fn write_frame<W: Write>(
    writer: &mut W,
    frame: &Frame,
    chunk_size: usize,
    progress: Option<&mut dyn ProgressObserver>,
) -> Result<(), ProtocolError> {
    frame.validate()?;

    let header = encode_header(&frame.header)?;
    let mut head = Vec::with_capacity(4 + header.len());
    head.extend_from_slice(&(header.len() as u32).to_be_bytes());
    head.extend_from_slice(&header);

    writer.write_all(&head)?;
    send_chunked(writer, &frame.payload, chunk_size, progress)?;
    writer.flush()?;

    log::trace!(
        "📤 Wrote {} frame ({} header bytes, {} payload bytes)",
        frame.header.kind,
        header.len(),
        frame.payload.len()
    );

    Ok(())
}

fn read_exact_or_closed<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    context: &'static str,
) -> Result<(), ProtocolError> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            Err(ProtocolError::ConnectionClosed { context })
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_CHUNK_SIZE;
    use std::io::Cursor;

    fn wire(frame: &Frame) -> Vec<u8> {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, frame, DEFAULT_CHUNK_SIZE, None).unwrap();
        buffer
    }

    fn raw_header(json: &str) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&(json.len() as u32).to_be_bytes());
        buffer.extend_from_slice(json.as_bytes());
        buffer
    }

    #[test]
    fn test_text_frame_roundtrip() {
        let frame = Frame::bare(Header::text("alice", "bob", "hi"));
        let bytes = wire(&frame);

        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(len as usize, bytes.len() - 4);

        let decoded = read_frame(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(decoded, frame);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_file_frame_roundtrip() {
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let header = Header::file("alice", "bob", "notes.bin", payload.len() as u64);
        let frame = Frame::new(header, payload).unwrap();

        let decoded = read_frame(&mut Cursor::new(wire(&frame))).unwrap();
        assert_eq!(decoded.header, frame.header);
        assert_eq!(decoded.payload, frame.payload);
    }

    #[test]
    fn test_header_field_order_and_omission() {
        let encoded = encode_header(&Header::text("alice", "bob", "hi")).unwrap();
        assert_eq!(
            String::from_utf8(encoded).unwrap(),
            r#"{"type":"text","from":"alice","to":"bob","message":"hi"}"#
        );

        let login = encode_header(&Header::login("alice")).unwrap();
        assert_eq!(
            String::from_utf8(login).unwrap(),
            r#"{"type":"login","from":"alice","to":"SERVER"}"#
        );
    }

    #[test]
    fn test_decode_is_inverse_of_encode() {
        let headers = vec![
            Header::login("carol"),
            Header::text("a", "b", "ünïcödé ✓"),
            Header::audio("a", "b", "audio_a_1700000000.wav", 44),
            Header::userlist(vec!["bob".into(), "carol".into()]),
            Header::system("welcome"),
        ];

        for header in headers {
            let bytes = encode_header(&header).unwrap();
            assert_eq!(decode_header(&bytes).unwrap(), header);
        }
    }

    #[test]
    fn test_unknown_type_is_preserved() {
        let bytes = raw_header(r#"{"type":"typing","from":"bob","to":"alice"}"#);
        let frame = read_frame(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(frame.header.kind, FrameKind::Unknown("typing".to_string()));
        assert_eq!(frame.header.kind.to_string(), "typing");
    }

    #[test]
    fn test_server_push_without_addresses() {
        let bytes = raw_header(r#"{"type":"system","message":"bob left"}"#);
        let frame = read_frame(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(frame.header.kind, FrameKind::System);
        assert_eq!(frame.header.from, "");
        assert_eq!(frame.header.message.as_deref(), Some("bob left"));
    }

    #[test]
    fn test_zero_filesize_reads_no_payload() {
        // Followed by another frame; the reader must not consume it as payload
        let mut bytes = raw_header(r#"{"type":"file","from":"bob","to":"alice","filename":"a.txt","filesize":0}"#);
        bytes.extend(wire(&Frame::bare(Header::system("next"))));

        let mut cursor = Cursor::new(bytes);
        let first = read_frame(&mut cursor).unwrap();
        assert!(first.payload.is_empty());
        assert_eq!(first.header.filename.as_deref(), Some("a.txt"));

        let second = read_frame(&mut cursor).unwrap();
        assert_eq!(second.header.kind, FrameKind::System);
    }

    #[test]
    fn test_empty_stream_is_connection_closed() {
        let result = read_frame(&mut Cursor::new(Vec::new()));
        assert!(matches!(
            result,
            Err(ProtocolError::ConnectionClosed {
                context: "header length"
            })
        ));
    }

    #[test]
    fn test_truncated_payload_is_connection_closed() {
        let mut bytes = raw_header(r#"{"type":"audio","from":"bob","to":"alice","filename":"x.wav","filesize":100}"#);
        bytes.extend_from_slice(&[0u8; 10]);

        let result = read_frame(&mut Cursor::new(bytes));
        match result {
            Err(e) => {
                assert!(e.is_connection_closed());
                assert!(!e.is_recoverable());
            }
            Ok(_) => panic!("Expected ConnectionClosed"),
        }
    }

    #[test]
    fn test_malformed_header_is_protocol_error() {
        let bytes = raw_header("{not json");
        let result = read_frame(&mut Cursor::new(bytes));
        match result {
            Err(e @ ProtocolError::MalformedHeader(_)) => assert!(e.is_recoverable()),
            other => panic!("Expected MalformedHeader, got {:?}", other),
        }
    }

    #[test]
    fn test_negative_filesize_is_rejected() {
        let bytes = raw_header(r#"{"type":"file","from":"a","to":"b","filename":"x","filesize":-3}"#);
        assert!(matches!(
            read_frame(&mut Cursor::new(bytes)),
            Err(ProtocolError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_oversized_header_prefix() {
        let bytes = (MAX_HEADER_SIZE + 1).to_be_bytes().to_vec();
        assert!(matches!(
            read_frame(&mut Cursor::new(bytes)),
            Err(ProtocolError::HeaderTooLarge(_))
        ));
    }

    #[test]
    fn test_oversized_payload_declaration() {
        let json = format!(
            r#"{{"type":"file","from":"a","to":"b","filename":"x","filesize":{}}}"#,
            MAX_PAYLOAD_SIZE + 1
        );
        assert!(matches!(
            read_frame(&mut Cursor::new(raw_header(&json))),
            Err(ProtocolError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn test_size_mismatch_is_rejected_before_writing() {
        let frame = Frame {
            header: Header::file("alice", "bob", "a.bin", 10),
            payload: vec![1, 2, 3],
        };

        let mut buffer = Vec::new();
        let result = write_frame(&mut buffer, &frame, DEFAULT_CHUNK_SIZE, None);
        assert!(matches!(
            result,
            Err(ProtocolError::SizeMismatch {
                declared: 10,
                actual: 3
            })
        ));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_payload_on_text_frame_is_rejected() {
        let result = Frame::new(Header::text("a", "b", "c"), vec![1]);
        assert!(matches!(result, Err(ProtocolError::UnexpectedPayload(_))));
    }

    #[test]
    fn test_multiple_frames_in_sequence() {
        let frames = vec![
            Frame::bare(Header::login("alice")),
            Frame::new(Header::audio("alice", "bob", "v.wav", 3), vec![7, 8, 9]).unwrap(),
            Frame::bare(Header::userlist(vec!["alice".into()])),
        ];

        let mut buffer = Vec::new();
        for frame in &frames {
            write_frame(&mut buffer, frame, 2, None).unwrap();
        }

        let mut cursor = Cursor::new(buffer);
        for expected in &frames {
            assert_eq!(&read_frame(&mut cursor).unwrap(), expected);
        }
        assert!(read_frame(&mut cursor).unwrap_err().is_connection_closed());
    }
}
