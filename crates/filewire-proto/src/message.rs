use serde::{Deserialize, Serialize};

use crate::error::{ProtoError, Result};

/// A `host:port` pair identifying a peer's advertised endpoint.
///
/// Equality is structural — this is used both as a map key (the peer
/// registry) and as an element of the hinted-candidate list carried in
/// `CONNECTION_REFUSED`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for HostPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Identifies a single version of a file: its content hash, size, and
/// modification time. Never mutated after construction — a new version is a
/// new `FileDescriptor`, not an update to an existing one.
///
/// Whether `last_modified` is seconds or milliseconds is defined by whichever
/// `FileStore` implementation produced it, not by this protocol — the wire
/// format just carries whatever integer it is given and echoes it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub md5: String,
    #[serde(rename = "lastModified")]
    pub last_modified: i64,
    #[serde(rename = "fileSize")]
    pub file_size: u64,
}

impl FileDescriptor {
    pub fn new(md5: impl Into<String>, last_modified: i64, file_size: u64) -> Self {
        Self {
            md5: md5.into(),
            last_modified,
            file_size,
        }
    }
}

/// The closed set of protocol messages, tagged on the wire by the
/// `"command"` field.
///
/// Deserializing a line that is not valid JSON, names a command outside this
/// set, or omits a field a variant requires all fail the same way: the wire
/// can't tell "I don't understand this" apart from "you forgot a field", so
/// both collapse to [`ProtoError::Malformed`] (see [`decode_line`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum Message {
    #[serde(rename = "HANDSHAKE_REQUEST")]
    HandshakeRequest {
        #[serde(rename = "hostPort")]
        host_port: HostPort,
    },
    #[serde(rename = "HANDSHAKE_RESPONSE")]
    HandshakeResponse {
        #[serde(rename = "hostPort")]
        host_port: HostPort,
    },
    #[serde(rename = "CONNECTION_REFUSED")]
    ConnectionRefused { message: String, peers: Vec<HostPort> },
    #[serde(rename = "INVALID_PROTOCOL")]
    InvalidProtocol { message: String },

    #[serde(rename = "FILE_CREATE_REQUEST")]
    FileCreateRequest {
        #[serde(rename = "fileDescriptor")]
        file_descriptor: FileDescriptor,
        #[serde(rename = "pathName")]
        path_name: String,
    },
    #[serde(rename = "FILE_CREATE_RESPONSE")]
    FileCreateResponse {
        #[serde(rename = "fileDescriptor")]
        file_descriptor: FileDescriptor,
        #[serde(rename = "pathName")]
        path_name: String,
        message: String,
        status: bool,
    },

    #[serde(rename = "FILE_MODIFY_REQUEST")]
    FileModifyRequest {
        #[serde(rename = "fileDescriptor")]
        file_descriptor: FileDescriptor,
        #[serde(rename = "pathName")]
        path_name: String,
    },
    #[serde(rename = "FILE_MODIFY_RESPONSE")]
    FileModifyResponse {
        #[serde(rename = "fileDescriptor")]
        file_descriptor: FileDescriptor,
        #[serde(rename = "pathName")]
        path_name: String,
        message: String,
        status: bool,
    },

    #[serde(rename = "FILE_DELETE_REQUEST")]
    FileDeleteRequest {
        #[serde(rename = "fileDescriptor")]
        file_descriptor: FileDescriptor,
        #[serde(rename = "pathName")]
        path_name: String,
    },
    #[serde(rename = "FILE_DELETE_RESPONSE")]
    FileDeleteResponse {
        #[serde(rename = "fileDescriptor")]
        file_descriptor: FileDescriptor,
        #[serde(rename = "pathName")]
        path_name: String,
        message: String,
        status: bool,
    },

    #[serde(rename = "FILE_BYTES_REQUEST")]
    FileBytesRequest {
        #[serde(rename = "fileDescriptor")]
        file_descriptor: FileDescriptor,
        #[serde(rename = "pathName")]
        path_name: String,
        position: u64,
        length: u64,
    },
    #[serde(rename = "FILE_BYTES_RESPONSE")]
    FileBytesResponse {
        #[serde(rename = "fileDescriptor")]
        file_descriptor: FileDescriptor,
        #[serde(rename = "pathName")]
        path_name: String,
        position: u64,
        length: u64,
        /// Base64-encoded chunk content.
        content: String,
        message: String,
        status: bool,
    },

    #[serde(rename = "DIRECTORY_CREATE_REQUEST")]
    DirectoryCreateRequest {
        #[serde(rename = "pathName")]
        path_name: String,
    },
    #[serde(rename = "DIRECTORY_CREATE_RESPONSE")]
    DirectoryCreateResponse {
        #[serde(rename = "pathName")]
        path_name: String,
        message: String,
        status: bool,
    },

    #[serde(rename = "DIRECTORY_DELETE_REQUEST")]
    DirectoryDeleteRequest {
        #[serde(rename = "pathName")]
        path_name: String,
    },
    #[serde(rename = "DIRECTORY_DELETE_RESPONSE")]
    DirectoryDeleteResponse {
        #[serde(rename = "pathName")]
        path_name: String,
        message: String,
        status: bool,
    },
}

impl Message {
    /// The command name this message carries on the wire, e.g.
    /// `"FILE_CREATE_REQUEST"`.
    pub fn command(&self) -> &'static str {
        match self {
            Message::HandshakeRequest { .. } => "HANDSHAKE_REQUEST",
            Message::HandshakeResponse { .. } => "HANDSHAKE_RESPONSE",
            Message::ConnectionRefused { .. } => "CONNECTION_REFUSED",
            Message::InvalidProtocol { .. } => "INVALID_PROTOCOL",
            Message::FileCreateRequest { .. } => "FILE_CREATE_REQUEST",
            Message::FileCreateResponse { .. } => "FILE_CREATE_RESPONSE",
            Message::FileModifyRequest { .. } => "FILE_MODIFY_REQUEST",
            Message::FileModifyResponse { .. } => "FILE_MODIFY_RESPONSE",
            Message::FileDeleteRequest { .. } => "FILE_DELETE_REQUEST",
            Message::FileDeleteResponse { .. } => "FILE_DELETE_RESPONSE",
            Message::FileBytesRequest { .. } => "FILE_BYTES_REQUEST",
            Message::FileBytesResponse { .. } => "FILE_BYTES_RESPONSE",
            Message::DirectoryCreateRequest { .. } => "DIRECTORY_CREATE_REQUEST",
            Message::DirectoryCreateResponse { .. } => "DIRECTORY_CREATE_RESPONSE",
            Message::DirectoryDeleteRequest { .. } => "DIRECTORY_DELETE_REQUEST",
            Message::DirectoryDeleteResponse { .. } => "DIRECTORY_DELETE_RESPONSE",
        }
    }

    /// Encode this message as a single JSON line, without the trailing
    /// newline (callers append the line terminator when writing to the
    /// socket — see [`crate::writer::LineWriter`]).
    pub fn encode_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|_| ProtoError::Malformed)
    }
}

/// Decode one line of the wire protocol into a [`Message`].
///
/// A blank line (`EOF` mid-read, or a bare `\n`) and a line that parses as
/// JSON but isn't an object with a recognized `"command"` both produce
/// [`ProtoError::Malformed`] — callers reply `INVALID_PROTOCOL` and
/// terminate the session either way, per the wire contract.
pub fn decode_line(line: &str) -> Result<Message> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    if trimmed.is_empty() {
        return Err(ProtoError::Malformed);
    }
    serde_json::from_str(trimmed).map_err(|_| ProtoError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_request_roundtrip() {
        let msg = Message::HandshakeRequest {
            host_port: HostPort::new("a", 1),
        };
        let line = msg.encode_line().unwrap();
        assert_eq!(
            line,
            r#"{"command":"HANDSHAKE_REQUEST","hostPort":{"host":"a","port":1}}"#
        );
        assert_eq!(decode_line(&line).unwrap(), msg);
    }

    #[test]
    fn connection_refused_roundtrip() {
        let msg = Message::ConnectionRefused {
            message: "at capacity".to_string(),
            peers: vec![HostPort::new("c", 3), HostPort::new("d", 4)],
        };
        let line = msg.encode_line().unwrap();
        let decoded = decode_line(&line).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn file_bytes_response_roundtrip() {
        let msg = Message::FileBytesResponse {
            file_descriptor: FileDescriptor::new("deadbeef", 100, 5),
            path_name: "f".to_string(),
            position: 0,
            length: 2,
            content: "aGVsbG8=".to_string(),
            message: "successful read".to_string(),
            status: true,
        };
        let line = msg.encode_line().unwrap();
        assert_eq!(decode_line(&line).unwrap(), msg);
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let line = r#"{"command":"FILE_CREATE_REQUEST","pathName":"f"}"#;
        assert!(matches!(decode_line(line), Err(ProtoError::Malformed)));
    }

    #[test]
    fn unknown_command_is_malformed() {
        let line = r#"{"command":"TELEPORT_REQUEST"}"#;
        assert!(matches!(decode_line(line), Err(ProtoError::Malformed)));
    }

    #[test]
    fn invalid_json_is_malformed() {
        assert!(matches!(decode_line("{not-json"), Err(ProtoError::Malformed)));
    }

    #[test]
    fn blank_line_is_malformed() {
        assert!(matches!(decode_line(""), Err(ProtoError::Malformed)));
        assert!(matches!(decode_line("\n"), Err(ProtoError::Malformed)));
    }

    #[test]
    fn directory_create_request_roundtrip() {
        let msg = Message::DirectoryCreateRequest {
            path_name: "sub/dir".to_string(),
        };
        let line = msg.encode_line().unwrap();
        assert_eq!(decode_line(&line).unwrap(), msg);
    }
}
