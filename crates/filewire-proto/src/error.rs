/// Errors that can occur while decoding or encoding wire messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// The line was not valid JSON, named an unrecognized command, or was
    /// missing a field the command requires. The wire contract makes no
    /// distinction between these — all three are reported to the remote as
    /// the same `INVALID_PROTOCOL` reason.
    #[error("invalid protocol: the message misses required fields")]
    Malformed,

    /// An I/O error occurred while reading or writing a line.
    #[error("protocol I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a line was received.
    #[error("connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, ProtoError>;
