/// Errors that can terminate a peer session.
///
/// Application-level refusals (unsafe path, stale version, duplicate
/// content) are never represented here — they are `status: false` data
/// carried in a `*_RESPONSE` message, and the session continues after
/// sending one. Only failures severe enough to end the session reach this
/// type.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error (connect/accept/socket option failure).
    #[error("transport error: {0}")]
    Transport(#[from] filewire_transport::TransportError),

    /// Wire protocol error: unreadable line, bad JSON, missing field, or a
    /// closed connection. `ProtoError::ConnectionClosed` is the ordinary
    /// (non-error) end of a session and is logged at a lower level than the
    /// other variants.
    #[error("protocol error: {0}")]
    Protocol(#[from] filewire_proto::ProtoError),

    /// The file store reported a failure while servicing a request (not a
    /// `status: false` application refusal, an actual I/O or internal
    /// failure in the store implementation).
    #[error("store error: {0}")]
    Store(#[from] filewire_store::StoreError),

    /// A message arrived before or after a point the protocol forbids it
    /// (e.g. a second HANDSHAKE_REQUEST after handshake has completed).
    /// `INVALID_PROTOCOL` has already been sent by the time this is
    /// returned; it exists only to unwind the reader loop.
    #[error("protocol violation: {0}")]
    Violation(String),

    /// Local Node has reached its connection cap; `CONNECTION_REFUSED` has
    /// already been sent. Exists only to unwind the reader loop.
    #[error("connection refused: at capacity")]
    Refused,

    /// CONNECTION_REFUSED exhausted every hinted candidate.
    #[error("no reachable peer candidates remain")]
    NoCandidatesRemain,
}

pub type Result<T> = std::result::Result<T, PeerError>;
