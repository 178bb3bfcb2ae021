use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use filewire_proto::{FileDescriptor, HostPort, LineReader, LineWriter, Message, ProtoError};
use filewire_store::FileStore;
use filewire_transport::{PeerStream, TcpEndpoint};

use crate::error::{PeerError, Result};
use crate::node::{FsEvent, LocalNode};

/// One TCP connection to a remote peer and its protocol state.
///
/// Per §5's shared-resource policy: `writer` is the only field touched from
/// more than one thread (the reader loop and the FS-event fan-out caller),
/// so it alone is mutex-guarded; `handshake_completed` uses acquire/release
/// ordering so a fan-out reader observes a consistent value without taking
/// the writer lock. `client_host_port` is set only by the reader loop but
/// read from fan-out, so it is also behind a mutex. The reconnection
/// candidate list (`peerCandidates` in the protocol write-up) is not a
/// field at all — it lives on the reader loop's stack, since nothing but
/// that loop ever touches it.
pub struct PeerSession {
    id: AtomicU64,
    handshake_completed: AtomicBool,
    client_host_port: Mutex<Option<HostPort>>,
    writer: Mutex<LineWriter<PeerStream>>,
}

impl PeerSession {
    fn new(writer_stream: PeerStream) -> Self {
        Self {
            id: AtomicU64::new(0),
            handshake_completed: AtomicBool::new(false),
            client_host_port: Mutex::new(None),
            writer: Mutex::new(LineWriter::new(writer_stream)),
        }
    }

    fn set_id(&self, id: u64) {
        self.id.store(id, Ordering::Relaxed);
    }

    fn id(&self) -> u64 {
        self.id.load(Ordering::Relaxed)
    }

    pub fn handshake_completed(&self) -> bool {
        self.handshake_completed.load(Ordering::Acquire)
    }

    pub fn client_host_port(&self) -> Option<HostPort> {
        self.client_host_port.lock().unwrap().clone()
    }

    fn send(&self, message: &Message) -> Result<()> {
        self.writer.lock().unwrap().send(message).map_err(Into::into)
    }

    fn replace_writer(&self, stream: PeerStream) {
        *self.writer.lock().unwrap() = LineWriter::new(stream);
    }

    /// Translate a local FS event into the matching outbound request and
    /// send it. Called from the fan-out path, never from the reader loop.
    pub fn send_fs_event(&self, event: &FsEvent) -> Result<()> {
        let message = match event.clone() {
            FsEvent::FileCreate {
                file_descriptor,
                path_name,
            } => Message::FileCreateRequest {
                file_descriptor,
                path_name,
            },
            FsEvent::FileModify {
                file_descriptor,
                path_name,
            } => Message::FileModifyRequest {
                file_descriptor,
                path_name,
            },
            FsEvent::FileDelete {
                file_descriptor,
                path_name,
            } => Message::FileDeleteRequest {
                file_descriptor,
                path_name,
            },
            FsEvent::DirectoryCreate { path_name } => {
                Message::DirectoryCreateRequest { path_name }
            }
            FsEvent::DirectoryDelete { path_name } => {
                Message::DirectoryDeleteRequest { path_name }
            }
        };
        self.send(&message)
    }
}

enum Dispatch {
    Continue,
    Terminate,
    Reconnect,
}

const INVALID_PROTOCOL_MALFORMED: &str = "Invalid protocol: the message misses required fields";
const INVALID_PROTOCOL_DUPLICATE_HANDSHAKE: &str = "Invalid protocol: handshake has been completed";
const INVALID_PROTOCOL_UNEXPECTED_REFUSAL: &str =
    "Invalid protocol: connection refused after handshake completion";

/// Run a session that was accepted from a listener — the remote initiates
/// the handshake.
pub fn run_inbound(node: Arc<LocalNode>, stream: PeerStream) -> Result<()> {
    run(node, stream, None)
}

/// Run a session for a connection this node initiated — we send
/// HANDSHAKE_REQUEST first.
pub fn run_outbound(node: Arc<LocalNode>, stream: PeerStream) -> Result<()> {
    let host_port = node.advertised_host_port();
    run(node, stream, Some(host_port))
}

fn run(node: Arc<LocalNode>, stream: PeerStream, initiate_with: Option<HostPort>) -> Result<()> {
    let session = Arc::new(PeerSession::new(stream.try_clone()?));
    let id = node.register(session.clone());
    session.set_id(id);

    let outcome = run_loop(&session, &node, stream, initiate_with);
    node.deregister(id);
    outcome
}

fn run_loop(
    session: &Arc<PeerSession>,
    node: &Arc<LocalNode>,
    mut stream: PeerStream,
    initiate_with: Option<HostPort>,
) -> Result<()> {
    if let Some(host_port) = initiate_with {
        session.send(&Message::HandshakeRequest { host_port })?;
    }

    let mut reader = LineReader::new(stream.try_clone()?);
    let mut candidates: VecDeque<HostPort> = VecDeque::new();

    loop {
        let message = match reader.read_message() {
            Ok(message) => message,
            Err(ProtoError::ConnectionClosed) => {
                tracing::debug!(session = session.id(), "session closed");
                return Ok(());
            }
            Err(err) => {
                let _ = session.send(&Message::InvalidProtocol {
                    message: INVALID_PROTOCOL_MALFORMED.to_string(),
                });
                return Err(err.into());
            }
        };

        match dispatch(session, node, message, &mut candidates)? {
            Dispatch::Continue => continue,
            Dispatch::Terminate => return Ok(()),
            Dispatch::Reconnect => match reconnect(session, node, &mut candidates)? {
                Some(new_stream) => {
                    reader = LineReader::new(new_stream.try_clone()?);
                    stream = new_stream;
                }
                None => return Err(PeerError::NoCandidatesRemain),
            },
        }
    }
}

fn reconnect(
    session: &PeerSession,
    node: &Arc<LocalNode>,
    candidates: &mut VecDeque<HostPort>,
) -> Result<Option<PeerStream>> {
    while let Some(candidate) = candidates.pop_front() {
        match TcpEndpoint::connect(&candidate.host, candidate.port) {
            Ok(stream) => {
                session.replace_writer(stream.try_clone()?);
                *session.client_host_port.lock().unwrap() = Some(candidate);
                session.send(&Message::HandshakeRequest {
                    host_port: node.advertised_host_port(),
                })?;
                return Ok(Some(stream));
            }
            Err(err) => {
                tracing::debug!(candidate = %candidate, error = %err, "candidate unreachable");
                continue;
            }
        }
    }
    Ok(None)
}

fn dispatch(
    session: &Arc<PeerSession>,
    node: &Arc<LocalNode>,
    message: Message,
    candidates: &mut VecDeque<HostPort>,
) -> Result<Dispatch> {
    match message {
        Message::HandshakeRequest { host_port } => handle_handshake_request(session, node, host_port),
        Message::HandshakeResponse { host_port } => {
            handle_handshake_response(session, host_port, candidates)
        }
        Message::ConnectionRefused { peers, .. } => {
            // A refusal arriving after handshake completion is impossible
            // per protocol (the refusal/candidate-retry flow only makes
            // sense pre-handshake); treat it as a violation rather than
            // silently reconnecting an already-established session.
            if session.handshake_completed() {
                session.send(&Message::InvalidProtocol {
                    message: INVALID_PROTOCOL_UNEXPECTED_REFUSAL.to_string(),
                })?;
                return Ok(Dispatch::Terminate);
            }
            handle_connection_refused(peers, candidates)
        }
        Message::InvalidProtocol { message } => {
            tracing::warn!(session = session.id(), %message, "peer reported invalid protocol");
            Ok(Dispatch::Terminate)
        }

        other if !session.handshake_completed() => {
            // P1: anything other than HANDSHAKE_*/CONNECTION_REFUSED before
            // handshake completion is dropped without a reply.
            tracing::debug!(session = session.id(), command = other.command(), "dropped pre-handshake message");
            Ok(Dispatch::Continue)
        }

        Message::FileCreateRequest {
            file_descriptor,
            path_name,
        } => handle_file_create_request(session, node, file_descriptor, path_name),
        Message::FileModifyRequest {
            file_descriptor,
            path_name,
        } => handle_file_modify_request(session, node, file_descriptor, path_name),
        Message::FileDeleteRequest {
            file_descriptor,
            path_name,
        } => handle_file_delete_request(session, node, file_descriptor, path_name),
        Message::DirectoryCreateRequest { path_name } => {
            handle_directory_create_request(session, node, path_name)
        }
        Message::DirectoryDeleteRequest { path_name } => {
            handle_directory_delete_request(session, node, path_name)
        }
        Message::FileBytesRequest {
            file_descriptor,
            path_name,
            position,
            length,
        } => handle_file_bytes_request(session, node, file_descriptor, path_name, position, length),
        Message::FileBytesResponse {
            file_descriptor,
            path_name,
            position,
            length,
            content,
            status,
            message,
        } => handle_file_bytes_response(
            session,
            node,
            file_descriptor,
            path_name,
            position,
            length,
            content,
            status,
            message,
        ),

        response @ (Message::FileCreateResponse { .. }
        | Message::FileModifyResponse { .. }
        | Message::FileDeleteResponse { .. }
        | Message::DirectoryCreateResponse { .. }
        | Message::DirectoryDeleteResponse { .. }) => {
            log_response_if_failed(session, &response);
            Ok(Dispatch::Continue)
        }
    }
}

fn log_response_if_failed(session: &PeerSession, response: &Message) {
    let (status, message) = match response {
        Message::FileCreateResponse { status, message, .. }
        | Message::FileModifyResponse { status, message, .. }
        | Message::FileDeleteResponse { status, message, .. }
        | Message::DirectoryCreateResponse { status, message, .. }
        | Message::DirectoryDeleteResponse { status, message, .. } => (*status, message.as_str()),
        _ => return,
    };
    if !status {
        tracing::info!(session = session.id(), command = response.command(), %message, "peer reported a failed response");
    }
}

fn handle_handshake_request(
    session: &Arc<PeerSession>,
    node: &Arc<LocalNode>,
    host_port: HostPort,
) -> Result<Dispatch> {
    if session.handshake_completed() {
        session.send(&Message::InvalidProtocol {
            message: INVALID_PROTOCOL_DUPLICATE_HANDSHAKE.to_string(),
        })?;
        return Ok(Dispatch::Terminate);
    }

    if node.has_reached_max_connections() {
        let peers = node.get_connected_peer_host_port(session.id());
        session.send(&Message::ConnectionRefused {
            message: "Local node has reached its maximum incoming connections".to_string(),
            peers,
        })?;
        return Ok(Dispatch::Terminate);
    }

    *session.client_host_port.lock().unwrap() = Some(host_port);
    session.send(&Message::HandshakeResponse {
        host_port: node.advertised_host_port(),
    })?;
    session.handshake_completed.store(true, Ordering::Release);
    Ok(Dispatch::Continue)
}

fn handle_handshake_response(
    session: &Arc<PeerSession>,
    host_port: HostPort,
    candidates: &mut VecDeque<HostPort>,
) -> Result<Dispatch> {
    *session.client_host_port.lock().unwrap() = Some(host_port);
    candidates.clear();
    session.handshake_completed.store(true, Ordering::Release);
    Ok(Dispatch::Continue)
}

fn handle_connection_refused(
    peers: Vec<HostPort>,
    candidates: &mut VecDeque<HostPort>,
) -> Result<Dispatch> {
    for peer in peers {
        if !candidates.contains(&peer) {
            candidates.push_back(peer);
        }
    }
    if candidates.is_empty() {
        Ok(Dispatch::Terminate)
    } else {
        Ok(Dispatch::Reconnect)
    }
}

fn handle_file_create_request(
    session: &PeerSession,
    node: &Arc<LocalNode>,
    fd: FileDescriptor,
    path_name: String,
) -> Result<Dispatch> {
    let store = node.store();
    let (status, message, request_bytes) = if !store.is_safe_path_name(&path_name) {
        (false, format!("Path name is unsafe: {path_name}"), false)
    } else if store.file_name_exists_with_hash(&path_name, &fd.md5) {
        (
            false,
            format!("File with the same content has existed: {path_name}"),
            false,
        )
    } else if store.file_name_exists(&path_name) {
        if store.modify_file_loader(&path_name, &fd.md5, fd.last_modified)? {
            (true, "Overwrite the older version".to_string(), true)
        } else {
            (false, format!("There is a newer version: {path_name}"), false)
        }
    } else {
        store.create_file_loader(&path_name, &fd.md5, fd.file_size, fd.last_modified)?;
        if store.check_shortcut(&path_name)? {
            (
                false,
                "There is a file with the same content, no need to transfer it again."
                    .to_string(),
                false,
            )
        } else {
            (true, "File loader ready".to_string(), true)
        }
    };

    session.send(&Message::FileCreateResponse {
        file_descriptor: fd.clone(),
        path_name: path_name.clone(),
        message,
        status,
    })?;

    if request_bytes {
        request_first_chunk(session, node, fd, path_name)?;
    }
    Ok(Dispatch::Continue)
}

fn handle_file_modify_request(
    session: &PeerSession,
    node: &Arc<LocalNode>,
    fd: FileDescriptor,
    path_name: String,
) -> Result<Dispatch> {
    let store = node.store();
    let (status, message, request_bytes) = if !store.is_safe_path_name(&path_name) {
        (false, format!("Path name is unsafe: {path_name}"), false)
    } else if store.file_name_exists_with_hash(&path_name, &fd.md5) {
        (
            false,
            format!("File with the same content has existed: {path_name}"),
            false,
        )
    } else if !store.modify_file_loader(&path_name, &fd.md5, fd.last_modified)? {
        (
            false,
            "File doesn't exist: File modify request failed".to_string(),
            false,
        )
    } else {
        (true, "Modify file loader ready".to_string(), true)
    };

    session.send(&Message::FileModifyResponse {
        file_descriptor: fd.clone(),
        path_name: path_name.clone(),
        message,
        status,
    })?;

    if request_bytes {
        request_first_chunk(session, node, fd, path_name)?;
    }
    Ok(Dispatch::Continue)
}

fn request_first_chunk(
    session: &PeerSession,
    node: &Arc<LocalNode>,
    fd: FileDescriptor,
    path_name: String,
) -> Result<()> {
    let length = node.block_size().min(fd.file_size);
    session.send(&Message::FileBytesRequest {
        file_descriptor: fd,
        path_name,
        position: 0,
        length,
    })
}

fn handle_file_delete_request(
    session: &PeerSession,
    node: &Arc<LocalNode>,
    fd: FileDescriptor,
    path_name: String,
) -> Result<Dispatch> {
    let store = node.store();
    let (status, message) = if !store.is_safe_path_name(&path_name) {
        (false, format!("Path name is unsafe: {path_name}"))
    } else if !store.delete_file(&path_name, fd.last_modified, &fd.md5)? {
        (false, format!("File doesn't exist: {path_name}"))
    } else {
        (true, "The file was deleted".to_string())
    };

    session.send(&Message::FileDeleteResponse {
        file_descriptor: fd,
        path_name,
        message,
        status,
    })?;
    Ok(Dispatch::Continue)
}

fn handle_directory_create_request(
    session: &PeerSession,
    node: &Arc<LocalNode>,
    path_name: String,
) -> Result<Dispatch> {
    let store = node.store();
    let (status, message) = if !store.is_safe_path_name(&path_name) {
        (false, format!("Path name is unsafe: {path_name}"))
    } else if store.dir_name_exists(&path_name) {
        (false, format!("Directory name has existed: {path_name}"))
    } else {
        store.make_directory(&path_name)?;
        (true, "Directory was created".to_string())
    };

    session.send(&Message::DirectoryCreateResponse {
        path_name,
        message,
        status,
    })?;
    Ok(Dispatch::Continue)
}

fn handle_directory_delete_request(
    session: &PeerSession,
    node: &Arc<LocalNode>,
    path_name: String,
) -> Result<Dispatch> {
    let store = node.store();
    let (status, message) = if !store.is_safe_path_name(&path_name) {
        (false, format!("Path name is unsafe: {path_name}"))
    } else if !store.dir_name_exists(&path_name) {
        (false, format!("Directory doesn't exist: {path_name}"))
    } else {
        store.delete_directory(&path_name)?;
        (true, "Directory was deleted".to_string())
    };

    session.send(&Message::DirectoryDeleteResponse {
        path_name,
        message,
        status,
    })?;
    Ok(Dispatch::Continue)
}

fn handle_file_bytes_request(
    session: &PeerSession,
    node: &Arc<LocalNode>,
    fd: FileDescriptor,
    path_name: String,
    position: u64,
    length: u64,
) -> Result<Dispatch> {
    let bytes = node.store().read_file(&fd.md5, position, length)?;
    use base64::Engine;
    let content = base64::engine::general_purpose::STANDARD.encode(&bytes);

    session.send(&Message::FileBytesResponse {
        file_descriptor: fd,
        path_name,
        position,
        length,
        content,
        message: "successful read".to_string(),
        status: true,
    })?;
    Ok(Dispatch::Continue)
}

fn handle_file_bytes_response(
    session: &PeerSession,
    node: &Arc<LocalNode>,
    fd: FileDescriptor,
    path_name: String,
    position: u64,
    length: u64,
    content: String,
    status: bool,
    message: String,
) -> Result<Dispatch> {
    let store = node.store();

    if !status {
        tracing::info!(session = session.id(), %path_name, %message, "peer reported a failed chunk read");
        store.cancel_file_loader(&path_name)?;
        return Ok(Dispatch::Continue);
    }

    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(content.as_bytes())
        .map_err(|_| PeerError::Violation(format!("invalid base64 chunk for {path_name}")))?;
    store.write_file(&path_name, &bytes, position)?;

    let next_position = position + length;
    let remaining = fd.file_size.saturating_sub(next_position);
    let next_length = remaining.min(length);

    if !store.check_write_complete(&path_name)? && next_length != 0 {
        session.send(&Message::FileBytesRequest {
            file_descriptor: fd,
            path_name,
            position: next_position,
            length: next_length,
        })?;
    } else {
        store.cancel_file_loader(&path_name)?;
    }
    Ok(Dispatch::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use filewire_store::InMemoryFileStore;
    use std::time::Duration;

    fn socket_pair() -> (PeerStream, PeerStream) {
        let endpoint = TcpEndpoint::bind("127.0.0.1:0").unwrap();
        let port = endpoint.local_port().unwrap();
        let client = TcpEndpoint::connect("127.0.0.1", port).unwrap();
        let server = endpoint.accept().unwrap();
        server
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        (server, client)
    }

    fn node(block_size: u64, max_connections: usize) -> Arc<LocalNode> {
        LocalNode::new(
            Arc::new(InMemoryFileStore::new()),
            block_size,
            max_connections,
            HostPort::new("srv", 9000),
        )
    }

    fn read_reply(stream: PeerStream) -> Message {
        LineReader::new(stream).read_message().unwrap()
    }

    fn expect_no_reply(stream: PeerStream) {
        let mut reader = LineReader::new(stream);
        let err = reader.read_message().unwrap_err();
        assert!(matches!(
            err,
            ProtoError::Io(_) | ProtoError::ConnectionClosed
        ));
    }

    #[test]
    fn handshake_request_completes_and_replies() {
        let (local, remote) = socket_pair();
        let session = Arc::new(PeerSession::new(local));
        let node = node(4, 4);
        let mut candidates = VecDeque::new();

        let outcome = dispatch(
            &session,
            &node,
            Message::HandshakeRequest {
                host_port: HostPort::new("cli", 1),
            },
            &mut candidates,
        )
        .unwrap();

        assert!(matches!(outcome, Dispatch::Continue));
        assert!(session.handshake_completed());
        assert_eq!(session.client_host_port(), Some(HostPort::new("cli", 1)));
        assert_eq!(
            read_reply(remote),
            Message::HandshakeResponse {
                host_port: HostPort::new("srv", 9000)
            }
        );
    }

    // P2
    #[test]
    fn duplicate_handshake_is_rejected_and_terminates() {
        let (local, remote) = socket_pair();
        let session = Arc::new(PeerSession::new(local));
        session.handshake_completed.store(true, Ordering::Release);
        let node = node(4, 4);
        let mut candidates = VecDeque::new();

        let outcome = dispatch(
            &session,
            &node,
            Message::HandshakeRequest {
                host_port: HostPort::new("cli", 1),
            },
            &mut candidates,
        )
        .unwrap();

        assert!(matches!(outcome, Dispatch::Terminate));
        assert_eq!(
            read_reply(remote),
            Message::InvalidProtocol {
                message: INVALID_PROTOCOL_DUPLICATE_HANDSHAKE.to_string()
            }
        );
    }

    #[test]
    fn handshake_refused_at_capacity_hints_connected_peers() {
        let (local, remote) = socket_pair();
        let session = Arc::new(PeerSession::new(local));
        let node = node(4, 0);
        let mut candidates = VecDeque::new();

        let outcome = dispatch(
            &session,
            &node,
            Message::HandshakeRequest {
                host_port: HostPort::new("cli", 1),
            },
            &mut candidates,
        )
        .unwrap();

        assert!(matches!(outcome, Dispatch::Terminate));
        match read_reply(remote) {
            Message::ConnectionRefused { peers, .. } => assert!(peers.is_empty()),
            other => panic!("expected CONNECTION_REFUSED, got {other:?}"),
        }
    }

    // P7: a refused peer never sees itself in its own hint list.
    #[test]
    fn refusal_excludes_connected_peers_client_host_port() {
        let node = node(4, 1);

        // Register one already-handshaked session so it shows up as a hint
        // candidate for everyone except itself.
        let (other_local, _other_remote) = socket_pair();
        let other = Arc::new(PeerSession::new(other_local));
        *other.client_host_port.lock().unwrap() = Some(HostPort::new("other", 5));
        other.handshake_completed.store(true, Ordering::Release);
        let other_id = node.register(other.clone());
        other.set_id(other_id);

        let (local, remote) = socket_pair();
        let session = Arc::new(PeerSession::new(local));
        let session_id = node.register(session.clone());
        session.set_id(session_id);
        let mut candidates = VecDeque::new();

        dispatch(
            &session,
            &node,
            Message::HandshakeRequest {
                host_port: HostPort::new("cli", 1),
            },
            &mut candidates,
        )
        .unwrap();

        match read_reply(remote) {
            Message::ConnectionRefused { peers, .. } => {
                assert_eq!(peers, vec![HostPort::new("other", 5)]);
            }
            other => panic!("expected CONNECTION_REFUSED, got {other:?}"),
        }
    }

    // P1: nothing but HANDSHAKE_*/CONNECTION_REFUSED is processed pre-handshake.
    #[test]
    fn pre_handshake_messages_are_dropped_without_reply() {
        let (local, remote) = socket_pair();
        let session = Arc::new(PeerSession::new(local));
        let node = node(4, 4);
        let mut candidates = VecDeque::new();

        let outcome = dispatch(
            &session,
            &node,
            Message::FileCreateRequest {
                file_descriptor: FileDescriptor::new("x", 1, 5),
                path_name: "f".to_string(),
            },
            &mut candidates,
        )
        .unwrap();

        assert!(matches!(outcome, Dispatch::Continue));
        assert!(!session.handshake_completed());
        expect_no_reply(remote);
    }

    fn handshaked_session() -> (Arc<PeerSession>, PeerStream, Arc<LocalNode>) {
        let (local, remote) = socket_pair();
        let session = Arc::new(PeerSession::new(local));
        session.handshake_completed.store(true, Ordering::Release);
        (session, remote, node(2, 4))
    }

    // P8: an unsafe path wins over a content collision.
    #[test]
    fn unsafe_path_rule_fires_before_collision_rule() {
        let (session, remote, node) = handshaked_session();
        let mut candidates = VecDeque::new();
        let outcome = dispatch(
            &session,
            &node,
            Message::FileCreateRequest {
                file_descriptor: FileDescriptor::new("deadbeef", 1, 4),
                path_name: "../escape.txt".to_string(),
            },
            &mut candidates,
        )
        .unwrap();

        assert!(matches!(outcome, Dispatch::Continue));
        match read_reply(remote) {
            Message::FileCreateResponse { status, message, .. } => {
                assert!(!status);
                assert!(message.starts_with("Path name is unsafe"));
            }
            other => panic!("expected FILE_CREATE_RESPONSE, got {other:?}"),
        }
    }

    #[test]
    fn file_create_full_chunked_transfer_completes() {
        let (session, remote, node) = handshaked_session();
        let mut remote_reader = LineReader::new(remote.try_clone().unwrap());
        let content = b"hello";
        let md5 = format!("{:x}", md5::compute(content));
        let fd = FileDescriptor::new(md5.clone(), 100, content.len() as u64);
        let mut candidates = VecDeque::new();

        dispatch(
            &session,
            &node,
            Message::FileCreateRequest {
                file_descriptor: fd.clone(),
                path_name: "greeting.txt".to_string(),
            },
            &mut candidates,
        )
        .unwrap();

        match remote_reader.read_message().unwrap() {
            Message::FileCreateResponse { status, .. } => assert!(status),
            other => panic!("expected FILE_CREATE_RESPONSE, got {other:?}"),
        }

        let mut position = 0u64;
        loop {
            let request = match remote_reader.read_message().unwrap() {
                Message::FileBytesRequest {
                    position: p,
                    length,
                    ..
                } => (p, length),
                other => panic!("expected FILE_BYTES_REQUEST, got {other:?}"),
            };
            assert_eq!(request.0, position);
            let length = request.1 as usize;
            let chunk = &content[position as usize..position as usize + length];
            let encoded = base64::engine::general_purpose::STANDARD.encode(chunk);

            dispatch(
                &session,
                &node,
                Message::FileBytesResponse {
                    file_descriptor: fd.clone(),
                    path_name: "greeting.txt".to_string(),
                    position,
                    length: length as u64,
                    content: encoded,
                    message: "successful read".to_string(),
                    status: true,
                },
                &mut candidates,
            )
            .unwrap();

            position += length as u64;
            if position >= content.len() as u64 {
                break;
            }
        }

        assert!(node.store().file_name_exists_with_hash("greeting.txt", &md5));
    }

    // P5: a shortcut completion sends exactly one response and no byte requests.
    #[test]
    fn shortcut_completion_sends_no_bytes_request() {
        let (session, remote, node) = handshaked_session();
        let content = b"shared";
        let md5 = format!("{:x}", md5::compute(content));
        let mut candidates = VecDeque::new();

        dispatch(
            &session,
            &node,
            Message::FileCreateRequest {
                file_descriptor: FileDescriptor::new(md5.clone(), 1, content.len() as u64),
                path_name: "first.txt".to_string(),
            },
            &mut candidates,
        )
        .unwrap();

        let mut remote_reader = LineReader::new(remote.try_clone().unwrap());
        match remote_reader.read_message().unwrap() {
            Message::FileCreateResponse { status, .. } => assert!(status),
            other => panic!("expected FILE_CREATE_RESPONSE, got {other:?}"),
        }

        let mut position = 0u64;
        while !node.store().check_write_complete("first.txt").unwrap_or(true) {
            let (p, length) = match remote_reader.read_message().unwrap() {
                Message::FileBytesRequest { position, length, .. } => (position, length),
                other => panic!("expected FILE_BYTES_REQUEST, got {other:?}"),
            };
            let chunk = &content[p as usize..(p + length) as usize];
            let encoded = base64::engine::general_purpose::STANDARD.encode(chunk);
            dispatch(
                &session,
                &node,
                Message::FileBytesResponse {
                    file_descriptor: FileDescriptor::new(md5.clone(), 1, content.len() as u64),
                    path_name: "first.txt".to_string(),
                    position: p,
                    length,
                    content: encoded,
                    message: "successful read".to_string(),
                    status: true,
                },
                &mut candidates,
            )
            .unwrap();
            position = p + length;
        }
        let _ = position;

        let outcome = dispatch(
            &session,
            &node,
            Message::FileCreateRequest {
                file_descriptor: FileDescriptor::new(md5.clone(), 2, content.len() as u64),
                path_name: "second.txt".to_string(),
            },
            &mut candidates,
        )
        .unwrap();

        assert!(matches!(outcome, Dispatch::Continue));
        match remote_reader.read_message().unwrap() {
            Message::FileCreateResponse { status, message, .. } => {
                assert!(!status);
                assert_eq!(
                    message,
                    "There is a file with the same content, no need to transfer it again."
                );
            }
            other => panic!("expected FILE_CREATE_RESPONSE, got {other:?}"),
        }
        expect_no_reply(remote);
    }

    #[test]
    fn stale_modify_is_rejected() {
        let (session, remote, node) = handshaked_session();
        let mut candidates = VecDeque::new();

        // Seed an existing, newer version directly through create+cancel.
        let seed_fd = FileDescriptor::new("v1hash", 100, 2);
        dispatch(
            &session,
            &node,
            Message::FileCreateRequest {
                file_descriptor: seed_fd,
                path_name: "doc.txt".to_string(),
            },
            &mut candidates,
        )
        .unwrap();
        let mut remote_reader = LineReader::new(remote.try_clone().unwrap());
        let _ = remote_reader.read_message().unwrap(); // FILE_CREATE_RESPONSE
        let _ = remote_reader.read_message().unwrap(); // FILE_BYTES_REQUEST
        dispatch(
            &session,
            &node,
            Message::FileBytesResponse {
                file_descriptor: FileDescriptor::new("v1hash", 100, 2),
                path_name: "doc.txt".to_string(),
                position: 0,
                length: 2,
                content: base64::engine::general_purpose::STANDARD.encode(b"v1"),
                message: "successful read".to_string(),
                status: true,
            },
            &mut candidates,
        )
        .unwrap();

        let outcome = dispatch(
            &session,
            &node,
            Message::FileModifyRequest {
                file_descriptor: FileDescriptor::new("v2hash", 50, 2),
                path_name: "doc.txt".to_string(),
            },
            &mut candidates,
        )
        .unwrap();

        assert!(matches!(outcome, Dispatch::Continue));
        match remote_reader.read_message().unwrap() {
            Message::FileModifyResponse { status, message, .. } => {
                assert!(!status);
                assert_eq!(message, "File doesn't exist: File modify request failed");
            }
            other => panic!("expected FILE_MODIFY_RESPONSE, got {other:?}"),
        }
    }

    #[test]
    fn directory_lifecycle_over_dispatch() {
        let (session, remote, node) = handshaked_session();
        let mut remote_reader = LineReader::new(remote.try_clone().unwrap());
        let mut candidates = VecDeque::new();

        dispatch(
            &session,
            &node,
            Message::DirectoryCreateRequest {
                path_name: "sub".to_string(),
            },
            &mut candidates,
        )
        .unwrap();
        match remote_reader.read_message().unwrap() {
            Message::DirectoryCreateResponse { status, .. } => assert!(status),
            other => panic!("expected DIRECTORY_CREATE_RESPONSE, got {other:?}"),
        }

        dispatch(
            &session,
            &node,
            Message::DirectoryCreateRequest {
                path_name: "sub".to_string(),
            },
            &mut candidates,
        )
        .unwrap();
        match remote_reader.read_message().unwrap() {
            Message::DirectoryCreateResponse { status, message, .. } => {
                assert!(!status);
                assert!(message.starts_with("Directory name has existed"));
            }
            other => panic!("expected DIRECTORY_CREATE_RESPONSE, got {other:?}"),
        }

        dispatch(
            &session,
            &node,
            Message::DirectoryDeleteRequest {
                path_name: "sub".to_string(),
            },
            &mut candidates,
        )
        .unwrap();
        match remote_reader.read_message().unwrap() {
            Message::DirectoryDeleteResponse { status, .. } => assert!(status),
            other => panic!("expected DIRECTORY_DELETE_RESPONSE, got {other:?}"),
        }
    }

    // P6: CONNECTION_REFUSED hints are queued in order and drained on reconnect.
    #[test]
    fn connection_refused_queues_candidates_in_order() {
        let (local, _remote) = socket_pair();
        let session = Arc::new(PeerSession::new(local));
        let mut candidates = VecDeque::new();

        let outcome = handle_connection_refused(
            vec![HostPort::new("a", 1), HostPort::new("b", 2)],
            &mut candidates,
        )
        .unwrap();

        assert!(matches!(outcome, Dispatch::Reconnect));
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates.pop_front(), Some(HostPort::new("a", 1)));
        assert_eq!(candidates.pop_front(), Some(HostPort::new("b", 2)));
        let _ = session;
    }

    // P6: given CONNECTION_REFUSED hints [A,B,C] where A and B are
    // unreachable and C accepts, `reconnect` skips the dead candidates,
    // settles on C, and issues exactly one HANDSHAKE_REQUEST there.
    #[test]
    fn reconnect_skips_dead_candidates_and_handshakes_live_one() {
        let dead_a = TcpEndpoint::bind("127.0.0.1:0").unwrap();
        let port_a = dead_a.local_port().unwrap();
        drop(dead_a);
        let dead_b = TcpEndpoint::bind("127.0.0.1:0").unwrap();
        let port_b = dead_b.local_port().unwrap();
        drop(dead_b);

        let live = TcpEndpoint::bind("127.0.0.1:0").unwrap();
        let port_c = live.local_port().unwrap();
        let server = std::thread::spawn(move || {
            let stream = live.accept().unwrap();
            LineReader::new(stream).read_message().unwrap()
        });

        let (local, _unused_remote) = socket_pair();
        let session = Arc::new(PeerSession::new(local));
        let node = node(4, 4);
        let mut candidates = VecDeque::from(vec![
            HostPort::new("127.0.0.1", port_a),
            HostPort::new("127.0.0.1", port_b),
            HostPort::new("127.0.0.1", port_c),
        ]);

        let result = reconnect(&session, &node, &mut candidates).unwrap();

        assert!(result.is_some());
        assert!(candidates.is_empty());
        assert_eq!(
            session.client_host_port(),
            Some(HostPort::new("127.0.0.1", port_c))
        );

        let received = server.join().unwrap();
        assert_eq!(
            received,
            Message::HandshakeRequest {
                host_port: node.advertised_host_port()
            }
        );
    }

    #[test]
    fn connection_refused_with_no_peers_terminates() {
        let mut candidates = VecDeque::new();
        let outcome = handle_connection_refused(vec![], &mut candidates).unwrap();
        assert!(matches!(outcome, Dispatch::Terminate));
    }

    // A CONNECTION_REFUSED arriving after handshake completion is a
    // protocol violation, not a reconnect trigger.
    #[test]
    fn connection_refused_after_handshake_is_a_violation() {
        let (local, remote) = socket_pair();
        let session = Arc::new(PeerSession::new(local));
        session.handshake_completed.store(true, Ordering::Release);
        let node = node(4, 4);
        let mut candidates = VecDeque::new();

        let outcome = dispatch(
            &session,
            &node,
            Message::ConnectionRefused {
                message: "nope".to_string(),
                peers: vec![HostPort::new("a", 1)],
            },
            &mut candidates,
        )
        .unwrap();

        assert!(matches!(outcome, Dispatch::Terminate));
        assert!(candidates.is_empty());
        match read_reply(remote) {
            Message::InvalidProtocol { message } => {
                assert_eq!(message, INVALID_PROTOCOL_UNEXPECTED_REFUSAL);
            }
            other => panic!("expected INVALID_PROTOCOL, got {other:?}"),
        }
    }

    #[test]
    fn handshake_response_clears_candidates_and_completes() {
        let (local, _remote) = socket_pair();
        let session = Arc::new(PeerSession::new(local));
        let mut candidates = VecDeque::from(vec![HostPort::new("a", 1)]);

        let outcome =
            handle_handshake_response(&session, HostPort::new("remote", 9), &mut candidates)
                .unwrap();

        assert!(matches!(outcome, Dispatch::Continue));
        assert!(session.handshake_completed());
        assert!(candidates.is_empty());
        assert_eq!(session.client_host_port(), Some(HostPort::new("remote", 9)));
    }
}
