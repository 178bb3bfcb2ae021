use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use filewire_proto::{FileDescriptor, HostPort};
use filewire_store::FileStore;

use crate::session::PeerSession;

/// A local filesystem change to fan out to every connected, handshaked
/// session. Produced by whatever is watching the share directory — a
/// `notify`-backed watcher in the CLI binary, or a test harness.
#[derive(Debug, Clone, PartialEq)]
pub enum FsEvent {
    FileCreate {
        file_descriptor: FileDescriptor,
        path_name: String,
    },
    FileModify {
        file_descriptor: FileDescriptor,
        path_name: String,
    },
    FileDelete {
        file_descriptor: FileDescriptor,
        path_name: String,
    },
    DirectoryCreate {
        path_name: String,
    },
    DirectoryDelete {
        path_name: String,
    },
}

/// Process-wide state shared by every `PeerSession`: the active session
/// registry, the admission policy, and the collaborators (`FileStore`,
/// `blockSize`, this node's own advertised address) the dispatch tables
/// need.
///
/// Passed to sessions as an explicit `Arc<LocalNode>` rather than reached
/// for as a singleton, so tests can spin up more than one independent node
/// in the same process.
pub struct LocalNode {
    store: Arc<dyn FileStore>,
    block_size: u64,
    max_connections: usize,
    advertised_host_port: HostPort,
    next_session_id: AtomicU64,
    sessions: Mutex<HashMap<u64, Arc<PeerSession>>>,
}

impl LocalNode {
    pub fn new(
        store: Arc<dyn FileStore>,
        block_size: u64,
        max_connections: usize,
        advertised_host_port: HostPort,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            block_size,
            max_connections,
            advertised_host_port,
            next_session_id: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &Arc<dyn FileStore> {
        &self.store
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn advertised_host_port(&self) -> HostPort {
        self.advertised_host_port.clone()
    }

    pub fn has_reached_max_connections(&self) -> bool {
        self.sessions.lock().unwrap().len() >= self.max_connections
    }

    /// Every currently connected, handshake-completed peer's advertised
    /// address, excluding the session identified by `excluding` (P7: a
    /// refusal's hint list never contains the refused peer itself).
    pub fn get_connected_peer_host_port(&self, excluding: u64) -> Vec<HostPort> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| **id != excluding)
            .filter_map(|(_, session)| {
                if session.handshake_completed() {
                    session.client_host_port()
                } else {
                    None
                }
            })
            .collect()
    }

    /// Register a newly accepted or connected session and return its
    /// opaque registry id.
    pub fn register(self: &Arc<Self>, session: Arc<PeerSession>) -> u64 {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        self.sessions.lock().unwrap().insert(id, session);
        id
    }

    pub fn deregister(self: &Arc<Self>, id: u64) {
        self.sessions.lock().unwrap().remove(&id);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Fan `event` out to every connected session. A single session's send
    /// failure is logged and does not affect its siblings — matching §4.4's
    /// "exceptions in one session must not affect others".
    pub fn dispatch_fs_event(&self, event: &FsEvent) {
        let sessions: Vec<Arc<PeerSession>> =
            self.sessions.lock().unwrap().values().cloned().collect();
        for session in sessions {
            if !session.handshake_completed() {
                continue;
            }
            if let Err(err) = session.send_fs_event(event) {
                tracing::warn!(error = %err, "failed to deliver fs event to peer");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filewire_store::InMemoryFileStore;

    fn node() -> Arc<LocalNode> {
        LocalNode::new(
            Arc::new(InMemoryFileStore::new()),
            64 * 1024,
            2,
            HostPort::new("local", 9000),
        )
    }

    #[test]
    fn max_connections_gate() {
        let node = node();
        assert!(!node.has_reached_max_connections());
        assert_eq!(node.session_count(), 0);
    }

    #[test]
    fn advertised_host_port_roundtrips() {
        let node = node();
        assert_eq!(node.advertised_host_port(), HostPort::new("local", 9000));
    }
}
