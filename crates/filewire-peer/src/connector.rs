use std::sync::Arc;

use filewire_transport::TcpEndpoint;

use crate::error::Result;
use crate::node::LocalNode;
use crate::session;

/// Connect to a listening peer and run the session loop on the calling
/// thread — the initiator side of the handshake (§6.2: either peer may
/// initiate; whichever side connects sends HANDSHAKE_REQUEST first).
///
/// Blocks for the lifetime of the session; callers that want to keep
/// connecting to other peers spawn this on its own thread, the same way
/// `PeerListener::accept_and_spawn` does for inbound connections.
pub fn connect(node: Arc<LocalNode>, host: &str, port: u16) -> Result<()> {
    let stream = TcpEndpoint::connect(host, port)?;
    session::run_outbound(node, stream)
}

/// Connect and run the session on a dedicated thread, returning its join
/// handle immediately.
pub fn connect_and_spawn(
    node: Arc<LocalNode>,
    host: impl Into<String>,
    port: u16,
) -> std::thread::JoinHandle<Result<()>> {
    let host = host.into();
    std::thread::spawn(move || connect(node, &host, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use filewire_proto::HostPort;
    use filewire_store::InMemoryFileStore;
    use std::time::Duration;

    fn node() -> Arc<LocalNode> {
        LocalNode::new(
            Arc::new(InMemoryFileStore::new()),
            4096,
            4,
            HostPort::new("127.0.0.1", 0),
        )
    }

    #[test]
    fn connect_refused_propagates_transport_error() {
        let endpoint = TcpEndpoint::bind("127.0.0.1:0").unwrap();
        let port = endpoint.local_port().unwrap();
        drop(endpoint);

        let err = connect(node(), "127.0.0.1", port).unwrap_err();
        assert!(matches!(err, crate::error::PeerError::Transport(_)));
    }

    #[test]
    fn connect_and_spawn_joins_after_shutdown() {
        let endpoint = TcpEndpoint::bind("127.0.0.1:0").unwrap();
        let port = endpoint.local_port().unwrap();

        let server_node = node();
        let server = std::thread::spawn(move || {
            let stream = endpoint.accept().unwrap();
            let shutdown_handle = stream.try_clone().unwrap();
            let server_handle = std::thread::spawn(move || {
                let _ = crate::session::run_inbound(server_node, stream);
            });
            std::thread::sleep(Duration::from_millis(50));
            shutdown_handle.shutdown().unwrap();
            server_handle.join().unwrap();
        });

        let handle = connect_and_spawn(node(), "127.0.0.1", port);
        server.join().unwrap();
        let _ = handle.join().unwrap();
    }
}
