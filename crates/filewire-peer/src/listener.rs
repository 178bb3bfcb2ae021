use std::sync::Arc;

use filewire_transport::TcpEndpoint;

use crate::error::Result;
use crate::node::LocalNode;
use crate::session;

/// Accepts incoming peer connections and runs each one's session loop.
///
/// Every accepted connection gets its own reader-loop thread
/// (`std::thread::spawn`, matching §5's scheduling model); this type only
/// owns the listening socket and the shared `LocalNode` each spawned
/// session registers against.
pub struct PeerListener {
    endpoint: TcpEndpoint,
    node: Arc<LocalNode>,
}

impl PeerListener {
    /// Bind to a TCP address (e.g. `"0.0.0.0:4242"`).
    pub fn bind(addr: impl std::net::ToSocketAddrs + std::fmt::Display, node: Arc<LocalNode>) -> Result<Self> {
        let endpoint = TcpEndpoint::bind(addr)?;
        Ok(Self { endpoint, node })
    }

    /// The port actually bound (useful when binding to port 0 in tests).
    pub fn local_port(&self) -> Result<u16> {
        self.endpoint.local_port().map_err(Into::into)
    }

    /// Accept the next connection and spawn a thread running its session
    /// loop. Returns the join handle so callers can wait for orderly
    /// shutdown; most servers let sessions outlive the accept loop.
    pub fn accept_and_spawn(&self) -> Result<std::thread::JoinHandle<()>> {
        let stream = self.endpoint.accept()?;
        let node = self.node.clone();
        Ok(std::thread::spawn(move || {
            if let Err(err) = session::run_inbound(node, stream) {
                tracing::warn!(error = %err, "peer session ended with an error");
            }
        }))
    }

    /// Run the accept loop until the socket is closed or `accept` errors.
    pub fn serve_forever(&self) -> Result<()> {
        loop {
            match self.accept_and_spawn() {
                Ok(_handle) => continue,
                Err(err) => return Err(err),
            }
        }
    }
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
    fn accepts_and_handshakes() {
        let listener = PeerListener::bind("127.0.0.1:0", node()).unwrap();
        let port = listener.local_port().unwrap();

        let server = std::thread::spawn(move || {
            listener.accept_and_spawn().unwrap().join().unwrap();
        });

        let client_node = node();
        let stream = TcpEndpoint::connect("127.0.0.1", port).unwrap();
        let shutdown_handle = stream.try_clone().unwrap();
        let client = std::thread::spawn(move || {
            session::run_outbound(client_node, stream).unwrap();
        });

        // Give both sides time to exchange HANDSHAKE_REQUEST/RESPONSE, then
        // close the socket so both reader loops see a clean EOF and return.
        std::thread::sleep(Duration::from_millis(50));
        shutdown_handle.shutdown().unwrap();
        server.join().unwrap();
        client.join().unwrap();
    }
}
