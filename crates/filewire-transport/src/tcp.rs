use std::net::{TcpListener, TcpStream, ToSocketAddrs};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::PeerStream;

/// TCP transport.
///
/// Provides bind/accept/connect over plain TCP — the transport the protocol
/// specifies (symmetric, either peer may initiate, persistent connection per
/// peer).
pub struct TcpEndpoint {
    listener: TcpListener,
    addr: String,
}

impl TcpEndpoint {
    /// Bind and listen on a TCP address (e.g. `"0.0.0.0:4242"`).
    pub fn bind(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<Self> {
        let display = addr.to_string();
        let listener = TcpListener::bind(addr).map_err(|e| TransportError::Bind {
            addr: display.clone(),
            source: e,
        })?;

        info!(addr = %display, "listening on tcp");

        Ok(Self {
            listener,
            addr: display,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<PeerStream> {
        let (stream, addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(%addr, "accepted connection");
        Ok(PeerStream::from_tcp(stream))
    }

    /// Connect to a listening TCP peer (blocking).
    pub fn connect(host: &str, port: u16) -> Result<PeerStream> {
        let addr = format!("{host}:{port}");
        let stream = TcpStream::connect((host, port)).map_err(|e| TransportError::Connect {
            addr: addr.clone(),
            source: e,
        })?;
        debug!(%addr, "connected to peer");
        Ok(PeerStream::from_tcp(stream))
    }

    /// The address this endpoint is bound to, as configured.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The port actually bound (useful when binding to port 0 in tests).
    pub fn local_port(&self) -> Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::thread;

    #[test]
    fn test_bind_accept_connect() {
        let endpoint = TcpEndpoint::bind("127.0.0.1:0").unwrap();
        let port = endpoint.local_port().unwrap();

        let handle = thread::spawn(move || {
            let mut client = TcpEndpoint::connect("127.0.0.1", port).unwrap();
            client.write_all(b"hello").unwrap();
        });

        let mut server = endpoint.accept().unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        handle.join().unwrap();
    }

    #[test]
    fn test_connect_refused() {
        // Bind then immediately drop to free the port, then try connecting.
        let endpoint = TcpEndpoint::bind("127.0.0.1:0").unwrap();
        let port = endpoint.local_port().unwrap();
        drop(endpoint);

        let result = TcpEndpoint::connect("127.0.0.1", port);
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[test]
    fn test_accepts_multiple_sequential_connections() {
        let endpoint = TcpEndpoint::bind("127.0.0.1:0").unwrap();
        let port = endpoint.local_port().unwrap();

        let server = thread::spawn(move || {
            let _first = endpoint.accept().unwrap();
            let _second = endpoint.accept().unwrap();
        });

        let _c1 = TcpEndpoint::connect("127.0.0.1", port).unwrap();
        let _c2 = TcpEndpoint::connect("127.0.0.1", port).unwrap();
        server.join().unwrap();
    }
}
