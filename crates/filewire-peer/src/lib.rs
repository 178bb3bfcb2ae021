//! Peer session state machine and file-transfer dispatcher for the filewire
//! overlay.
//!
//! A [`LocalNode`] owns the shared state (the file store, admission policy,
//! this node's own advertised address) and the registry of active
//! [`PeerSession`]s. [`PeerListener`] accepts inbound connections and
//! [`connector::connect`] establishes outbound ones; both hand the resulting
//! stream to `session::run_inbound`/`run_outbound`, which drive the
//! handshake and then the request/response dispatch loop for that peer until
//! the connection closes.

pub mod connector;
pub mod error;
pub mod listener;
pub mod node;
pub mod session;

pub use connector::{connect, connect_and_spawn};
pub use error::{PeerError, Result};
pub use listener::PeerListener;
pub use node::{FsEvent, LocalNode};
pub use session::{run_inbound, run_outbound, PeerSession};
