//! TCP transport abstraction for the filewire peer overlay.
//!
//! This is the lowest layer of filewire. Everything else builds on top of
//! the [`PeerStream`] type provided here.

pub mod error;
pub mod stream;
pub mod tcp;

pub use error::{Result, TransportError};
pub use stream::PeerStream;
pub use tcp::TcpEndpoint;
