//! CLI bootstrap for the filewire peer overlay.
//!
//! The binary wires the lower layers together into a runnable node: it opens
//! a [`filewire_store::LocalFileStore`] rooted at a share directory, starts a
//! [`filewire_peer::PeerListener`], dials any peers named on the command
//! line, and wires a `notify`-backed watcher over the share directory into
//! [`filewire_peer::LocalNode::dispatch_fs_event`]. None of that wiring is
//! part of the protocol core — it exists so the workspace runs end to end.

/// Re-export transport types.
pub mod transport {
    pub use filewire_transport::*;
}

/// Re-export wire protocol types.
pub mod proto {
    pub use filewire_proto::*;
}

/// Re-export file store types.
pub mod store {
    pub use filewire_store::*;
}

/// Re-export peer session / local node types.
pub mod peer {
    pub use filewire_peer::*;
}
