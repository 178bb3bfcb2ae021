//! Line-delimited JSON wire protocol for the filewire peer overlay.
//!
//! Every message is a single JSON object terminated by `\n`, tagged by its
//! `"command"` field. This is the core value-add layer of filewire: callers
//! read and write [`Message`] values and never touch raw bytes.

pub mod error;
pub mod message;
pub mod reader;
pub mod writer;

pub use error::{ProtoError, Result};
pub use message::{decode_line, FileDescriptor, HostPort, Message};
pub use reader::LineReader;
pub use writer::LineWriter;
