use std::io::{BufRead, BufReader, Read};

use crate::error::{ProtoError, Result};
use crate::message::{decode_line, Message};

/// Reads complete wire messages, one JSON object per line, from any
/// buffered `Read` stream.
pub struct LineReader<T> {
    inner: BufReader<T>,
    line: String,
}

impl<T: Read> LineReader<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner: BufReader::new(inner),
            line: String::new(),
        }
    }

    /// Read and decode the next line (blocking).
    ///
    /// Returns `Err(ProtoError::ConnectionClosed)` at EOF. A line that fails
    /// to decode (bad JSON, unknown command, missing field) is reported as
    /// [`ProtoError::Malformed`] without consuming more input — the caller
    /// replies `INVALID_PROTOCOL` and tears the session down.
    pub fn read_message(&mut self) -> Result<Message> {
        self.line.clear();
        let read = self.inner.read_line(&mut self.line)?;
        if read == 0 {
            return Err(ProtoError::ConnectionClosed);
        }
        decode_line(&self.line)
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        self.inner.get_ref()
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}
