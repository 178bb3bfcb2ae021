use std::io::{ErrorKind, Write};

use crate::error::{ProtoError, Result};
use crate::message::Message;

/// Writes complete wire messages, one JSON object per line, to any `Write`
/// stream.
pub struct LineWriter<T> {
    inner: T,
}

impl<T: Write> LineWriter<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Encode and send a message, followed by the line terminator, then
    /// flush. A partial write never leaves the stream mid-line: the retry
    /// loop only stops once every byte of `line + "\n"` has been accepted.
    pub fn send(&mut self, message: &Message) -> Result<()> {
        let mut line = message.encode_line()?;
        line.push('\n');
        self.write_all(line.as_bytes())?;
        self.flush()
    }

    fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            match self.inner.write(buf) {
                Ok(0) => return Err(ProtoError::ConnectionClosed),
                Ok(n) => buf = &buf[n..],
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(ProtoError::Io(err)),
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(ProtoError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}
