use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_input_block, encode_request};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

/// Writes requests and input replies to the server's input pipe.
///
/// Each logical frame is encoded into one buffer and written out before
/// the stream is flushed, so a frame is never split across other writes.
pub struct RequestWriter<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: Write> RequestWriter<T> {
    /// Create a new request writer.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Encode and send a `runcommand` request (blocking).
    pub fn send_request<S: AsRef<str>>(&mut self, argv: &[S]) -> Result<()> {
        self.buf.clear();
        encode_request(argv, &mut self.buf)?;
        self.write_buffered()
    }

    /// Send a length-prefixed reply to an input or line prompt.
    pub fn send_input(&mut self, data: &[u8]) -> Result<()> {
        self.buf.clear();
        encode_input_block(data, &mut self.buf)?;
        self.write_buffered()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
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

    fn write_buffered(&mut self) -> Result<()> {
        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }
}
