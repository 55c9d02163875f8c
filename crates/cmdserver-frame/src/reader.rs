use std::io::{self, ErrorKind, Read};

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::channel::Channel;
use crate::codec::{
    decode_header, decode_result_code, FrameConfig, Message, MessageHeader, HEADER_SIZE,
};
use crate::error::{FrameError, Result};

/// Reads response frames from the server's output pipe.
///
/// Unlike a buffering decoder, this reader never consumes bytes past the
/// frame it is asked for: payloads can be streamed into a sink or skipped
/// without the reader holding on to them.
pub struct MessageReader<T> {
    inner: T,
    config: FrameConfig,
}

impl<T: Read> MessageReader<T> {
    /// Create a new message reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new message reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Read and decode the next 5-byte header (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached on a
    /// frame boundary and `Err(FrameError::ShortHeader)` when it is reached
    /// partway through a header.
    pub fn read_header(&mut self) -> Result<MessageHeader> {
        let mut header = [0u8; HEADER_SIZE];
        let read = read_full(&mut self.inner, &mut header)?;
        if read == 0 {
            return Err(FrameError::ConnectionClosed);
        }
        decode_header(&header[..read])
    }

    /// Append the `length`-byte payload that follows a header to `dst`.
    pub fn read_payload_into(&mut self, length: u32, dst: &mut BytesMut) -> Result<()> {
        self.check_payload_size(length)?;
        read_chunked(
            &mut self.inner,
            u64::from(length),
            self.config.read_chunk_size,
            dst,
        )
    }

    /// Read the `length`-byte payload that follows a header.
    pub fn read_payload(&mut self, length: u32) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        self.read_payload_into(length, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Consume and drop the `length`-byte payload that follows a header.
    pub fn skip_payload(&mut self, length: u32) -> Result<()> {
        self.check_payload_size(length)?;
        let expected = u64::from(length);
        let read = io::copy(&mut (&mut self.inner).take(expected), &mut io::sink())?;
        if read != expected {
            return Err(FrameError::ShortRead { expected, read });
        }
        trace!(bytes = read, "skipped payload");
        Ok(())
    }

    /// Read one complete message, buffering its payload.
    pub fn read_message(&mut self) -> Result<Message> {
        let header = self.read_header()?;
        match header.channel {
            Channel::Input | Channel::Line => Ok(Message::Prompt {
                channel: header.channel,
                size: header.length,
            }),
            Channel::Result => {
                let payload = self.read_payload(header.length)?;
                Ok(Message::Result(decode_result_code(&payload)?))
            }
            channel => Ok(Message::Data {
                channel,
                payload: self.read_payload(header.length)?,
            }),
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

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current message reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    fn check_payload_size(&self, length: u32) -> Result<()> {
        if u64::from(length) > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: u64::from(length),
                max: self.config.max_payload_size,
            });
        }
        Ok(())
    }
}

/// Read exactly `length` bytes from `src` into `dst`, never asking the
/// stream for more than `chunk_size` bytes in a single read.
///
/// The length is a full unsigned quantity; the chunk size bounds each
/// individual read and buffer growth step, so arbitrarily large declared
/// lengths are drained in pieces whose sizes sum to `length`.
pub fn read_chunked<R: Read>(
    src: &mut R,
    length: u64,
    chunk_size: usize,
    dst: &mut BytesMut,
) -> Result<()> {
    let chunk_size = chunk_size.max(1) as u64;
    let mut remaining = length;

    while remaining > 0 {
        let step = remaining.min(chunk_size) as usize;
        let start = dst.len();
        dst.resize(start + step, 0);
        let read = read_full(src, &mut dst[start..])?;
        dst.truncate(start + read);
        remaining -= read as u64;
        if read < step {
            return Err(FrameError::ShortRead {
                expected: length,
                read: length - remaining,
            });
        }
    }
    Ok(())
}

/// Fill `buf` from `src`, stopping early only at EOF. Returns bytes read.
fn read_full<R: Read>(src: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0usize;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
    Ok(filled)
}
