use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::channel::Channel;
use crate::error::{FrameError, Result};

/// Response header: channel tag (1) + length (4) = 5 bytes.
pub const HEADER_SIZE: usize = 5;

/// Size of a result frame payload.
pub const RESULT_SIZE: usize = 4;

/// Marker that opens every request frame.
pub const RUNCOMMAND: &[u8] = b"runcommand\n";

/// Separator between request arguments.
pub const ARG_SEPARATOR: u8 = 0;

/// Default maximum payload size: the full range of the length field.
pub const DEFAULT_MAX_PAYLOAD: u64 = u32::MAX as u64;

/// Default size of a single read when draining a payload: 64 KiB.
pub const DEFAULT_READ_CHUNK: usize = 64 * 1024;

/// A decoded response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// The channel this frame belongs to.
    pub channel: Channel,
    /// Payload length, or the requested size for interactive channels.
    pub length: u32,
}

impl MessageHeader {
    /// Create a new header.
    pub fn new(channel: Channel, length: u32) -> Self {
        Self { channel, length }
    }

    /// Append the wire form of this header to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u8(self.channel.tag());
        dst.put_u32(self.length);
    }

    /// Returns true if a payload of `length` bytes follows this header.
    pub fn has_payload(&self) -> bool {
        !self.channel.is_interactive()
    }
}

/// One decoded response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Payload delivered on a data channel (output, error, debug).
    Data { channel: Channel, payload: Bytes },
    /// The server asks the client for up to `size` bytes (input, line).
    Prompt { channel: Channel, size: u32 },
    /// The command finished with this result code.
    Result(i32),
}

impl Message {
    /// The channel this message arrived on.
    pub fn channel(&self) -> Channel {
        match self {
            Message::Data { channel, .. } | Message::Prompt { channel, .. } => *channel,
            Message::Result(_) => Channel::Result,
        }
    }
}

/// Encode a `runcommand` request.
///
/// Wire format:
/// ```text
/// ┌───────────────┬────────────┬──────────────────────────────┐
/// │ "runcommand\n"│ Length     │ Arguments                    │
/// │ (11B)         │ (4B BE)    │ NUL-joined, no trailing NUL  │
/// └───────────────┴────────────┴──────────────────────────────┘
/// ```
pub fn encode_request<S: AsRef<str>>(argv: &[S], dst: &mut BytesMut) -> Result<()> {
    if argv.is_empty() {
        return Err(FrameError::EmptyRequest);
    }

    let mut blob_len = argv.len() - 1;
    for arg in argv {
        let arg = arg.as_ref();
        if arg.as_bytes().contains(&ARG_SEPARATOR) {
            return Err(FrameError::InvalidRequest(format!(
                "argument contains a NUL byte: {arg:?}"
            )));
        }
        blob_len += arg.len();
    }

    let wire_len = u32::try_from(blob_len).map_err(|_| {
        FrameError::InvalidRequest(format!("argument blob too large ({blob_len} bytes)"))
    })?;

    dst.reserve(RUNCOMMAND.len() + 4 + blob_len);
    dst.put_slice(RUNCOMMAND);
    dst.put_u32(wire_len);
    for (index, arg) in argv.iter().enumerate() {
        if index > 0 {
            dst.put_u8(ARG_SEPARATOR);
        }
        dst.put_slice(arg.as_ref().as_bytes());
    }
    Ok(())
}

/// Decode a `runcommand` request, the way the server reads it.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete request yet.
/// On success, consumes the request bytes from the buffer.
pub fn decode_request(src: &mut BytesMut) -> Result<Option<Vec<String>>> {
    let prefix = RUNCOMMAND.len() + 4;
    if src.len() < RUNCOMMAND.len() {
        if !RUNCOMMAND.starts_with(&src[..]) {
            return Err(FrameError::InvalidRequest(
                "missing runcommand marker".to_string(),
            ));
        }
        return Ok(None);
    }
    if &src[..RUNCOMMAND.len()] != RUNCOMMAND {
        return Err(FrameError::InvalidRequest(
            "missing runcommand marker".to_string(),
        ));
    }
    if src.len() < prefix {
        return Ok(None);
    }

    let blob_len = u32::from_be_bytes([
        src[RUNCOMMAND.len()],
        src[RUNCOMMAND.len() + 1],
        src[RUNCOMMAND.len() + 2],
        src[RUNCOMMAND.len() + 3],
    ]) as usize;
    if src.len() < prefix + blob_len {
        return Ok(None);
    }

    src.advance(prefix);
    let blob = src.split_to(blob_len);
    let text = std::str::from_utf8(&blob)
        .map_err(|err| FrameError::InvalidRequest(format!("arguments are not UTF-8: {err}")))?;
    if text.is_empty() {
        return Err(FrameError::EmptyRequest);
    }
    Ok(Some(
        text.split(char::from(ARG_SEPARATOR))
            .map(str::to_string)
            .collect(),
    ))
}

/// Decode a 5-byte response header.
pub fn decode_header(src: &[u8]) -> Result<MessageHeader> {
    if src.len() < HEADER_SIZE {
        return Err(FrameError::ShortHeader { read: src.len() });
    }
    let channel = Channel::from_tag(src[0])?;
    let length = u32::from_be_bytes([src[1], src[2], src[3], src[4]]);
    Ok(MessageHeader { channel, length })
}

/// Decode a result frame payload into the server's signed exit status.
pub fn decode_result_code(src: &[u8]) -> Result<i32> {
    let bytes: [u8; RESULT_SIZE] = src
        .try_into()
        .map_err(|_| FrameError::InvalidResultPayload(src.len()))?;
    Ok(i32::from_be_bytes(bytes))
}

/// Encode a data frame as the server writes it.
pub fn encode_message(channel: Channel, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let length = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len() as u64,
        max: DEFAULT_MAX_PAYLOAD,
    })?;
    MessageHeader::new(channel, length).encode(dst);
    dst.put_slice(payload);
    Ok(())
}

/// Encode a result frame carrying `code`.
pub fn encode_result(code: i32, dst: &mut BytesMut) {
    MessageHeader::new(Channel::Result, RESULT_SIZE as u32).encode(dst);
    dst.put_i32(code);
}

/// Encode a client reply to an input or line prompt.
pub fn encode_input_block(data: &[u8], dst: &mut BytesMut) -> Result<()> {
    let length = u32::try_from(data.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: data.len() as u64,
        max: DEFAULT_MAX_PAYLOAD,
    })?;
    dst.reserve(4 + data.len());
    dst.put_u32(length);
    dst.put_slice(data);
    Ok(())
}

/// Configuration for message reading.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: `u32::MAX`.
    pub max_payload_size: u64,
    /// Largest single read issued while draining a payload. Default: 64 KiB.
    pub read_chunk_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_chunk_size: DEFAULT_READ_CHUNK,
        }
    }
}
