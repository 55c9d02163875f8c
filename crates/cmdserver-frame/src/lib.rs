//! Channel-tagged message framing for the command server pipe protocol.
//!
//! Requests are written as `runcommand\n` followed by a 4-byte big-endian
//! length and the NUL-joined argument list. Responses are a stream of
//! frames, each with:
//! - A 1-byte ASCII channel tag (`I`, `L`, `o`, `e`, `r`, `d`)
//! - A 4-byte big-endian unsigned length
//! - For data channels, that many payload bytes
//!
//! Everything here is blocking and works over any `Read`/`Write` pair.

pub mod channel;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use channel::Channel;
pub use codec::{
    decode_header, decode_request, decode_result_code, encode_input_block, encode_message,
    encode_request, encode_result, FrameConfig, Message, MessageHeader, DEFAULT_MAX_PAYLOAD,
    DEFAULT_READ_CHUNK, HEADER_SIZE, RESULT_SIZE, RUNCOMMAND,
};
pub use error::{FrameError, Result};
pub use reader::{read_chunked, MessageReader};
pub use writer::RequestWriter;
