/// Errors that can occur during message encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A request must name at least the command.
    #[error("request must not be empty")]
    EmptyRequest,

    /// A request argument cannot be represented on the wire.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The header tag byte does not name a known channel.
    #[error("invalid channel identifier: 0x{0:02x}")]
    UnknownChannel(u8),

    /// Fewer than a full header's worth of bytes were available.
    #[error("malformed header: {read} bytes")]
    ShortHeader { read: usize },

    /// A result frame did not carry exactly four bytes.
    #[error("malformed result payload: {0} bytes (expected 4)")]
    InvalidResultPayload(usize),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: u64, max: u64 },

    /// The stream ended before the declared payload was read.
    #[error("short read: expected {expected} bytes, read {read}")]
    ShortRead { expected: u64, read: u64 },

    /// An I/O error occurred while reading or writing messages.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The pipe was closed before a complete message was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// True when the error means the byte stream can no longer be trusted
    /// to be positioned at a frame boundary.
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            FrameError::UnknownChannel(_) | FrameError::ShortHeader { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
