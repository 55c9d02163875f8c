use std::time::Duration;

use cmdserver_frame::FrameError;

/// Message used when a command fails without any diagnostic text.
pub const UNDECODABLE_OUTPUT: &str =
    "Unable to decode output from executing command, spinning down persistent client";

/// Errors that can occur while talking to a command server.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The argument list was empty or could not be encoded.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The server sent a header that could not be decoded.
    #[error("received malformed header from command server: {0}")]
    MalformedHeader(String),

    /// Reading from or writing to the server failed.
    #[error("error communicating with command server: {0}")]
    ServerProtocol(String),

    /// The command reported a nonzero result and produced no output.
    #[error("{message}")]
    CommandExecution { code: i32, message: String },

    /// Persistent mode cannot be used for this repository or tool.
    #[error("unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    /// The exchange or startup did not finish before its deadline.
    #[error("command server timed out after {0:?}")]
    Timeout(Duration),
}

/// Coarse category of a [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    MalformedHeader,
    ServerProtocol,
    CommandExecution,
    UnsupportedEnvironment,
    Timeout,
}

impl ClientError {
    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ClientError::MalformedHeader(_) => ErrorKind::MalformedHeader,
            ClientError::ServerProtocol(_) => ErrorKind::ServerProtocol,
            ClientError::CommandExecution { .. } => ErrorKind::CommandExecution,
            ClientError::UnsupportedEnvironment(_) => ErrorKind::UnsupportedEnvironment,
            ClientError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    /// Returns true if the server process must be torn down after this error.
    pub fn invalidates_session(&self) -> bool {
        !matches!(
            self,
            ClientError::InvalidRequest(_) | ClientError::UnsupportedEnvironment(_)
        )
    }
}

impl From<FrameError> for ClientError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::EmptyRequest | FrameError::InvalidRequest(_) => {
                ClientError::InvalidRequest(err.to_string())
            }
            err if err.is_desync() => ClientError::MalformedHeader(err.to_string()),
            err => ClientError::ServerProtocol(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
