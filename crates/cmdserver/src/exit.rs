use std::fmt;
use std::io;

use cmdserver_client::ClientError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const SERVER_PROTOCOL: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const UNSUPPORTED: i32 = 69;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => USAGE,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn client_error(context: &str, err: ClientError) -> CliError {
    let code = match &err {
        ClientError::InvalidRequest(_) => USAGE,
        ClientError::MalformedHeader(_) => DATA_INVALID,
        ClientError::ServerProtocol(_) => SERVER_PROTOCOL,
        ClientError::CommandExecution { .. } => FAILURE,
        ClientError::UnsupportedEnvironment(_) => UNSUPPORTED,
        ClientError::Timeout(_) => TIMEOUT,
    };
    CliError::new(code, format!("{context}: {}", err.to_string().trim_end()))
}
