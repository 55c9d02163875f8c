//! One request/response exchange over an established server session.

use std::borrow::Cow;
use std::fmt;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use cmdserver_frame::{
    decode_result_code, Channel, FrameError, MessageReader, RequestWriter, RESULT_SIZE,
};
use tracing::{debug, trace};

use crate::error::{ClientError, Result, UNDECODABLE_OUTPUT};

/// Answers an input or line prompt. Receives the number of bytes the
/// server asked for; returning `None` sends nothing back.
pub type Responder<'a> = Box<dyn FnMut(u32) -> Option<Vec<u8>> + 'a>;

/// Per-exchange options: interactive responders, debug capture, deadline.
#[derive(Default)]
pub struct ExchangeOptions<'a> {
    input: Option<Responder<'a>>,
    line: Option<Responder<'a>>,
    capture_debug: bool,
    deadline: Option<Instant>,
}

impl<'a> ExchangeOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `I` (raw input) prompts with `responder`.
    pub fn on_input(mut self, responder: impl FnMut(u32) -> Option<Vec<u8>> + 'a) -> Self {
        self.input = Some(Box::new(responder));
        self
    }

    /// Answer `L` (line input) prompts with `responder`.
    pub fn on_line(mut self, responder: impl FnMut(u32) -> Option<Vec<u8>> + 'a) -> Self {
        self.line = Some(Box::new(responder));
        self
    }

    /// Keep debug channel payloads instead of discarding them.
    pub fn capture_debug(mut self, capture: bool) -> Self {
        self.capture_debug = capture;
        self
    }

    /// Fail with [`ClientError::Timeout`] if the exchange is still running at `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Shorthand for a deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn responder(&mut self, channel: Channel) -> Option<&mut Responder<'a>> {
        match channel {
            Channel::Input => self.input.as_mut(),
            Channel::Line => self.line.as_mut(),
            _ => None,
        }
    }
}

impl fmt::Debug for ExchangeOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeOptions")
            .field("input", &self.input.is_some())
            .field("line", &self.line.is_some())
            .field("capture_debug", &self.capture_debug)
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// What one exchange produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExchangeResult {
    /// Result code reported by the server.
    pub code: i32,
    /// Everything written to the output channel.
    pub output: Bytes,
    /// Everything written to the error channel.
    pub error: Bytes,
    /// Debug channel payloads, when captured.
    pub debug: Bytes,
}

impl ExchangeResult {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    /// Output decoded as UTF-8, replacing invalid sequences.
    pub fn output_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.output)
    }

    /// Error output decoded as UTF-8, replacing invalid sequences.
    pub fn error_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.error)
    }
}

/// Reject argument lists that must never reach the wire.
pub fn validate_argv<S: AsRef<str>>(argv: &[S]) -> Result<()> {
    let Some(command) = argv.first() else {
        return Err(ClientError::InvalidRequest(
            "command must not be empty".to_string(),
        ));
    };
    if command.as_ref().trim().is_empty() {
        return Err(ClientError::InvalidRequest(
            "command name must not be blank".to_string(),
        ));
    }
    if let Some(arg) = argv.iter().find(|arg| arg.as_ref().contains('\0')) {
        return Err(ClientError::InvalidRequest(format!(
            "argument contains a NUL byte: {:?}",
            arg.as_ref()
        )));
    }
    Ok(())
}

/// Write one request and run the read loop until its result frame.
///
/// Returns the raw result; the caller applies [`settle`].
pub(crate) fn exchange<R, W, S>(
    reader: &mut MessageReader<R>,
    writer: &mut RequestWriter<W>,
    argv: &[S],
    options: &mut ExchangeOptions<'_>,
) -> Result<ExchangeResult>
where
    R: Read,
    W: Write,
    S: AsRef<str>,
{
    writer.send_request(argv).map_err(write_error)?;

    let mut output = BytesMut::new();
    let mut error = BytesMut::new();
    let mut debug_out = BytesMut::new();

    let code = loop {
        let header = reader.read_header()?;
        trace!(channel = %header.channel, length = header.length, "frame");

        match header.channel {
            Channel::Result => {
                if header.length as usize != RESULT_SIZE {
                    return Err(FrameError::InvalidResultPayload(header.length as usize).into());
                }
                let payload = reader.read_payload(header.length)?;
                break decode_result_code(&payload)?;
            }
            Channel::Input | Channel::Line => match options.responder(header.channel) {
                Some(responder) => {
                    if let Some(data) = responder(header.length) {
                        writer.send_input(&data).map_err(write_error)?;
                    }
                }
                None => debug!(channel = %header.channel, size = header.length, "prompt ignored"),
            },
            Channel::Output => reader.read_payload_into(header.length, &mut output)?,
            Channel::Error => reader.read_payload_into(header.length, &mut error)?,
            Channel::Debug if options.capture_debug => {
                reader.read_payload_into(header.length, &mut debug_out)?
            }
            Channel::Debug => reader.skip_payload(header.length)?,
        }
    };

    Ok(ExchangeResult {
        code,
        output: output.freeze(),
        error: error.freeze(),
        debug: debug_out.freeze(),
    })
}

/// Apply the outcome policy: a zero code, or any output at all, is a
/// normal completion. A nonzero code with no output is a failure.
///
/// Nonzero codes with output are handed back unchanged; the caller decides
/// whether they are fatal.
pub fn settle(result: ExchangeResult) -> Result<ExchangeResult> {
    if result.code == 0 || !result.output.is_empty() {
        return Ok(result);
    }
    let message = if result.error.is_empty() {
        UNDECODABLE_OUTPUT.to_string()
    } else {
        result.error_text().into_owned()
    };
    Err(ClientError::CommandExecution {
        code: result.code,
        message,
    })
}

fn write_error(err: FrameError) -> ClientError {
    match err {
        FrameError::EmptyRequest | FrameError::InvalidRequest(_) => err.into(),
        other => ClientError::ServerProtocol(format!("write failed: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BytesMut;
    use cmdserver_frame::{decode_request, encode_message, encode_result, MessageHeader};

    use super::*;
    use crate::error::ErrorKind;

    fn server_says(build: impl FnOnce(&mut BytesMut)) -> MessageReader<Cursor<Vec<u8>>> {
        let mut buf = BytesMut::new();
        build(&mut buf);
        MessageReader::new(Cursor::new(buf.to_vec()))
    }

    fn client() -> RequestWriter<Cursor<Vec<u8>>> {
        RequestWriter::new(Cursor::new(Vec::new()))
    }

    #[test]
    fn output_then_result() {
        let mut reader = server_says(|buf| {
            encode_message(Channel::Output, b"abc123\n", buf).unwrap();
            encode_result(0, buf);
        });
        let mut writer = client();
        let argv = ["log", "--template", "{node}\n"];

        let result =
            exchange(&mut reader, &mut writer, &argv, &mut ExchangeOptions::new()).unwrap();
        assert_eq!(result.code, 0);
        assert_eq!(result.output.as_ref(), b"abc123\n");
        assert!(result.error.is_empty());

        let mut sent = BytesMut::from(writer.into_inner().into_inner().as_slice());
        assert_eq!(decode_request(&mut sent).unwrap().unwrap(), argv);
    }

    #[test]
    fn channels_accumulate_separately() {
        let mut reader = server_says(|buf| {
            encode_message(Channel::Output, b"one ", buf).unwrap();
            encode_message(Channel::Error, b"warning: x\n", buf).unwrap();
            encode_message(Channel::Debug, b"dbg", buf).unwrap();
            encode_message(Channel::Output, b"two\n", buf).unwrap();
            encode_result(1, buf);
        });
        let result = exchange(
            &mut reader,
            &mut client(),
            &["status"],
            &mut ExchangeOptions::new(),
        )
        .unwrap();
        assert_eq!(result.code, 1);
        assert_eq!(result.output_text(), "one two\n");
        assert_eq!(result.error_text(), "warning: x\n");
        assert!(result.debug.is_empty());
    }

    #[test]
    fn debug_captured_on_request() {
        let mut reader = server_says(|buf| {
            encode_message(Channel::Debug, b"resolving manifests\n", buf).unwrap();
            encode_result(0, buf);
        });
        let mut options = ExchangeOptions::new().capture_debug(true);
        let result = exchange(&mut reader, &mut client(), &["update"], &mut options).unwrap();
        assert_eq!(result.debug.as_ref(), b"resolving manifests\n");
    }

    #[test]
    fn prompt_without_responder_is_ignored() {
        let mut reader = server_says(|buf| {
            MessageHeader::new(Channel::Line, 4096).encode(buf);
            encode_result(0, buf);
        });
        let mut writer = client();
        exchange(&mut reader, &mut writer, &["merge"], &mut ExchangeOptions::new()).unwrap();

        let mut sent = BytesMut::from(writer.into_inner().into_inner().as_slice());
        decode_request(&mut sent).unwrap().unwrap();
        assert!(sent.is_empty(), "nothing but the request should be written");
    }

    #[test]
    fn prompt_answered_by_responder() {
        let mut reader = server_says(|buf| {
            MessageHeader::new(Channel::Line, 4096).encode(buf);
            MessageHeader::new(Channel::Input, 10).encode(buf);
            encode_result(0, buf);
        });
        let mut writer = client();
        let mut asked = Vec::new();
        let mut options = ExchangeOptions::new()
            .on_line(|size| {
                asked.push(size);
                Some(b"y\n".to_vec())
            })
            .on_input(|_| None);
        exchange(&mut reader, &mut writer, &["merge"], &mut options).unwrap();
        drop(options);
        assert_eq!(asked, vec![4096]);

        let mut sent = BytesMut::from(writer.into_inner().into_inner().as_slice());
        decode_request(&mut sent).unwrap().unwrap();
        assert_eq!(sent.as_ref(), &[0, 0, 0, 2, b'y', b'\n']);
    }

    #[test]
    fn unknown_tag_is_malformed_header() {
        let mut reader = server_says(|buf| buf.extend_from_slice(&[b'x', 0, 0, 0, 0]));
        let err = exchange(&mut reader, &mut client(), &["id"], &mut ExchangeOptions::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedHeader);
    }

    #[test]
    fn stream_ending_early_is_protocol_error() {
        let mut reader = server_says(|buf| {
            encode_message(Channel::Output, b"partial", buf).unwrap();
        });
        let err = exchange(&mut reader, &mut client(), &["id"], &mut ExchangeOptions::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServerProtocol);
    }

    #[test]
    fn oversized_result_frame_rejected() {
        let mut reader = server_says(|buf| {
            MessageHeader::new(Channel::Result, u32::MAX).encode(buf);
        });
        let err = exchange(&mut reader, &mut client(), &["id"], &mut ExchangeOptions::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServerProtocol);
    }

    #[test]
    fn settle_accepts_zero_code() {
        let result = ExchangeResult::default();
        assert_eq!(settle(result.clone()).unwrap(), result);
    }

    #[test]
    fn settle_returns_nonzero_code_with_output() {
        let result = ExchangeResult {
            code: 1,
            output: Bytes::from_static(b"M file.txt\n"),
            ..ExchangeResult::default()
        };
        let settled = settle(result).unwrap();
        assert_eq!(settled.code, 1);
        assert!(!settled.is_success());
    }

    #[test]
    fn settle_fails_nonzero_code_without_output() {
        let result = ExchangeResult {
            code: 255,
            error: Bytes::from_static(b"abort: not found\n"),
            ..ExchangeResult::default()
        };
        match settle(result).unwrap_err() {
            ClientError::CommandExecution { code, message } => {
                assert_eq!(code, 255);
                assert_eq!(message, "abort: not found\n");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn settle_uses_generic_message_when_silent() {
        let result = ExchangeResult {
            code: 1,
            ..ExchangeResult::default()
        };
        let err = settle(result).unwrap_err();
        assert_eq!(err.to_string(), UNDECODABLE_OUTPUT);
    }

    #[test]
    fn validate_argv_rejects_bad_lists() {
        assert!(validate_argv::<&str>(&[]).is_err());
        assert!(validate_argv(&[" "]).is_err());
        assert!(validate_argv(&["log", "a\0b"]).is_err());
        assert!(validate_argv(&["log", ""]).is_ok());
    }
}
