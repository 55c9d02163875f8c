//! In-process scripted command server for unit tests.

use std::io::{ErrorKind, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use cmdserver_frame::{decode_request, encode_message, encode_result, Channel, MessageHeader};

use crate::error::{ClientError, Result};
use crate::launcher::{Launched, Launcher, Terminate};

pub(crate) const BANNER: &[u8] = b"capabilities: getencoding runcommand\nencoding: UTF-8\npid: 1";

/// One step of a scripted response.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Data(Channel, Vec<u8>),
    Prompt(Channel, u32),
    /// Read one length-prefixed input block from the client.
    ReadInput,
    Result(i32),
    Raw(Vec<u8>),
    Pause(Duration),
    /// Record a violation if request bytes are already waiting.
    AssertQuiet,
    /// Stop responding and close the connection.
    Hangup,
}

impl Reply {
    pub(crate) fn output(text: &str) -> Self {
        Reply::Data(Channel::Output, text.as_bytes().to_vec())
    }

    pub(crate) fn error(text: &str) -> Self {
        Reply::Data(Channel::Error, text.as_bytes().to_vec())
    }
}

type Handler = dyn Fn(&[String]) -> Vec<Reply> + Send + Sync;

#[derive(Clone)]
pub(crate) struct ScriptedLauncher {
    handler: Arc<Handler>,
    banner: Vec<u8>,
    silent: bool,
    launches: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Vec<String>>>>,
    inputs: Arc<Mutex<Vec<Vec<u8>>>>,
    violations: Arc<AtomicUsize>,
}

impl ScriptedLauncher {
    pub(crate) fn new(handler: impl Fn(&[String]) -> Vec<Reply> + Send + Sync + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
            banner: BANNER.to_vec(),
            silent: false,
            launches: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
            inputs: Arc::new(Mutex::new(Vec::new())),
            violations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn with_banner(mut self, banner: &[u8]) -> Self {
        self.banner = banner.to_vec();
        self
    }

    /// Never send the handshake.
    pub(crate) fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub(crate) fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<Vec<String>> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn inputs(&self) -> Vec<Vec<u8>> {
        self.inputs.lock().unwrap().clone()
    }

    pub(crate) fn violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }

    fn serve(self, mut stream: UnixStream) {
        if !self.silent {
            let mut hello = BytesMut::new();
            encode_message(Channel::Output, &self.banner, &mut hello).unwrap();
            if stream.write_all(&hello).is_err() {
                return;
            }
        }

        let mut pending = BytesMut::new();
        loop {
            let argv = loop {
                match decode_request(&mut pending) {
                    Ok(Some(argv)) => break argv,
                    Ok(None) => {
                        if !fill(&mut stream, &mut pending) {
                            return;
                        }
                    }
                    Err(_) => return,
                }
            };
            self.requests.lock().unwrap().push(argv.clone());

            for reply in (self.handler)(&argv) {
                let mut out = BytesMut::new();
                match reply {
                    Reply::Data(channel, payload) => {
                        encode_message(channel, &payload, &mut out).unwrap()
                    }
                    Reply::Prompt(channel, size) => {
                        MessageHeader::new(channel, size).encode(&mut out)
                    }
                    Reply::Result(code) => encode_result(code, &mut out),
                    Reply::Raw(bytes) => out.extend_from_slice(&bytes),
                    Reply::Pause(duration) => thread::sleep(duration),
                    Reply::ReadInput => match read_input_block(&mut stream, &mut pending) {
                        Some(block) => self.inputs.lock().unwrap().push(block),
                        None => return,
                    },
                    Reply::AssertQuiet => {
                        if peek_pending(&mut stream, &mut pending) {
                            self.violations.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                    Reply::Hangup => {
                        let _ = stream.shutdown(Shutdown::Both);
                        return;
                    }
                }
                if !out.is_empty() && stream.write_all(&out).is_err() {
                    return;
                }
            }
        }
    }
}

fn fill(stream: &mut UnixStream, pending: &mut BytesMut) -> bool {
    let mut chunk = [0u8; 1024];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => return false,
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                return true;
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(_) => return false,
        }
    }
}

fn read_input_block(stream: &mut UnixStream, pending: &mut BytesMut) -> Option<Vec<u8>> {
    while pending.len() < 4 {
        if !fill(stream, pending) {
            return None;
        }
    }
    let length = u32::from_be_bytes([pending[0], pending[1], pending[2], pending[3]]) as usize;
    while pending.len() < 4 + length {
        if !fill(stream, pending) {
            return None;
        }
    }
    pending.advance(4);
    Some(pending.split_to(length).to_vec())
}

fn peek_pending(stream: &mut UnixStream, pending: &mut BytesMut) -> bool {
    if !pending.is_empty() {
        return true;
    }
    if stream.set_nonblocking(true).is_err() {
        return false;
    }
    let mut chunk = [0u8; 1024];
    let got = match stream.read(&mut chunk) {
        Ok(n) if n > 0 => {
            pending.extend_from_slice(&chunk[..n]);
            true
        }
        _ => false,
    };
    let _ = stream.set_nonblocking(false);
    got
}

struct StreamTerminator(UnixStream);

impl Terminate for StreamTerminator {
    fn terminate(&self) {
        let _ = self.0.shutdown(Shutdown::Both);
    }
}

impl Launcher for ScriptedLauncher {
    fn launch(&self) -> Result<Launched> {
        let io = |err: std::io::Error| ClientError::ServerProtocol(err.to_string());
        let (client, server) = UnixStream::pair().map_err(io)?;
        let reader = client.try_clone().map_err(io)?;
        let terminator = client.try_clone().map_err(io)?;

        self.launches.fetch_add(1, Ordering::SeqCst);
        let script = self.clone();
        thread::spawn(move || script.serve(server));

        Ok(Launched::from_streams(
            reader,
            client,
            Arc::new(StreamTerminator(terminator)),
        ))
    }
}
