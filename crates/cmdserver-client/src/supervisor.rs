//! Ownership of the single server process behind a client.

use std::io::{Read, Write};
use std::process::Child;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use cmdserver_frame::{MessageReader, RequestWriter};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{ClientError, Result};
use crate::hello::{read_hello, Hello, RUNCOMMAND_CAPABILITY};
use crate::launcher::{Launched, Launcher, Terminate};
use crate::watchdog::Watchdog;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Observable lifecycle of the server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No process; the next exchange starts one.
    NotStarted,
    /// A process is running and has completed its handshake.
    Running,
    /// The last process was torn down after an error; the next exchange
    /// starts a fresh one.
    Faulted,
}

/// A running server whose handshake has been decoded.
pub(crate) struct ProcessHandle {
    pub(crate) reader: MessageReader<Box<dyn Read + Send>>,
    pub(crate) writer: RequestWriter<Box<dyn Write + Send>>,
    child: Option<Arc<Mutex<Child>>>,
    terminator: Arc<dyn Terminate>,
    hello: Hello,
}

impl ProcessHandle {
    pub(crate) fn terminator(&self) -> Arc<dyn Terminate> {
        Arc::clone(&self.terminator)
    }

    pub(crate) fn hello(&self) -> &Hello {
        &self.hello
    }

    /// Close both pipes, then wait for the process to exit, killing it
    /// after `grace` if needed.
    fn shutdown(self, grace: Duration) {
        let ProcessHandle {
            reader,
            writer,
            child,
            ..
        } = self;
        drop(writer);
        drop(reader);
        if let Some(child) = child {
            let mut child = child.lock().unwrap_or_else(PoisonError::into_inner);
            reap(&mut child, grace);
        }
    }
}

fn reap(child: &mut Child, grace: Duration) {
    let pid = child.id();
    let deadline = Instant::now() + grace;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid, %status, "command server exited");
                return;
            }
            Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL_INTERVAL),
            Ok(None) => {
                warn!(pid, ?grace, "command server did not exit, killing it");
                let _ = child.kill();
                let _ = child.wait();
                return;
            }
            Err(err) => {
                debug!(pid, error = %err, "wait failed (already reaped?)");
                return;
            }
        }
    }
}

enum Session {
    NotStarted,
    Running(ProcessHandle),
    Faulted,
}

/// Owns at most one server process and moves it through
/// `NotStarted -> Running -> (NotStarted | Faulted)`.
pub struct Supervisor {
    launcher: Box<dyn Launcher>,
    config: ServerConfig,
    session: Session,
}

impl Supervisor {
    pub fn new(launcher: Box<dyn Launcher>, config: ServerConfig) -> Self {
        Self {
            launcher,
            config,
            session: Session::NotStarted,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        match self.session {
            Session::NotStarted => SessionState::NotStarted,
            Session::Running(_) => SessionState::Running,
            Session::Faulted => SessionState::Faulted,
        }
    }

    /// Banner of the running server, if any.
    pub fn hello(&self) -> Option<&Hello> {
        match &self.session {
            Session::Running(handle) => Some(handle.hello()),
            _ => None,
        }
    }

    /// Run the launcher's preflight checks.
    pub fn preflight(&self) -> Result<()> {
        self.launcher.preflight()
    }

    /// Start a server and decode its handshake. A no-op when running.
    pub fn start(&mut self) -> Result<()> {
        if matches!(self.session, Session::Running(_)) {
            return Ok(());
        }

        let started = self
            .launcher
            .launch()
            .and_then(|launched| self.handshake(launched));
        match started {
            Ok(handle) => {
                info!(
                    capabilities = ?handle.hello().capabilities,
                    encoding = ?handle.hello().encoding,
                    "command server ready"
                );
                self.session = Session::Running(handle);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "command server failed to start");
                self.session = Session::Faulted;
                Err(err)
            }
        }
    }

    /// Stop the server if one is running. Always leaves `NotStarted`.
    pub fn stop(&mut self) {
        if let Session::Running(handle) = std::mem::replace(&mut self.session, Session::NotStarted)
        {
            info!("stopping command server");
            handle.shutdown(self.config.shutdown_timeout());
        }
    }

    /// Tear the server down after an error. Leaves `Faulted`.
    pub fn fault(&mut self, reason: &ClientError) {
        if let Session::Running(handle) = std::mem::replace(&mut self.session, Session::Faulted) {
            warn!(error = %reason, "tearing down command server");
            handle.shutdown(self.config.shutdown_timeout());
        }
    }

    /// The running process, starting one first if needed.
    pub(crate) fn ensure_running(&mut self) -> Result<&mut ProcessHandle> {
        if !matches!(self.session, Session::Running(_)) {
            self.start()?;
        }
        match &mut self.session {
            Session::Running(handle) => Ok(handle),
            _ => Err(ClientError::ServerProtocol(
                "command server is not running".to_string(),
            )),
        }
    }

    fn handshake(&self, launched: Launched) -> Result<ProcessHandle> {
        let Launched {
            reader,
            writer,
            child,
            terminator,
        } = launched;
        let mut handle = ProcessHandle {
            reader: MessageReader::with_config(reader, self.config.frame_config()),
            writer: RequestWriter::new(writer),
            child,
            terminator,
            hello: Hello::default(),
        };

        let mut watchdog = Watchdog::arm(
            Instant::now() + self.config.startup_timeout(),
            handle.terminator(),
        );
        let hello = read_hello(&mut handle.reader);
        let timed_out = watchdog.disarm();

        let hello = match (hello, timed_out) {
            (_, true) => Err(ClientError::Timeout(watchdog.budget())),
            (Ok(hello), false) if !hello.has_capability(RUNCOMMAND_CAPABILITY) => {
                Err(ClientError::UnsupportedEnvironment(format!(
                    "command server does not offer {RUNCOMMAND_CAPABILITY} (capabilities: {})",
                    hello.capabilities.join(" ")
                )))
            }
            (result, false) => result,
        };

        match hello {
            Ok(hello) => {
                if !hello.encoding_matches(&self.config.encoding) {
                    warn!(
                        expected = %self.config.encoding,
                        actual = ?hello.encoding,
                        "command server encoding differs from configured encoding"
                    );
                }
                handle.hello = hello;
                Ok(handle)
            }
            Err(err) => {
                handle.shutdown(self.config.shutdown_timeout());
                Err(err)
            }
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop();
    }
}
