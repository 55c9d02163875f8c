//! Spawning the server process and wiring up its pipes.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::error::{ClientError, Result};
use crate::version::ToolVersion;

/// Forcibly ends a launched server from any thread.
///
/// Used by the deadline watchdog: after `terminate` returns, blocked reads
/// on the server's output pipe must fail or hit EOF.
pub trait Terminate: Send + Sync {
    fn terminate(&self);
}

/// Starts server processes for a supervisor.
pub trait Launcher: Send + Sync {
    /// Check that persistent mode can work at all. Runs once, before the
    /// first launch.
    fn preflight(&self) -> Result<()> {
        Ok(())
    }

    /// Start a fresh server and hand back its pipes.
    fn launch(&self) -> Result<Launched>;
}

/// A started server: its pipes plus whatever is needed to stop it.
pub struct Launched {
    pub(crate) reader: Box<dyn Read + Send>,
    pub(crate) writer: Box<dyn Write + Send>,
    pub(crate) child: Option<Arc<Mutex<Child>>>,
    pub(crate) terminator: Arc<dyn Terminate>,
}

impl Launched {
    /// Take ownership of a spawned child with piped stdio.
    ///
    /// stderr is drained on a background thread into `tracing` so the
    /// server can never block on a full stderr pipe.
    pub fn from_child(mut child: Child) -> Result<Self> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClientError::ServerProtocol("failed to get stdin handle".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::ServerProtocol("failed to get stdout handle".into()))?;
        if let Some(stderr) = child.stderr.take() {
            drain_stderr(stderr, child.id())?;
        }

        let child = Arc::new(Mutex::new(child));
        Ok(Self {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            child: Some(Arc::clone(&child)),
            terminator: Arc::new(ChildTerminator(child)),
        })
    }

    /// Wrap an arbitrary stream pair, e.g. a socket to an in-process server.
    pub fn from_streams(
        reader: impl Read + Send + 'static,
        writer: impl Write + Send + 'static,
        terminator: Arc<dyn Terminate>,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
            terminator,
        }
    }

    /// OS process id of the server, if it is a child process.
    pub fn pid(&self) -> Option<u32> {
        self.child
            .as_ref()
            .map(|child| child.lock().unwrap_or_else(PoisonError::into_inner).id())
    }
}

struct ChildTerminator(Arc<Mutex<Child>>);

impl Terminate for ChildTerminator {
    fn terminate(&self) {
        let mut child = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = child.kill() {
            debug!(pid = child.id(), error = %err, "kill failed (server already exited?)");
        }
    }
}

fn drain_stderr(stderr: ChildStderr, pid: u32) -> Result<()> {
    thread::Builder::new()
        .name(format!("cmdserver-stderr-{pid}"))
        .spawn(move || {
            let mut lines = BufReader::new(stderr);
            let mut line = Vec::new();
            loop {
                line.clear();
                match lines.read_until(b'\n', &mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&line);
                        debug!(target: "cmdserver::server_stderr", pid, "{}", text.trim_end());
                    }
                }
            }
        })
        .map(|_| ())
        .map_err(|err| ClientError::ServerProtocol(format!("failed to spawn stderr reader: {err}")))
}

/// Launches the real tool in pipe command-server mode for one repository.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    repository: PathBuf,
    config: ServerConfig,
}

impl CommandLauncher {
    pub fn new(repository: impl Into<PathBuf>, config: ServerConfig) -> Self {
        Self {
            repository: repository.into(),
            config,
        }
    }

    pub fn repository(&self) -> &Path {
        &self.repository
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run the version query and parse its output.
    pub fn query_version(&self) -> Result<ToolVersion> {
        let output = self
            .command(&self.config.version_args)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| {
                ClientError::UnsupportedEnvironment(format!(
                    "failed to run {}: {err}",
                    self.config.program.display()
                ))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        ToolVersion::find_in(&stdout).ok_or_else(|| {
            ClientError::UnsupportedEnvironment(format!(
                "could not determine version of {} from {:?}",
                self.config.program.display(),
                stdout.trim()
            ))
        })
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(args).current_dir(&self.repository);
        for key in self.config.removed_environment() {
            cmd.env_remove(key);
        }
        cmd.envs(self.config.server_environment());
        cmd
    }
}

impl Launcher for CommandLauncher {
    fn preflight(&self) -> Result<()> {
        if !self.repository.is_dir() {
            return Err(ClientError::UnsupportedEnvironment(format!(
                "repository path is not a directory: {}",
                self.repository.display()
            )));
        }

        if let Some(marker) = &self.config.repository_marker {
            if !self.repository.join(marker).is_dir() {
                return Err(ClientError::UnsupportedEnvironment(format!(
                    "not a repository (missing {}): {}",
                    marker.display(),
                    self.repository.display()
                )));
            }
        }

        if let Some(min_version) = self.config.min_version {
            let version = self.query_version()?;
            debug!(%version, %min_version, "detected tool version");
            if version < min_version {
                return Err(ClientError::UnsupportedEnvironment(format!(
                    "{} {version} predates the command server (requires {min_version})",
                    self.config.program.display()
                )));
            }
        }

        Ok(())
    }

    fn launch(&self) -> Result<Launched> {
        let child = self
            .command(&self.config.server_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                ClientError::ServerProtocol(format!(
                    "failed to start {}: {err}",
                    self.config.program.display()
                ))
            })?;

        info!(
            pid = child.id(),
            program = %self.config.program.display(),
            repository = %self.repository.display(),
            "started command server"
        );
        Launched::from_child(child)
    }
}
