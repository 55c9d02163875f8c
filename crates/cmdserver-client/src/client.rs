//! The persistent client: one server process, serialized exchanges.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use tracing::debug;

use crate::config::ServerConfig;
use crate::engine::{exchange, settle, validate_argv, ExchangeOptions, ExchangeResult};
use crate::error::{ClientError, Result};
use crate::hello::Hello;
use crate::launcher::{CommandLauncher, Launcher};
use crate::supervisor::{SessionState, Supervisor};
use crate::watchdog::Watchdog;

const NONINTERACTIVE_FLAG: &str = "--noninteractive";

/// Watches one command run through [`PersistentClient::execute`].
///
/// `arguments` is everything after the command name, space-joined.
/// Nothing after `executing` is called when the exchange fails.
pub trait CommandObserver {
    fn executing(&mut self, _command: &str, _arguments: &str) {}

    fn output(&mut self, _output: &str) {}

    fn error_output(&mut self, _error: &str) {}

    fn executed(
        &mut self,
        _command: &str,
        _arguments: &str,
        _code: i32,
        _output: &str,
        _error: &str,
    ) {
    }
}

/// A command built by a higher layer and run through [`PersistentClient::execute`].
pub trait CommandRequest {
    /// Command name, sent first.
    fn command(&self) -> &str;

    /// Arguments in order. Blank entries are dropped before sending.
    fn arguments(&self) -> Vec<String>;

    /// Extra arguments appended after [`CommandRequest::arguments`].
    fn additional_arguments(&self) -> Vec<String> {
        Vec::new()
    }

    /// Check the request before anything is written. The message becomes
    /// an [`ClientError::InvalidRequest`].
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Called after validation, right before the exchange.
    fn before(&mut self) {}

    /// Called with the settled result of a successful exchange.
    fn after(&mut self, _result: &ExchangeResult) {}

    /// Observer notified around the exchange, if any.
    fn observer(&mut self) -> Option<&mut dyn CommandObserver> {
        None
    }
}

/// Client for one long-lived command server.
///
/// All exchanges go through a single lock, so requests from different
/// threads are never interleaved on the wire. The server is started on
/// construction and restarted on demand after a stop or a fault.
pub struct PersistentClient {
    repository: Option<PathBuf>,
    config: ServerConfig,
    supervisor: Mutex<Supervisor>,
}

impl PersistentClient {
    /// Start a server for `repository` with the default configuration.
    pub fn new(repository: impl Into<PathBuf>) -> Result<Self> {
        Self::with_config(repository, ServerConfig::default())
    }

    /// Start a server for `repository` with `config`.
    pub fn with_config(repository: impl Into<PathBuf>, config: ServerConfig) -> Result<Self> {
        let repository = repository.into();
        let launcher = CommandLauncher::new(repository.clone(), config.clone());
        let mut client = Self::with_launcher(Box::new(launcher), config)?;
        client.repository = Some(repository);
        Ok(client)
    }

    /// Start a server through a custom launcher.
    pub fn with_launcher(launcher: Box<dyn Launcher>, config: ServerConfig) -> Result<Self> {
        let mut supervisor = Supervisor::new(launcher, config.clone());
        supervisor.preflight()?;
        supervisor.start()?;
        Ok(Self {
            repository: None,
            config,
            supervisor: Mutex::new(supervisor),
        })
    }

    /// Returns true if persistent mode can be used for `repository` with `config`.
    pub fn is_supported(repository: impl Into<PathBuf>, config: &ServerConfig) -> bool {
        CommandLauncher::new(repository, config.clone())
            .preflight()
            .is_ok()
    }

    pub fn repository_path(&self) -> Option<&Path> {
        self.repository.as_deref()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.lock().state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// Banner of the running server.
    pub fn hello(&self) -> Option<Hello> {
        self.lock().hello().cloned()
    }

    /// Start the server if it is not running.
    pub fn start(&self) -> Result<()> {
        self.lock().start()
    }

    /// Stop the server. The next exchange starts a new one.
    pub fn stop(&self) {
        self.lock().stop();
    }

    /// Run one exchange with `argv` as given.
    ///
    /// Blocks while another exchange holds the server. Any error other
    /// than an invalid request tears the server down; a nonzero code with
    /// no output is reported as [`ClientError::CommandExecution`].
    ///
    /// A deadline that expires after the result frame was read still
    /// reports [`ClientError::Timeout`]: the server has already been killed
    /// by then, so the exchange is discarded with it.
    pub fn run<S: AsRef<str>>(
        &self,
        argv: &[S],
        mut options: ExchangeOptions<'_>,
    ) -> Result<ExchangeResult> {
        validate_argv(argv)?;

        let mut supervisor = self.lock();
        let deadline = options.deadline().or_else(|| {
            self.config
                .exchange_timeout()
                .map(|timeout| Instant::now() + timeout)
        });

        let outcome = run_locked(&mut supervisor, argv, &mut options, deadline).and_then(settle);
        if let Err(err) = &outcome {
            if err.invalidates_session() {
                supervisor.fault(err);
            }
        }
        outcome
    }

    /// Run a [`CommandRequest`]: validate, `before`, exchange, `after`.
    ///
    /// The request's observer sees `executing` before the exchange and
    /// `output`, `error_output`, `executed` after a normal completion,
    /// ahead of `after`.
    pub fn execute<R: CommandRequest + ?Sized>(&self, request: &mut R) -> Result<ExchangeResult> {
        request.validate().map_err(ClientError::InvalidRequest)?;
        request.before();

        let argv = self.command_line(request);
        let command = argv[0].as_str();
        let arguments = argv[1..].join(" ");
        debug!(command, arguments = %arguments, "executing");
        if let Some(observer) = request.observer() {
            observer.executing(command, &arguments);
        }

        let result = self.run(&argv, ExchangeOptions::new())?;

        if let Some(observer) = request.observer() {
            let output = result.output_text();
            let error = result.error_text();
            observer.output(&output);
            observer.error_output(&error);
            observer.executed(command, &arguments, result.code, &output, &error);
        }
        request.after(&result);
        Ok(result)
    }

    /// The argument vector sent for `request`.
    pub fn command_line<R: CommandRequest + ?Sized>(&self, request: &R) -> Vec<String> {
        let mut argv = vec![request.command().to_string()];
        if self.config.noninteractive {
            argv.push(NONINTERACTIVE_FLAG.to_string());
        }
        argv.extend(
            request
                .arguments()
                .into_iter()
                .chain(request.additional_arguments())
                .filter(|arg| !arg.trim().is_empty())
                .map(|arg| arg.trim_matches('"').to_string()),
        );
        argv
    }

    /// Lock the supervisor. A poisoned lock means an exchange unwound
    /// partway, so its unread frames are still on the pipe: the server is
    /// torn down before anyone else uses it.
    fn lock(&self) -> MutexGuard<'_, Supervisor> {
        match self.supervisor.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                let mut guard = poisoned.into_inner();
                guard.fault(&ClientError::ServerProtocol(
                    "previous exchange panicked mid-flight".to_string(),
                ));
                self.supervisor.clear_poison();
                guard
            }
        }
    }
}

fn run_locked<S: AsRef<str>>(
    supervisor: &mut Supervisor,
    argv: &[S],
    options: &mut ExchangeOptions<'_>,
    deadline: Option<Instant>,
) -> Result<ExchangeResult> {
    let handle = supervisor.ensure_running()?;
    let mut watchdog = deadline.map(|deadline| Watchdog::arm(deadline, handle.terminator()));

    let result = exchange(&mut handle.reader, &mut handle.writer, argv, options);

    match watchdog.as_mut().map(|w| (w.disarm(), w.budget())) {
        Some((true, budget)) => Err(ClientError::Timeout(budget)),
        _ => result,
    }
}

impl std::fmt::Debug for PersistentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentClient")
            .field("repository", &self.repository)
            .field("state", &self.state())
            .finish()
    }
}
