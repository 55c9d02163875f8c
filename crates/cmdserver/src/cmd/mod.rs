use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Subcommand};
use cmdserver_client::{PersistentClient, ServerConfig};

use crate::exit::{client_error, io_error, CliError, CliResult, DATA_INVALID, USAGE};
use crate::output::OutputFormat;

pub mod batch;
pub mod hello;
pub mod run;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one command through a persistent server.
    Run(RunArgs),
    /// Run one command per stdin line over a single server.
    Batch(BatchArgs),
    /// Start a server and print its handshake banner.
    Hello(HelloArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: Option<OutputFormat>) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args, format.unwrap_or(OutputFormat::Raw)),
        Command::Batch(args) => batch::run(args, format.unwrap_or(OutputFormat::Raw)),
        Command::Hello(args) => {
            hello::run(args, format.unwrap_or_else(OutputFormat::default_for_stdout))
        }
        Command::Version(args) => version::run(args),
    }
}

/// Options shared by every subcommand that starts a server.
#[derive(Args, Debug, Default)]
pub struct ServerArgs {
    /// Server configuration file (JSON).
    #[arg(long, value_name = "FILE", env = "CMDSERVER_CONFIG")]
    pub config: Option<PathBuf>,
    /// Program to launch instead of the configured one.
    #[arg(long, value_name = "PROGRAM", env = "CMDSERVER_HG")]
    pub hg: Option<PathBuf>,
    /// Wire encoding forced on the server.
    #[arg(long, value_name = "ENCODING")]
    pub encoding: Option<String>,
    /// Per-exchange deadline (e.g. 30s, 500ms).
    #[arg(long, value_name = "DURATION")]
    pub timeout: Option<String>,
    /// Ask the server for plain, script-friendly output.
    #[arg(long)]
    pub plain: bool,
}

impl ServerArgs {
    pub fn server_config(&self) -> CliResult<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ServerConfig::default(),
        };
        if let Some(program) = &self.hg {
            config.program = program.clone();
        }
        if let Some(encoding) = &self.encoding {
            config.encoding = encoding.clone();
        }
        if let Some(timeout) = &self.timeout {
            let timeout = parse_duration(timeout)?;
            config.exchange_timeout_ms = Some(timeout.as_millis().try_into().unwrap_or(u64::MAX));
        }
        if self.plain {
            config.plain = true;
        }
        Ok(config)
    }

    pub fn connect(&self, repository: &Path) -> CliResult<PersistentClient> {
        let config = self.server_config()?;
        PersistentClient::with_config(repository, config)
            .map_err(|err| client_error("failed to start command server", err))
    }
}

fn load_config(path: &Path) -> CliResult<ServerConfig> {
    let text = std::fs::read_to_string(path)
        .map_err(|err| io_error(&format!("failed to read {}", path.display()), err))?;
    ServerConfig::from_json(&text).map_err(|err| {
        CliError::new(
            DATA_INVALID,
            format!("invalid config {}: {err}", path.display()),
        )
    })
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Repository to serve.
    pub repository: PathBuf,
    /// Command name and arguments.
    #[arg(last = true, required = true, value_name = "ARGS")]
    pub args: Vec<String>,
    /// Answer input prompts from this process's stdin.
    #[arg(long)]
    pub stdin: bool,
    /// Include the server's debug channel in the output.
    #[arg(long)]
    pub debug_channel: bool,
    #[command(flatten)]
    pub server: ServerArgs,
}

#[derive(Args, Debug)]
pub struct BatchArgs {
    /// Repository to serve.
    pub repository: PathBuf,
    /// Stop at the first failing command.
    #[arg(long)]
    pub fail_fast: bool,
    #[command(flatten)]
    pub server: ServerArgs,
}

#[derive(Args, Debug)]
pub struct HelloArgs {
    /// Repository to serve.
    pub repository: PathBuf,
    #[command(flatten)]
    pub server: ServerArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
