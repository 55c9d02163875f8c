use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use cmdserver_frame::{FrameConfig, DEFAULT_MAX_PAYLOAD, DEFAULT_READ_CHUNK};
use serde::{Deserialize, Serialize};

use crate::version::{ToolVersion, MIN_PERSISTENT_VERSION};

/// Environment variable carrying the wire text encoding.
pub const ENCODING_ENV: &str = "HGENCODING";

/// Configuration for launching and talking to a command server.
///
/// Passed explicitly to the supervisor; nothing is read from process-wide
/// state after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Executable to launch.
    pub program: PathBuf,
    /// Arguments that start the pipe command server.
    pub server_args: Vec<String>,
    /// Arguments that print the tool version. Used by the preflight check.
    pub version_args: Vec<String>,
    /// Oldest tool version with a pipe command server. `None` skips the check.
    pub min_version: Option<ToolVersion>,
    /// Directory that must exist inside the repository. `None` skips the check.
    pub repository_marker: Option<PathBuf>,
    /// Text encoding forced on the server.
    pub encoding: String,
    /// Set `HGPLAIN=1` so output ignores user presentation settings.
    pub plain: bool,
    /// Insert `--noninteractive` after the command name in `execute`.
    pub noninteractive: bool,
    /// Extra environment for the server. Cannot override the encoding.
    pub extra_env: BTreeMap<String, String>,
    /// Largest payload accepted from the server, in bytes.
    pub max_payload_size: u64,
    /// Largest single read issued while draining a payload.
    pub read_chunk_size: usize,
    /// Default deadline for one exchange. `None` waits forever.
    pub exchange_timeout_ms: Option<u64>,
    /// Deadline for the startup handshake.
    pub startup_timeout_ms: u64,
    /// Grace period between closing the input pipe and killing the server.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("hg"),
            server_args: vec![
                "serve".to_string(),
                "--cmdserver".to_string(),
                "pipe".to_string(),
            ],
            version_args: vec!["--version".to_string(), "--quiet".to_string()],
            min_version: Some(MIN_PERSISTENT_VERSION),
            repository_marker: Some(PathBuf::from(".hg")),
            encoding: "UTF-8".to_string(),
            plain: false,
            noninteractive: true,
            extra_env: BTreeMap::new(),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_chunk_size: DEFAULT_READ_CHUNK,
            exchange_timeout_ms: None,
            startup_timeout_ms: 30_000,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl ServerConfig {
    /// Load a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn exchange_timeout(&self) -> Option<Duration> {
        self.exchange_timeout_ms.map(Duration::from_millis)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Frame reader settings derived from this configuration.
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_payload_size: self.max_payload_size,
            read_chunk_size: self.read_chunk_size,
        }
    }

    /// Environment changes applied to the server process, in order.
    ///
    /// Locale variables are pinned so messages are untranslated and the
    /// wire encoding never depends on the caller's locale.
    pub fn server_environment(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("LANGUAGE".to_string(), "EN".to_string()),
            ("LC_MESSAGES".to_string(), "C".to_string()),
        ];
        if self.plain {
            env.push(("HGPLAIN".to_string(), "1".to_string()));
        }
        env.extend(
            self.extra_env
                .iter()
                .filter(|(key, _)| key.as_str() != ENCODING_ENV)
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        env.push((ENCODING_ENV.to_string(), self.encoding.clone()));
        env
    }

    /// Variables removed from the inherited environment before launch.
    pub fn removed_environment(&self) -> &'static [&'static str] {
        &["LC_ALL", ENCODING_ENV]
    }
}
