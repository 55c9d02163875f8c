//! Client for a persistent command server.
//!
//! One long-lived server process is driven through the `runcommand`
//! protocol over its stdin/stdout. Exchanges are serialized behind a lock;
//! any protocol fault tears the process down and the next exchange starts
//! a fresh one.

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod hello;
pub mod launcher;
pub mod supervisor;
pub mod version;

mod watchdog;

#[cfg(all(test, unix))]
mod testing;

pub use client::{CommandObserver, CommandRequest, PersistentClient};
pub use config::{ServerConfig, ENCODING_ENV};
pub use engine::{settle, validate_argv, ExchangeOptions, ExchangeResult, Responder};
pub use error::{ClientError, ErrorKind, Result, UNDECODABLE_OUTPUT};
pub use hello::{read_hello, Hello, RUNCOMMAND_CAPABILITY};
pub use launcher::{CommandLauncher, Launched, Launcher, Terminate};
pub use supervisor::{SessionState, Supervisor};
pub use version::{ToolVersion, MIN_PERSISTENT_VERSION};
