//! Persistent command server client.
//!
//! Drives one long-lived server process over the `runcommand` pipe
//! protocol and serializes every exchange with it.
//!
//! # Crate Structure
//!
//! - [`frame`]: Channel table, request/response codec, blocking reader and writer
//! - [`client`]: Process supervision, the exchange engine, and [`PersistentClient`]

/// Re-export frame types.
pub mod frame {
    pub use cmdserver_frame::*;
}

/// Re-export client types.
pub mod client {
    pub use cmdserver_client::*;
}

pub use cmdserver_client::{
    ClientError, CommandRequest, ExchangeOptions, ExchangeResult, PersistentClient, ServerConfig,
    SessionState,
};
