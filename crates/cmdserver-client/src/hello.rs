//! Startup banner sent by the server before it accepts requests.

use std::collections::BTreeMap;
use std::io::Read;

use cmdserver_frame::{Channel, Message, MessageReader};
use serde::Serialize;

use crate::error::{ClientError, Result};

/// Capability a server must advertise to accept `runcommand` requests.
pub const RUNCOMMAND_CAPABILITY: &str = "runcommand";

/// The decoded handshake block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Hello {
    /// Advertised commands, e.g. `getencoding runcommand`.
    pub capabilities: Vec<String>,
    /// Encoding the server will use on the wire.
    pub encoding: Option<String>,
    /// Server process id, when reported.
    pub pid: Option<u32>,
    /// Every `key: value` field of the banner, including the ones above.
    pub fields: BTreeMap<String, String>,
}

impl Hello {
    /// Parse the `key: value` lines of a banner payload.
    pub fn parse(payload: &[u8]) -> Self {
        let text = String::from_utf8_lossy(payload);
        let mut hello = Hello::default();

        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            match key {
                "capabilities" => {
                    hello.capabilities = value.split_whitespace().map(str::to_string).collect();
                }
                "encoding" => hello.encoding = Some(value.to_string()),
                "pid" => hello.pid = value.parse().ok(),
                _ => {}
            }
            hello.fields.insert(key.to_string(), value.to_string());
        }
        hello
    }

    /// Returns true if the server advertised `capability`.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Returns true if the server's encoding matches `expected`, ignoring
    /// case and `-`/`_` spelling differences. An unreported encoding matches.
    pub fn encoding_matches(&self, expected: &str) -> bool {
        match &self.encoding {
            Some(actual) => normalize_encoding(actual) == normalize_encoding(expected),
            None => true,
        }
    }
}

fn normalize_encoding(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Read the handshake block from a freshly started server.
pub fn read_hello<R: Read>(reader: &mut MessageReader<R>) -> Result<Hello> {
    match reader.read_message()? {
        Message::Data {
            channel: Channel::Output,
            payload,
        } => Ok(Hello::parse(&payload)),
        other => Err(ClientError::ServerProtocol(format!(
            "expected handshake on {} channel, got {}",
            Channel::Output,
            other.channel()
        ))),
    }
}
