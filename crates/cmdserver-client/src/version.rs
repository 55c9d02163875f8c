//! Tool version parsing for the persistent-mode preflight.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A dotted `major.minor.patch` tool version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ToolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// First release that ships the pipe command server.
pub const MIN_PERSISTENT_VERSION: ToolVersion = ToolVersion::new(1, 9, 0);

impl ToolVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Find the first dotted version number in free-form `--version` output,
    /// e.g. `Mercurial Distributed SCM (version 6.5.1+hg12)`.
    pub fn find_in(text: &str) -> Option<Self> {
        text.split(|c: char| c.is_whitespace() || c == '(' || c == ')')
            .find_map(|token| parse_leading(token).filter(|_| token.contains('.')))
    }
}

impl FromStr for ToolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_leading(s.trim()).ok_or_else(|| format!("invalid version: {s:?}"))
    }
}

impl TryFrom<String> for ToolVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ToolVersion> for String {
    fn from(value: ToolVersion) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Parse up to three leading numeric components; anything after the
/// numeric prefix (`+hg12`, `rc1`, `-dirty`) is ignored.
fn parse_leading(token: &str) -> Option<ToolVersion> {
    let mut parts = [0u32; 3];
    let mut count = 0usize;

    for piece in token.split('.') {
        if count == parts.len() {
            break;
        }
        let digits: String = piece.chars().take_while(char::is_ascii_digit).collect();
        if digits.is_empty() {
            break;
        }
        parts[count] = digits.parse().ok()?;
        count += 1;
        if digits.len() != piece.len() {
            break;
        }
    }

    if count == 0 {
        return None;
    }
    Some(ToolVersion::new(parts[0], parts[1], parts[2]))
}
