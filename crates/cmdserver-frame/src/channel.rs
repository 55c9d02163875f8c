//! Channel table.
//!
//! Every response frame starts with a single ASCII tag byte naming the
//! logical channel it belongs to. Uppercase tags are requests from the
//! server for data; lowercase tags carry data to the client.

use std::fmt;

use crate::error::{FrameError, Result};

/// A logical channel multiplexed over the server's stdout pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Server asks for up to N bytes of raw input (`I`).
    Input,
    /// Server asks for one line of input of at most N bytes (`L`).
    Line,
    /// Regular command output (`o`).
    Output,
    /// Error and warning output (`e`).
    Error,
    /// Final result code of a command (`r`).
    Result,
    /// Debug output (`d`).
    Debug,
}

impl Channel {
    /// All channels, in wire-tag order.
    pub const ALL: [Channel; 6] = [
        Channel::Input,
        Channel::Line,
        Channel::Output,
        Channel::Error,
        Channel::Result,
        Channel::Debug,
    ];

    /// Look up the channel for a wire tag byte.
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            b'I' => Ok(Channel::Input),
            b'L' => Ok(Channel::Line),
            b'o' => Ok(Channel::Output),
            b'e' => Ok(Channel::Error),
            b'r' => Ok(Channel::Result),
            b'd' => Ok(Channel::Debug),
            other => Err(FrameError::UnknownChannel(other)),
        }
    }

    /// The wire tag byte for this channel.
    pub fn tag(self) -> u8 {
        match self {
            Channel::Input => b'I',
            Channel::Line => b'L',
            Channel::Output => b'o',
            Channel::Error => b'e',
            Channel::Result => b'r',
            Channel::Debug => b'd',
        }
    }

    /// Human-readable channel name.
    pub fn name(self) -> &'static str {
        match self {
            Channel::Input => "INPUT",
            Channel::Line => "LINE",
            Channel::Output => "OUTPUT",
            Channel::Error => "ERROR",
            Channel::Result => "RESULT",
            Channel::Debug => "DEBUG",
        }
    }

    /// Returns true for channels where the length field is a request size
    /// and no payload follows the header.
    pub fn is_interactive(self) -> bool {
        matches!(self, Channel::Input | Channel::Line)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
