// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Remote command channel
//!
//! Commands travel as the decimal strings `"0"`, `"1"` and `"2"`. Decoding is
//! strict: anything else is rejected and never reaches the run state.
//!
//! # Transitions
//!
//! ```text
//!            Stop                 Exit
//!   Active --------> Standby  ----------> Terminating (absorbing)
//!      ^   <--------    |
//!      |     Start      |  Exit
//!      +----------------+------------->  Terminating
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Command decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandDecodeError {
    #[error("unknown command code '{0}'")]
    UnknownCode(String),

    #[error("command payload is not valid UTF-8")]
    Encoding,
}

/// Control commands accepted on the command topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppCommand {
    Start,
    Stop,
    Exit,
}

impl AppCommand {
    /// Wire code of the command.
    pub fn code(self) -> u8 {
        match self {
            Self::Start => 0,
            Self::Stop => 1,
            Self::Exit => 2,
        }
    }

    /// Decode a command from its wire code.
    pub fn from_code(code: &str) -> Result<Self, CommandDecodeError> {
        match code.trim() {
            "0" => Ok(Self::Start),
            "1" => Ok(Self::Stop),
            "2" => Ok(Self::Exit),
            other => Err(CommandDecodeError::UnknownCode(other.to_string())),
        }
    }

    /// Decode a command from raw payload bytes.
    pub fn decode(payload: &[u8]) -> Result<Self, CommandDecodeError> {
        let text = std::str::from_utf8(payload).map_err(|_| CommandDecodeError::Encoding)?;
        Self::from_code(text)
    }

    /// Payload published on the command topic for this command.
    pub fn encode(self) -> Vec<u8> {
        self.code().to_string().into_bytes()
    }
}

/// Parses the command names used on the command line (`start`, `stop`,
/// `exit`).
impl FromStr for AppCommand {
    type Err = CommandDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "exit" => Ok(Self::Exit),
            other => Err(CommandDecodeError::UnknownCode(other.to_string())),
        }
    }
}

impl fmt::Display for AppCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Exit => "exit",
        };
        f.write_str(name)
    }
}

/// Run state of the acquisition loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RunState {
    #[default]
    Active,
    Standby,
    Terminating,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        self == Self::Terminating
    }

    /// State reached after applying `command`.
    ///
    /// Returns `None` when the current state is terminal: no command is
    /// processed once termination has started.
    pub fn next(self, command: AppCommand) -> Option<RunState> {
        if self.is_terminal() {
            return None;
        }
        Some(match command {
            AppCommand::Start => Self::Active,
            AppCommand::Stop => Self::Standby,
            AppCommand::Exit => Self::Terminating,
        })
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "active",
            Self::Standby => "standby",
            Self::Terminating => "terminating",
        };
        f.write_str(name)
    }
}
