//! Command construction errors

use std::fmt;

/// Command error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandErrorKind {
    /// Empty command
    EmptyCommand,
    /// Wrong number of arguments
    WrongArity,
    /// Invalid argument
    InvalidArgument,
    /// Not a RESP array of strings
    InvalidFormat,
}

/// Command construction error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError {
    kind: CommandErrorKind,
    message: String,
}

impl CommandError {
    pub fn new(kind: CommandErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> CommandErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ERR {}", self.message)
    }
}

impl std::error::Error for CommandError {}
