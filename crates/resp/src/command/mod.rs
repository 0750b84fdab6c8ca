//! Request commands
//!
//! A command is its upper-cased name plus binary arguments. The name decides
//! where the keys sit in the argument list, which is all the cluster router
//! needs to pick a target node.

mod error;

pub use error::{CommandError, CommandErrorKind};

use crate::RespValue;
use bytes::Bytes;

/// Position of keys inside a command's arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLayout {
    /// No key (administrative, transactional, connection commands)
    Keyless,
    /// First argument is the key
    Single,
    /// Every `step`-th argument starting at 0 is a key (`MGET` step 1, `MSET` step 2)
    Multi { step: usize },
}

/// Commands that never carry a key
const KEYLESS_COMMANDS: &[&str] = &[
    "AUTH", "BGREWRITEAOF", "BGSAVE", "CLIENT", "CLUSTER", "COMMAND", "CONFIG", "DBSIZE",
    "DISCARD", "ECHO", "EXEC", "FLUSHALL", "FLUSHDB", "HELLO", "INFO", "KEYS", "LASTSAVE",
    "MULTI", "PING", "PUBLISH", "QUIT", "RANDOMKEY", "READONLY", "READWRITE", "SAVE", "SCAN",
    "SCRIPT", "SELECT", "TIME", "UNWATCH", "WAIT", "WATCH",
];

/// Commands whose arguments are all keys
const KEY_LIST_COMMANDS: &[&str] = &["DEL", "EXISTS", "MGET", "TOUCH", "UNLINK"];

/// Commands whose arguments are key/value pairs
const KEY_VALUE_COMMANDS: &[&str] = &["MSET", "MSETNX"];

/// Redis request command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    args: Vec<Bytes>,
}

impl Command {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: name.as_ref().to_uppercase(),
            args: Vec::new(),
        }
    }

    /// Append an argument
    pub fn arg(mut self, arg: impl Into<Bytes>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Build from a full argument vector, name first
    pub fn from_args(mut args: Vec<Bytes>) -> Result<Self, CommandError> {
        if args.is_empty() {
            return Err(CommandError::new(
                CommandErrorKind::EmptyCommand,
                "Empty command",
            ));
        }
        let name = String::from_utf8_lossy(&args.remove(0)).to_uppercase();
        let cmd = Self { name, args };
        cmd.check_arity()?;
        Ok(cmd)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    pub fn key_layout(&self) -> KeyLayout {
        let name = self.name.as_str();
        if self.args.is_empty() || KEYLESS_COMMANDS.contains(&name) {
            KeyLayout::Keyless
        } else if KEY_LIST_COMMANDS.contains(&name) {
            KeyLayout::Multi { step: 1 }
        } else if KEY_VALUE_COMMANDS.contains(&name) {
            KeyLayout::Multi { step: 2 }
        } else {
            KeyLayout::Single
        }
    }

    /// All keys in argument order
    pub fn keys(&self) -> Vec<&Bytes> {
        match self.key_layout() {
            KeyLayout::Keyless => Vec::new(),
            KeyLayout::Single => self.args.first().into_iter().collect(),
            KeyLayout::Multi { step } => self.args.iter().step_by(step).collect(),
        }
    }

    /// Primary key used for routing
    pub fn first_key(&self) -> Option<&Bytes> {
        match self.key_layout() {
            KeyLayout::Keyless => None,
            _ => self.args.first(),
        }
    }

    /// Check argument count against the key layout
    pub fn check_arity(&self) -> Result<(), CommandError> {
        if let KeyLayout::Multi { step } = self.key_layout() {
            if self.args.len() % step != 0 {
                return Err(CommandError::new(
                    CommandErrorKind::WrongArity,
                    format!("wrong number of arguments for '{}' command", self.name),
                ));
            }
        }
        Ok(())
    }

    /// Copy of a multi-key command keeping only the given key groups
    ///
    /// Group `i` is the key at position `i` plus its trailing values
    /// (for `MSET`, the key and its value). Single-key and keyless commands
    /// are returned unchanged.
    pub fn select_key_groups(&self, groups: &[usize]) -> Command {
        let KeyLayout::Multi { step } = self.key_layout() else {
            return self.clone();
        };
        let mut args = Vec::with_capacity(groups.len() * step);
        for &group in groups {
            let start = group * step;
            if let Some(chunk) = self.args.get(start..start + step) {
                args.extend(chunk.iter().cloned());
            }
        }
        Command {
            name: self.name.clone(),
            args,
        }
    }

    /// RESP array form sent on the wire
    pub fn to_resp(&self) -> RespValue {
        let mut items = Vec::with_capacity(self.args.len() + 1);
        items.push(RespValue::BulkString(Some(Bytes::from(self.name.clone()))));
        items.extend(self.args.iter().cloned().map(|a| RespValue::BulkString(Some(a))));
        RespValue::Array(items)
    }
}

impl TryFrom<RespValue> for Command {
    type Error = CommandError;

    fn try_from(value: RespValue) -> Result<Self, Self::Error> {
        Self::try_from(&value)
    }
}

impl TryFrom<&RespValue> for Command {
    type Error = CommandError;

    fn try_from(value: &RespValue) -> Result<Self, Self::Error> {
        Command::from_args(extract_args(value)?)
    }
}

/// Extract argument list from RespValue
fn extract_args(value: &RespValue) -> Result<Vec<Bytes>, CommandError> {
    match value {
        RespValue::Array(items) => {
            let mut args = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    RespValue::BulkString(Some(bytes)) => args.push(bytes.clone()),
                    RespValue::SimpleString(s) => args.push(s.clone()),
                    RespValue::Integer(n) => args.push(Bytes::from(n.to_string())),
                    _ => {
                        return Err(CommandError::new(
                            CommandErrorKind::InvalidArgument,
                            "Invalid argument type",
                        ))
                    }
                }
            }
            Ok(args)
        }
        _ => Err(CommandError::new(
            CommandErrorKind::InvalidFormat,
            "Command must be an array",
        )),
    }
}
