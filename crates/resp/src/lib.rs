//! RESP (REdis Serialization Protocol) support library
//!
//! Client side of the protocol: request commands with key annotation,
//! request encoding, and async reply parsing.

mod async_parser;
pub mod command;
mod encoder;

pub use async_parser::{AsyncRespParser, DEFAULT_MAX_FRAME_SIZE};
pub use command::{Command, CommandError, CommandErrorKind, KeyLayout};
pub use encoder::{encode_into, encode_to_vec};

use bytes::Bytes;
use std::io;

/// RESP data type
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple string: +OK\r\n
    SimpleString(Bytes),
    /// Error: -ERR message\r\n
    Error(Bytes),
    /// Integer: :123\r\n
    Integer(i64),
    /// Bulk string: $5\r\nhello\r\n
    BulkString(Option<Bytes>),
    /// Array: *2\r\n$3\r\nGET\r\n$3\r\nkey\r\n
    Array(Vec<RespValue>),
    /// Null: $-1\r\n
    Null,
}

impl RespValue {
    /// `+OK`
    pub fn ok() -> Self {
        RespValue::SimpleString(Bytes::from_static(b"OK"))
    }

    pub fn bulk(value: impl Into<Bytes>) -> Self {
        RespValue::BulkString(Some(value.into()))
    }

    pub fn error(message: impl Into<String>) -> Self {
        RespValue::Error(Bytes::from(message.into()))
    }

    /// Whether this is the `+OK` status reply
    pub fn is_ok(&self) -> bool {
        matches!(self, RespValue::SimpleString(s) if s.as_ref() == b"OK")
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Text of a simple or bulk string reply
    pub fn as_text(&self) -> Option<String> {
        match self {
            RespValue::SimpleString(s) | RespValue::BulkString(Some(s)) => {
                Some(String::from_utf8_lossy(s).into_owned())
            }
            _ => None,
        }
    }
}

/// RESP parsing error
#[derive(Debug, thiserror::Error)]
pub enum RespError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid RESP format: {0}")]
    InvalidFormat(String),
    #[error("Unexpected end of input")]
    UnexpectedEof,
    #[error("Integer overflow")]
    IntegerOverflow,
    #[error("Frame too large: {0} bytes (max: {1} bytes)")]
    FrameTooLarge(usize, usize),
    #[error("Invalid RESP type: {0}")]
    InvalidType(u8),
}
