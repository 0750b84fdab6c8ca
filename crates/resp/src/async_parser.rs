//! RESP protocol async parser

use crate::{RespError, RespValue};
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

/// Default maximum frame size: 512MB (prevents memory overflow attacks)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of elements accepted in one array header
const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Header of one RESP element
enum Frame {
    Value(RespValue),
    ArrayStart(usize),
}

/// RESP protocol async parser
///
/// Parses one reply per [`parse`](Self::parse) call. Nested arrays are
/// assembled with an explicit stack, and bulk payloads are read as raw bytes.
pub struct AsyncRespParser<R: AsyncRead + Unpin> {
    reader: BufReader<R>,
    max_bytes: usize,
    bytes_read: usize,
}

impl<R: AsyncRead + Unpin> AsyncRespParser<R> {
    /// Create a new async parser (using default max frame size)
    pub fn new(reader: R) -> Self {
        Self::with_max_bytes(reader, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new async parser (specify max frame size)
    ///
    /// # Arguments
    /// * `reader` - Async reader
    /// * `max_bytes` - Maximum size of a single reply in bytes
    pub fn with_max_bytes(reader: R, max_bytes: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_bytes,
            bytes_read: 0,
        }
    }

    /// Check and update the number of bytes read for the current reply
    fn check_frame_size(&mut self, additional: usize) -> Result<(), RespError> {
        self.bytes_read = self.bytes_read.saturating_add(additional);
        if self.bytes_read > self.max_bytes {
            Err(RespError::FrameTooLarge(self.bytes_read, self.max_bytes))
        } else {
            Ok(())
        }
    }

    /// Parse next RESP value
    pub async fn parse(&mut self) -> Result<RespValue, RespError> {
        self.bytes_read = 0;
        let mut stack: Vec<(usize, Vec<RespValue>)> = Vec::new();

        loop {
            let mut value = match self.parse_frame().await? {
                Frame::Value(value) => value,
                Frame::ArrayStart(0) => RespValue::Array(Vec::new()),
                Frame::ArrayStart(len) => {
                    stack.push((len, Vec::with_capacity(len)));
                    continue;
                }
            };

            // Fold the finished value into its parent arrays
            loop {
                let Some((remaining, items)) = stack.last_mut() else {
                    return Ok(value);
                };
                items.push(value);
                *remaining -= 1;
                if *remaining > 0 {
                    break;
                }
                let (_, items) = stack.pop().unwrap_or_default();
                value = RespValue::Array(items);
            }
        }
    }

    /// Read one CRLF-terminated line without the terminator
    async fn read_line(&mut self) -> Result<Vec<u8>, RespError> {
        let mut line = Vec::new();
        let n = self.reader.read_until(b'\n', &mut line).await?;
        if n == 0 {
            return Err(RespError::UnexpectedEof);
        }
        self.check_frame_size(n)?;
        if !line.ends_with(b"\r\n") {
            return Err(RespError::InvalidFormat(
                "Line not terminated by CRLF".to_string(),
            ));
        }
        line.truncate(line.len() - 2);
        Ok(line)
    }

    async fn parse_frame(&mut self) -> Result<Frame, RespError> {
        let line = self.read_line().await?;
        let Some((&kind, rest)) = line.split_first() else {
            return Err(RespError::InvalidFormat("Empty line".to_string()));
        };

        match kind {
            b'+' => Ok(Frame::Value(RespValue::SimpleString(Bytes::copy_from_slice(
                rest,
            )))),
            b'-' => Ok(Frame::Value(RespValue::Error(Bytes::copy_from_slice(rest)))),
            b':' => Ok(Frame::Value(RespValue::Integer(parse_integer(rest)?))),
            b'$' => self.parse_bulk(rest).await.map(Frame::Value),
            b'*' => {
                let count = parse_length(rest, "array")?;
                match count {
                    None => Ok(Frame::Value(RespValue::Null)),
                    Some(count) if count > MAX_ARRAY_LEN => Err(RespError::InvalidFormat(
                        format!("Array too large: {} elements", count),
                    )),
                    Some(count) => Ok(Frame::ArrayStart(count)),
                }
            }
            other => Err(RespError::InvalidType(other)),
        }
    }

    /// Parse bulk string body: $5\r\nhello\r\n
    async fn parse_bulk(&mut self, header: &[u8]) -> Result<RespValue, RespError> {
        let Some(len) = parse_length(header, "bulk string")? else {
            return Ok(RespValue::Null);
        };
        // Data plus CRLF
        self.check_frame_size(len + 2)?;

        let mut buffer = vec![0u8; len + 2];
        self.reader.read_exact(&mut buffer).await?;
        if !buffer.ends_with(b"\r\n") {
            return Err(RespError::InvalidFormat(
                "Expected \\r\\n after bulk string".to_string(),
            ));
        }
        buffer.truncate(len);
        Ok(RespValue::BulkString(Some(Bytes::from(buffer))))
    }
}

fn parse_integer(raw: &[u8]) -> Result<i64, RespError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| RespError::InvalidFormat("Integer is not valid UTF-8".to_string()))?;
    // Parse as i128 first to tell overflow apart from garbage
    let num = text
        .parse::<i128>()
        .map_err(|_| RespError::InvalidFormat(format!("Invalid integer: {}", text)))?;
    i64::try_from(num).map_err(|_| RespError::IntegerOverflow)
}

/// Length header; `-1` means null
fn parse_length(raw: &[u8], what: &str) -> Result<Option<usize>, RespError> {
    let len = parse_integer(raw)?;
    match len {
        -1 => Ok(None),
        n if n < 0 => Err(RespError::InvalidFormat(format!(
            "Invalid {} length: {}",
            what, n
        ))),
        n => Ok(Some(n as usize)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_parse_simple_string() {
        let reader = Builder::new().read(b"+OK\r\n").build();
        let mut parser = AsyncRespParser::with_max_bytes(reader, 1024);
        let result = parser.parse().await.unwrap();
        assert_eq!(result, RespValue::SimpleString(Bytes::from("OK")));
    }

    #[tokio::test]
    async fn test_parse_binary_bulk_string() {
        let reader = Builder::new().read(b"$4\r\na\r\nb\r\n").build();
        let mut parser = AsyncRespParser::with_max_bytes(reader, 1024);
        let result = parser.parse().await.unwrap();
        assert_eq!(result, RespValue::BulkString(Some(Bytes::from_static(b"a\r\nb"))));
    }

    #[tokio::test]
    async fn test_parse_null_and_error() {
        let reader = Builder::new().read(b"$-1\r\n-MOVED 3999 127.0.0.1:6381\r\n").build();
        let mut parser = AsyncRespParser::new(reader);
        assert_eq!(parser.parse().await.unwrap(), RespValue::Null);
        assert_eq!(
            parser.parse().await.unwrap(),
            RespValue::Error(Bytes::from("MOVED 3999 127.0.0.1:6381"))
        );
    }

    #[tokio::test]
    async fn test_parse_nested_array() {
        let data = b"*3\r\n:1\r\n*2\r\n$1\r\na\r\n$-1\r\n*0\r\n";
        let reader = Builder::new().read(data).build();
        let mut parser = AsyncRespParser::with_max_bytes(reader, 1024);
        let result = parser.parse().await.unwrap();
        assert_eq!(
            result,
            RespValue::Array(vec![
                RespValue::Integer(1),
                RespValue::Array(vec![RespValue::bulk("a"), RespValue::Null]),
                RespValue::Array(vec![]),
            ])
        );
    }

    #[tokio::test]
    async fn test_parse_split_reads() {
        let reader = Builder::new().read(b"*2\r\n$3\r\nfo").read(b"o\r\n:42\r\n").build();
        let mut parser = AsyncRespParser::new(reader);
        let result = parser.parse().await.unwrap();
        assert_eq!(
            result,
            RespValue::Array(vec![RespValue::bulk("foo"), RespValue::Integer(42)])
        );
    }

    #[tokio::test]
    async fn test_frame_too_large() {
        let reader = Builder::new().read(b"$9999999999\r\n").build();
        let mut parser = AsyncRespParser::with_max_bytes(reader, 1024);
        let result = parser.parse().await;
        assert!(matches!(result, Err(RespError::FrameTooLarge(_, _))));
    }

    #[tokio::test]
    async fn test_integer_overflow() {
        let reader = Builder::new().read(b":99999999999999999999\r\n").build();
        let mut parser = AsyncRespParser::new(reader);
        assert!(matches!(parser.parse().await, Err(RespError::IntegerOverflow)));
    }

    #[tokio::test]
    async fn test_eof() {
        let mut parser = AsyncRespParser::new(tokio::io::empty());
        assert!(matches!(parser.parse().await, Err(RespError::UnexpectedEof)));
    }
}
