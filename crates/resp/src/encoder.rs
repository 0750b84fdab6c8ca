//! RESP protocol encoder

use crate::RespValue;

/// Append the RESP encoding of `value` to `buf`
pub fn encode_into(value: &RespValue, buf: &mut Vec<u8>) {
    match value {
        RespValue::SimpleString(s) => {
            buf.push(b'+');
            buf.extend_from_slice(s);
            buf.extend_from_slice(b"\r\n");
        }
        RespValue::Error(e) => {
            buf.push(b'-');
            buf.extend_from_slice(e);
            buf.extend_from_slice(b"\r\n");
        }
        RespValue::Integer(i) => {
            buf.extend_from_slice(format!(":{}\r\n", i).as_bytes());
        }
        RespValue::BulkString(Some(bytes)) => {
            buf.extend_from_slice(format!("${}\r\n", bytes.len()).as_bytes());
            buf.extend_from_slice(bytes);
            buf.extend_from_slice(b"\r\n");
        }
        RespValue::BulkString(None) | RespValue::Null => {
            buf.extend_from_slice(b"$-1\r\n");
        }
        RespValue::Array(items) => {
            buf.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
            for item in items {
                encode_into(item, buf);
            }
        }
    }
}

/// Encode RESP value and return byte vector
pub fn encode_to_vec(value: &RespValue) -> Vec<u8> {
    let mut buffer = Vec::new();
    encode_into(value, &mut buffer);
    buffer
}
