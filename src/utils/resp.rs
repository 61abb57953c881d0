//! RESP wire codec
//!
//! Requests go out as arrays of bulk strings. Replies are read one value at
//! a time from a buffered reader, so a pipeline can flush every command in
//! one write and then read the replies back in order. RESP3 nulls, booleans
//! and maps are folded into their RESP2 shapes (a map becomes a flat
//! `[name, value, ...]` array) so callers only handle one set of variants.

use std::io::{self, BufRead};

#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Vec<u8>),
    Null,
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null)
    }

    /// Reply for a key that vanished between SCAN and a probe
    pub fn is_missing_key(&self) -> bool {
        match self {
            RespValue::Null => true,
            RespValue::Error(e) => e.to_ascii_lowercase().contains("no such key"),
            _ => false,
        }
    }

    /// Borrowed text of a simple or valid-UTF-8 bulk string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Owned text; invalid UTF-8 is replaced, not rejected
    pub fn to_text(&self) -> Option<String> {
        match self {
            RespValue::SimpleString(s) => Some(s.clone()),
            RespValue::BulkString(b) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(b) => Some(b),
            _ => None,
        }
    }

    /// Owned payload of a simple or bulk string, byte for byte
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        match self {
            RespValue::SimpleString(s) => Some(s.as_bytes().to_vec()),
            RespValue::BulkString(b) => Some(b.clone()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RespValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Non-negative integer, also from a numeric string (SCAN cursors are bulk strings)
    pub fn as_u64_lenient(&self) -> Option<u64> {
        match self {
            RespValue::Integer(i) => u64::try_from(*i).ok(),
            RespValue::SimpleString(_) | RespValue::BulkString(_) => self.as_str()?.parse().ok(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[RespValue]> {
        match self {
            RespValue::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Short form for log lines and shape errors
    pub fn describe(&self) -> String {
        match self {
            RespValue::SimpleString(s) => format!("+{}", s),
            RespValue::Error(e) => format!("-{}", e),
            RespValue::Integer(i) => format!(":{}", i),
            RespValue::BulkString(b) => format!("${} bytes", b.len()),
            RespValue::Null => "(nil)".to_string(),
            RespValue::Array(a) => format!("*{} elements", a.len()),
        }
    }
}

/// Reusable request buffer
pub struct RespEncoder {
    buf: Vec<u8>,
}

impl RespEncoder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    fn header(&mut self, marker: u8, len: usize) {
        let mut digits = itoa::Buffer::new();
        self.buf.push(marker);
        self.buf.extend_from_slice(digits.format(len).as_bytes());
        self.buf.extend_from_slice(b"\r\n");
    }

    /// Append one command; arguments are binary safe
    pub fn encode_command<A: AsRef<[u8]>>(&mut self, args: &[A]) {
        self.header(b'*', args.len());
        for arg in args {
            let arg = arg.as_ref();
            self.header(b'$', arg.len());
            self.buf.extend_from_slice(arg);
            self.buf.extend_from_slice(b"\r\n");
        }
    }

    /// Append a batch of commands back to back
    pub fn encode_pipeline(&mut self, commands: &[Vec<Vec<u8>>]) {
        commands.iter().for_each(|cmd| self.encode_command(cmd));
    }
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Largest bulk string the server can send
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Largest element count accepted for one aggregate header
const MAX_ELEMENTS: i64 = 1024 * 1024 * 1024;

/// Length from a `$`, `*`, `~` or `%` header; `None` is the RESP2 null (-1)
fn parse_len(content: &str, what: &str, max: i64) -> io::Result<Option<usize>> {
    let len: i64 = content
        .parse()
        .map_err(|_| invalid(format!("invalid {} length {:?}", what, content)))?;
    match len {
        -1 => Ok(None),
        len if len < 0 || len > max => {
            Err(invalid(format!("{} length {} out of range", what, len)))
        }
        len => Ok(Some(len as usize)),
    }
}

/// Streaming reply reader over any buffered source
pub struct RespDecoder<R> {
    reader: R,
    line: String,
}

impl<R: BufRead> RespDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::with_capacity(128),
        }
    }

    /// Read one CRLF-terminated header line; returns the type marker and the rest
    fn read_header(&mut self) -> io::Result<(u8, String)> {
        self.line.clear();
        if self.reader.read_line(&mut self.line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by server",
            ));
        }
        let line = self.line.trim_end_matches(&['\r', '\n'][..]);
        let marker = *line
            .as_bytes()
            .first()
            .ok_or_else(|| invalid("empty reply line"))?;
        if !marker.is_ascii() {
            return Err(invalid("non-ASCII reply type"));
        }
        Ok((marker, line[1..].to_string()))
    }

    fn read_bulk(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut data = vec![0u8; len + 2];
        self.reader.read_exact(&mut data)?;
        if !data.ends_with(b"\r\n") {
            return Err(invalid("bulk string not terminated by CRLF"));
        }
        data.truncate(len);
        Ok(data)
    }

    fn read_elements(&mut self, count: usize) -> io::Result<Vec<RespValue>> {
        (0..count).map(|_| self.decode()).collect()
    }

    pub fn decode(&mut self) -> io::Result<RespValue> {
        let (marker, content) = self.read_header()?;
        match marker {
            b'+' => Ok(RespValue::SimpleString(content)),
            b'-' => Ok(RespValue::Error(content)),
            b':' => content
                .parse()
                .map(RespValue::Integer)
                .map_err(|_| invalid(format!("invalid integer {:?}", content))),
            b'#' => Ok(RespValue::Integer(i64::from(content == "t"))),
            b'_' => Ok(RespValue::Null),
            b'$' => match parse_len(&content, "bulk", MAX_BULK_LEN)? {
                None => Ok(RespValue::Null),
                Some(len) => self.read_bulk(len).map(RespValue::BulkString),
            },
            b'*' | b'~' => match parse_len(&content, "array", MAX_ELEMENTS)? {
                None => Ok(RespValue::Null),
                Some(count) => self.read_elements(count).map(RespValue::Array),
            },
            b'%' => match parse_len(&content, "map", MAX_ELEMENTS)? {
                None => Ok(RespValue::Null),
                Some(count) => {
                    let items = count
                        .checked_mul(2)
                        .ok_or_else(|| invalid(format!("map length {} out of range", count)))?;
                    self.read_elements(items).map(RespValue::Array)
                }
            },
            other => Err(invalid(format!("unknown reply type {:?}", other as char))),
        }
    }

    /// Read `count` replies in order
    pub fn decode_pipeline(&mut self, count: usize) -> io::Result<Vec<RespValue>> {
        self.read_elements(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn decode_all(data: &[u8], count: usize) -> io::Result<Vec<RespValue>> {
        RespDecoder::new(Cursor::new(data)).decode_pipeline(count)
    }

    #[test]
    fn test_encode_scan_command() {
        let mut encoder = RespEncoder::with_capacity(64);
        encoder.encode_command(&["SCAN", "0", "COUNT", "100"]);
        assert_eq!(
            encoder.as_bytes(),
            b"*4\r\n$4\r\nSCAN\r\n$1\r\n0\r\n$5\r\nCOUNT\r\n$3\r\n100\r\n"
        );
        encoder.clear();
        assert!(encoder.as_bytes().is_empty());
    }

    #[test]
    fn test_encode_pipeline() {
        let mut encoder = RespEncoder::with_capacity(64);
        encoder.encode_pipeline(&[
            vec![b"TYPE".to_vec(), b"a".to_vec()],
            vec![b"TYPE".to_vec(), b"\xff\xfe".to_vec()],
        ]);
        assert_eq!(
            encoder.as_bytes(),
            &b"*2\r\n$4\r\nTYPE\r\n$1\r\na\r\n*2\r\n$4\r\nTYPE\r\n$2\r\n\xff\xfe\r\n"[..]
        );
    }

    #[test]
    fn test_decode_scan_reply() {
        let data = b"*2\r\n$2\r\n17\r\n*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n";
        let value = decode_all(data, 1).unwrap().remove(0);
        let parts = value.as_array().unwrap();
        assert_eq!(parts[0].as_u64_lenient(), Some(17));
        assert_eq!(parts[1].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_decode_pipeline_mixed() {
        let values = decode_all(b"+string\r\n-ERR no such key\r\n:42\r\n$-1\r\n", 4).unwrap();
        assert_eq!(values[0], RespValue::SimpleString("string".to_string()));
        assert!(values[1].is_missing_key());
        assert_eq!(values[2].as_i64(), Some(42));
        assert!(values[3].is_null());
        assert!(values[3].is_missing_key());
    }

    #[test]
    fn test_decode_resp3_shapes() {
        let data = b"%1\r\n$2\r\nip\r\n$8\r\n10.0.0.2\r\n_\r\n#t\r\n";
        let values = decode_all(data, 3).unwrap();
        let row = values[0].as_array().unwrap();
        assert_eq!(row[0].as_str(), Some("ip"));
        assert_eq!(row[1].as_str(), Some("10.0.0.2"));
        assert!(values[1].is_null());
        assert_eq!(values[2], RespValue::Integer(1));
    }

    #[test]
    fn test_decode_lossy_key_name() {
        let value = decode_all(b"$3\r\nk\xffy\r\n", 1).unwrap().remove(0);
        assert_eq!(value.as_str(), None);
        assert_eq!(value.to_text().unwrap(), "k\u{fffd}y");
        assert_eq!(value.to_bytes().unwrap(), b"k\xffy".to_vec());
    }

    #[test]
    fn test_decode_truncated_stream() {
        assert!(decode_all(b"$10\r\nabc", 1).is_err());
        let err = decode_all(b"", 1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_decode_bad_framing() {
        let err = decode_all(b"?what\r\n", 1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        let err = decode_all(b"$3\r\nabcXY", 1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_decode_rejects_oversized_lengths() {
        let err = decode_all(b"$9999999999999\r\n", 1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        let err = decode_all(b"%9223372036854775807\r\n", 1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        let err = decode_all(b"*-2\r\n", 1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(decode_all(b"*-1\r\n", 1).unwrap()[0].is_null());
    }

    #[test]
    fn test_missing_key_only_for_benign_errors() {
        assert!(!RespValue::Error("WRONGTYPE Operation".to_string()).is_missing_key());
        assert!(!RespValue::Integer(0).is_missing_key());
        assert_eq!(RespValue::Integer(-1).as_u64_lenient(), None);
    }
}
