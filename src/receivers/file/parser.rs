// SPDX-License-Identifier: Apache-2.0

use serde_json::Value;

use crate::event::Event;
use crate::receivers::file::error::{Error, Result};

/// Drop anything ahead of the first `{`, such as the timestamp and stream
/// prefix a container runtime writes in front of each line. Lines without
/// a `{` are returned unchanged.
pub fn strip_prefix(line: &[u8]) -> &[u8] {
    match line.iter().position(|b| *b == b'{') {
        Some(idx) => &line[idx..],
        None => line,
    }
}

/// Parse one log line into an event. The line must hold a JSON object once
/// its prefix is stripped; trailing line terminators are ignored. Bytes that
/// are not valid UTF-8 become U+FFFD instead of failing the line.
pub fn parse_line(line: &[u8]) -> Result<Event> {
    let body = strip_prefix(line).trim_ascii_end();

    let value: Value = match std::str::from_utf8(body) {
        Ok(text) => serde_json::from_str(text)?,
        Err(_) => serde_json::from_str(&String::from_utf8_lossy(body))?,
    };
    Event::try_from(value)
        .map_err(|_| Error::Parse("JSON must be an object at the top level".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let event = parse_line(b"{\"msg\":\"hello world\",\"level\":\"info\"}\n").unwrap();
        assert_eq!(Some(&Value::from("hello world")), event.get("msg"));
        assert_eq!(Some(&Value::from("info")), event.get("level"));
    }

    #[test]
    fn test_parse_with_runtime_prefix() {
        let line = b"2024-05-01T10:00:00.000000000Z stdout F {\"msg\":\"hi\"}\r\n";
        let event = parse_line(line).unwrap();
        assert_eq!(Some(&Value::from("hi")), event.get("msg"));
    }

    #[test]
    fn test_parse_invalid_utf8_is_replaced() {
        let event = parse_line(b"{\"msg\":\"bad \xff byte\"}\n").unwrap();
        assert_eq!(Some(&Value::from("bad \u{FFFD} byte")), event.get("msg"));

        assert!(matches!(parse_line(b"\xff not json\n"), Err(Error::Json(_))));
    }

    #[test]
    fn test_strip_prefix() {
        assert_eq!(b"{\"a\":1}", strip_prefix(b"xx {\"a\":1}"));
        assert_eq!(b"no braces", strip_prefix(b"no braces"));
    }

    #[test]
    fn test_parse_failures() {
        assert!(matches!(parse_line(b"INVALID JSON LINE\n"), Err(Error::Json(_))));
        assert!(matches!(parse_line(b"{\"msg\": \n"), Err(Error::Json(_))));
        assert!(parse_line(b"\n").is_err());
        assert!(matches!(parse_line(b"[1,2]\n"), Err(Error::Parse(_))));
    }
}
