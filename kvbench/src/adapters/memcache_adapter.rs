//! Memcached adapter speaking the text protocol.
//!
//! Configuration: flags 0, no expiry, one connection per worker.

use super::conn::{self, Conn};
use super::KvClient;
use crate::config::Transport;
use crate::{BenchError, BenchResult, Phase};
use std::io::{self, BufRead, Write};

const NAME: &str = "memcache";

/// Replies that mean "the server refused this one request".
const ERROR_PREFIXES: [&[u8]; 3] = [b"SERVER_ERROR", b"CLIENT_ERROR", b"ERROR"];

fn is_error_line(line: &[u8]) -> bool {
    ERROR_PREFIXES.iter().any(|p| line.starts_with(p))
}

/// Parse the reply to a single-key `get`.
///
/// `Ok(Err(line))` is a server error line; the outer `Err` is a broken stream.
pub fn read_get_reply<R: BufRead>(r: &mut R) -> io::Result<Result<Option<Vec<u8>>, String>> {
    let line = conn::read_line(r)?;
    if line == b"END" {
        return Ok(Ok(None));
    }
    if is_error_line(&line) {
        return Ok(Err(String::from_utf8_lossy(&line).into_owned()));
    }
    if !line.starts_with(b"VALUE ") {
        return Err(conn::invalid_data(format!(
            "unexpected get reply: {}",
            String::from_utf8_lossy(&line)
        )));
    }

    // VALUE <key> <flags> <bytes> [<cas>]
    let header = String::from_utf8_lossy(&line).into_owned();
    let len: usize = header
        .split_ascii_whitespace()
        .nth(3)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| conn::invalid_data(format!("bad VALUE header: {}", header)))?;
    let value = conn::read_payload(r, len)?;
    let end = conn::read_line(r)?;
    if end != b"END" {
        return Err(conn::invalid_data("missing END after value"));
    }
    Ok(Ok(Some(value)))
}

/// Blocking memcached text-protocol client.
pub struct MemcacheClient {
    conn: Conn,
}

impl MemcacheClient {
    pub fn connect(transport: &Transport) -> BenchResult<Self> {
        let conn = Conn::connect(transport).map_err(|e| {
            BenchError::connection(
                Phase::Setup,
                format!("failed to connect to memcached at {}: {}", transport, e),
            )
        })?;
        Ok(Self { conn })
    }

    fn single_line(&mut self) -> BenchResult<Vec<u8>> {
        self.conn
            .flush_request()
            .map_err(|e| conn::broken(NAME, e))?;
        conn::read_line(self.conn.reader()).map_err(|e| conn::broken(NAME, e))
    }
}

impl KvClient for MemcacheClient {
    fn name(&self) -> &'static str {
        NAME
    }

    fn ping(&mut self) -> BenchResult<()> {
        self.conn.request().extend_from_slice(b"version\r\n");
        let line = self.single_line()?;
        if line.starts_with(b"VERSION") {
            Ok(())
        } else {
            Err(BenchError::Operation(format!(
                "version: {}",
                String::from_utf8_lossy(&line)
            )))
        }
    }

    fn set(&mut self, key: &str, value: &[u8]) -> BenchResult<()> {
        let out = self.conn.request();
        // Writing into a Vec cannot fail.
        let _ = write!(out, "set {} 0 0 {}\r\n", key, value.len());
        out.extend_from_slice(value);
        out.extend_from_slice(b"\r\n");

        let line = self.single_line()?;
        if line == b"STORED" {
            Ok(())
        } else {
            Err(BenchError::Operation(format!(
                "set {}: {}",
                key,
                String::from_utf8_lossy(&line)
            )))
        }
    }

    fn get(&mut self, key: &str) -> BenchResult<Option<Vec<u8>>> {
        let out = self.conn.request();
        let _ = write!(out, "get {}\r\n", key);
        self.conn
            .flush_request()
            .map_err(|e| conn::broken(NAME, e))?;
        match read_get_reply(self.conn.reader()).map_err(|e| conn::broken(NAME, e))? {
            Ok(v) => Ok(v),
            Err(line) => Err(BenchError::Operation(format!("get {}: {}", key, line))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(bytes: &[u8]) -> io::Result<Result<Option<Vec<u8>>, String>> {
        read_get_reply(&mut Cursor::new(bytes.to_vec()))
    }

    #[test]
    fn test_get_hit() {
        let v = parse(b"VALUE lol 0 3\r\nxxx\r\nEND\r\n").unwrap().unwrap();
        assert_eq!(v, Some(b"xxx".to_vec()));
        let v = parse(b"VALUE lol 0 3 99\r\nxxx\r\nEND\r\n").unwrap().unwrap();
        assert_eq!(v, Some(b"xxx".to_vec()));
    }

    #[test]
    fn test_get_miss() {
        assert_eq!(parse(b"END\r\n").unwrap().unwrap(), None);
    }

    #[test]
    fn test_get_server_error() {
        let err = parse(b"SERVER_ERROR out of memory\r\n").unwrap().unwrap_err();
        assert!(err.contains("out of memory"));
    }

    #[test]
    fn test_get_malformed() {
        assert!(parse(b"VALUE lol 0\r\n").is_err());
        assert!(parse(b"VALUE lol 0 3\r\nxxx\r\n").is_err());
        assert!(parse(b"HELLO\r\n").is_err());
    }

    #[test]
    fn test_get_rejects_huge_value_length() {
        let err = parse(b"VALUE lol 0 18446744073709551615\r\nxx\r\nEND\r\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        let err = parse(b"VALUE lol 0 9223372036854775000\r\nxx\r\nEND\r\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
