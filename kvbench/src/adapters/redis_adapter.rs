//! Redis adapter speaking RESP2 over a single blocking connection.

use super::conn::{self, Conn};
use super::KvClient;
use crate::config::Transport;
use crate::{BenchError, BenchResult, Phase};
use std::io::{self, BufRead};

const NAME: &str = "redis";

/// Maximum nesting accepted when parsing array replies.
const MAX_DEPTH: usize = 8;

/// A parsed RESP2 reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
    Array(Option<Vec<Reply>>),
}

/// Encode `args` as a RESP array of bulk strings.
pub fn encode_command(out: &mut Vec<u8>, args: &[&[u8]]) {
    out.push(b'*');
    out.extend_from_slice(args.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        out.push(b'$');
        out.extend_from_slice(arg.len().to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

pub fn read_reply<R: BufRead>(r: &mut R) -> io::Result<Reply> {
    read_reply_at(r, 0)
}

fn read_reply_at<R: BufRead>(r: &mut R, depth: usize) -> io::Result<Reply> {
    let line = conn::read_line(r)?;
    let (kind, rest) = match line.split_first() {
        Some((k, rest)) => (*k, rest),
        None => return Err(conn::invalid_data("empty RESP line")),
    };
    match kind {
        b'+' => Ok(Reply::Simple(String::from_utf8_lossy(rest).into_owned())),
        b'-' => Ok(Reply::Error(String::from_utf8_lossy(rest).into_owned())),
        b':' => parse_int(rest).map(Reply::Integer),
        b'$' => match parse_int(rest)? {
            -1 => Ok(Reply::Bulk(None)),
            n if n >= 0 => {
                let len = usize::try_from(n)
                    .map_err(|_| conn::invalid_data(format!("bad bulk length {}", n)))?;
                conn::read_payload(r, len).map(|v| Reply::Bulk(Some(v)))
            }
            n => Err(conn::invalid_data(format!("bad bulk length {}", n))),
        },
        b'*' => {
            if depth >= MAX_DEPTH {
                return Err(conn::invalid_data("RESP array nested too deeply"));
            }
            match parse_int(rest)? {
                -1 => Ok(Reply::Array(None)),
                n if n >= 0 => {
                    let items = (0..n)
                        .map(|_| read_reply_at(r, depth + 1))
                        .collect::<io::Result<Vec<_>>>()?;
                    Ok(Reply::Array(Some(items)))
                }
                n => Err(conn::invalid_data(format!("bad array length {}", n))),
            }
        }
        other => Err(conn::invalid_data(format!(
            "unknown RESP type byte {:?}",
            other as char
        ))),
    }
}

fn parse_int(bytes: &[u8]) -> io::Result<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| conn::invalid_data("bad RESP integer"))
}

/// Blocking RESP2 client.
pub struct RespClient {
    conn: Conn,
}

impl RespClient {
    pub fn connect(transport: &Transport) -> BenchResult<Self> {
        let conn = Conn::connect(transport).map_err(|e| {
            BenchError::connection(
                Phase::Setup,
                format!("failed to connect to redis at {}: {}", transport, e),
            )
        })?;
        Ok(Self { conn })
    }

    /// Send one command and wait for its reply. Error replies are returned as
    /// `Reply::Error`; only transport problems are `Err`.
    pub fn command(&mut self, args: &[&[u8]]) -> BenchResult<Reply> {
        encode_command(self.conn.request(), args);
        self.conn
            .flush_request()
            .map_err(|e| conn::broken(NAME, e))?;
        read_reply(self.conn.reader()).map_err(|e| conn::broken(NAME, e))
    }
}

fn unexpected(cmd: &str, reply: Reply) -> BenchError {
    match reply {
        Reply::Error(msg) => BenchError::Operation(format!("{}: {}", cmd, msg)),
        other => BenchError::Operation(format!("{}: unexpected reply {:?}", cmd, other)),
    }
}

impl KvClient for RespClient {
    fn name(&self) -> &'static str {
        NAME
    }

    fn ping(&mut self) -> BenchResult<()> {
        match self.command(&[b"PING"])? {
            Reply::Simple(_) | Reply::Bulk(Some(_)) => Ok(()),
            other => Err(unexpected("PING", other)),
        }
    }

    fn set(&mut self, key: &str, value: &[u8]) -> BenchResult<()> {
        match self.command(&[b"SET", key.as_bytes(), value])? {
            Reply::Simple(s) if s == "OK" => Ok(()),
            other => Err(unexpected("SET", other)),
        }
    }

    fn get(&mut self, key: &str) -> BenchResult<Option<Vec<u8>>> {
        match self.command(&[b"GET", key.as_bytes()])? {
            Reply::Bulk(v) => Ok(v),
            other => Err(unexpected("GET", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(bytes: &[u8]) -> io::Result<Reply> {
        read_reply(&mut Cursor::new(bytes.to_vec()))
    }

    #[test]
    fn test_encode_command() {
        let mut out = Vec::new();
        encode_command(&mut out, &[b"SET", b"lol", b"xx"]);
        assert_eq!(out, b"*3\r\n$3\r\nSET\r\n$3\r\nlol\r\n$2\r\nxx\r\n");
    }

    #[test]
    fn test_parse_scalars() {
        assert_eq!(parse(b"+OK\r\n").unwrap(), Reply::Simple("OK".into()));
        assert_eq!(
            parse(b"-ERR wrong type\r\n").unwrap(),
            Reply::Error("ERR wrong type".into())
        );
        assert_eq!(parse(b":42\r\n").unwrap(), Reply::Integer(42));
        assert_eq!(parse(b"$-1\r\n").unwrap(), Reply::Bulk(None));
        assert_eq!(parse(b"$0\r\n\r\n").unwrap(), Reply::Bulk(Some(vec![])));
        assert_eq!(
            parse(b"$5\r\nhello\r\n").unwrap(),
            Reply::Bulk(Some(b"hello".to_vec()))
        );
    }

    #[test]
    fn test_parse_array() {
        let reply = parse(b"*2\r\n$1\r\na\r\n:7\r\n").unwrap();
        assert_eq!(
            reply,
            Reply::Array(Some(vec![Reply::Bulk(Some(b"a".to_vec())), Reply::Integer(7)]))
        );
        assert_eq!(parse(b"*-1\r\n").unwrap(), Reply::Array(None));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse(b"?what\r\n").is_err());
        assert!(parse(b":abc\r\n").is_err());
        assert!(parse(b"$5\r\nhi\r\n").is_err());
        assert!(parse(b"$-7\r\n").is_err());
        assert!(parse(b"").is_err());
    }

    #[test]
    fn test_parse_rejects_huge_bulk_length() {
        let err = parse(b"$9223372036854775000\r\nxx\r\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        let err = parse(b"*1\r\n$9223372036854775807\r\nxx\r\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_error_reply_is_operation_error() {
        let e = unexpected("SET", Reply::Error("OOM command not allowed".into()));
        assert!(matches!(e, BenchError::Operation(_)));
        assert!(!e.is_fatal());
    }
}
