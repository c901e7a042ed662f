//! Blocking stream connection shared by the text protocols.

use crate::config::{Transport, MAX_VALUE_BYTES};
use crate::{BenchError, Phase};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::net::UnixStream;

enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Stream::Unix(s) => s.flush(),
        }
    }
}

/// A request/response connection: requests are assembled in one buffer and
/// written at once, replies are read through a buffered reader.
pub struct Conn {
    reader: BufReader<Stream>,
    out: Vec<u8>,
}

impl Conn {
    pub fn connect(transport: &Transport) -> io::Result<Self> {
        let stream = match transport {
            Transport::Tcp { host, port } => {
                let s = TcpStream::connect((host.as_str(), *port))?;
                s.set_nodelay(true)?;
                Stream::Tcp(s)
            }
            #[cfg(unix)]
            Transport::Unix(path) => Stream::Unix(UnixStream::connect(path)?),
            #[cfg(not(unix))]
            Transport::Unix(path) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("unix sockets are not supported here: {}", path.display()),
                ))
            }
        };
        Ok(Self {
            reader: BufReader::with_capacity(64 * 1024, stream),
            out: Vec::with_capacity(1024),
        })
    }

    /// Request buffer, cleared. Fill it, then call [`Conn::flush_request`].
    pub fn request(&mut self) -> &mut Vec<u8> {
        self.out.clear();
        &mut self.out
    }

    pub fn flush_request(&mut self) -> io::Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(&self.out)?;
        stream.flush()
    }

    pub fn reader(&mut self) -> &mut impl BufRead {
        &mut self.reader
    }
}

/// Read one CRLF-terminated line, without the terminator.
pub fn read_line<R: BufRead>(r: &mut R) -> io::Result<Vec<u8>> {
    let mut line = Vec::new();
    let n = r.read_until(b'\n', &mut line)?;
    if n == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed by peer",
        ));
    }
    if !line.ends_with(b"\r\n") {
        return Err(invalid_data("line not terminated by CRLF"));
    }
    line.truncate(line.len() - 2);
    Ok(line)
}

/// Read a `len`-byte payload followed by CRLF.
///
/// Lengths above [`MAX_VALUE_BYTES`] are rejected before anything is
/// allocated, and the buffer only grows as bytes actually arrive.
pub fn read_payload<R: BufRead>(r: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let framed = match len.checked_add(2) {
        Some(n) if len <= MAX_VALUE_BYTES => n,
        _ => {
            return Err(invalid_data(format!(
                "payload length {} exceeds limit of {} bytes",
                len, MAX_VALUE_BYTES
            )))
        }
    };
    let mut buf = Vec::with_capacity(framed.min(64 * 1024));
    r.take(framed as u64).read_to_end(&mut buf)?;
    if buf.len() != framed {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("payload truncated: {} of {} bytes", buf.len(), framed),
        ));
    }
    if &buf[len..] != b"\r\n" {
        return Err(invalid_data("payload not terminated by CRLF"));
    }
    buf.truncate(len);
    Ok(buf)
}

pub fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Socket failures and unparseable replies leave the stream unusable.
pub fn broken(backend: &str, e: io::Error) -> BenchError {
    BenchError::connection(Phase::SteadyState, format!("{}: {}", backend, e))
}
