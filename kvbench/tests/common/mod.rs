//! In-process fake servers speaking just enough RESP2 / memcached text
//! protocol for the adapters: PING / version, SET, GET.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wire {
    Resp,
    Memcache,
}

#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Answer every n-th SET (counted server-wide, 1-based) with an error reply.
    pub fail_every_nth_set: Option<u64>,
    /// Hang up on any command past this server-wide count.
    pub close_after: Option<u64>,
}

#[derive(Debug, Default)]
pub struct State {
    pub store: Mutex<HashMap<String, Vec<u8>>>,
    pub commands: AtomicU64,
    pub sets: AtomicU64,
    pub gets: AtomicU64,
    pub pings: AtomicU64,
    pub connections: AtomicU64,
}

impl State {
    pub fn sets(&self) -> u64 {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.store.lock().get(key).cloned()
    }
}

pub struct FakeServer {
    pub port: u16,
    pub state: Arc<State>,
}

impl FakeServer {
    pub fn start(wire: Wire) -> Self {
        Self::with_faults(wire, Faults::default())
    }

    pub fn with_faults(wire: Wire, faults: Faults) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(State::default());
        let shared = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let _ = stream.set_nodelay(true);
                spawn_session(wire, stream, &shared, &faults);
            }
        });
        Self { port, state }
    }

    #[cfg(unix)]
    pub fn start_unix(wire: Wire, path: &std::path::Path) -> Arc<State> {
        let listener = std::os::unix::net::UnixListener::bind(path).unwrap();
        let state = Arc::new(State::default());
        let shared = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                spawn_session(wire, stream, &shared, &Faults::default());
            }
        });
        state
    }
}

/// A port nothing listens on.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn spawn_session<S>(wire: Wire, stream: S, state: &Arc<State>, faults: &Faults)
where
    S: Read + Write + Send + 'static,
{
    state.connections.fetch_add(1, Ordering::SeqCst);
    let state = Arc::clone(state);
    let faults = faults.clone();
    thread::spawn(move || {
        let _ = serve(wire, stream, &state, &faults);
    });
}

enum Command {
    Ping,
    Set(String, Vec<u8>),
    Get(String),
    Unknown(String),
}

fn serve<S: Read + Write>(wire: Wire, stream: S, state: &State, faults: &Faults) -> io::Result<()> {
    let mut reader = BufReader::new(stream);
    loop {
        let cmd = match wire {
            Wire::Resp => read_resp_command(&mut reader)?,
            Wire::Memcache => read_memcache_command(&mut reader)?,
        };
        let Some(cmd) = cmd else { return Ok(()) };

        let n = state.commands.fetch_add(1, Ordering::SeqCst) + 1;
        if faults.close_after.map_or(false, |limit| n > limit) {
            return Ok(());
        }

        let reply = handle(wire, cmd, state, faults);
        reader.get_mut().write_all(&reply)?;
        reader.get_mut().flush()?;
    }
}

fn handle(wire: Wire, cmd: Command, state: &State, faults: &Faults) -> Vec<u8> {
    match cmd {
        Command::Ping => {
            state.pings.fetch_add(1, Ordering::SeqCst);
            match wire {
                Wire::Resp => b"+PONG\r\n".to_vec(),
                Wire::Memcache => b"VERSION 1.6.21\r\n".to_vec(),
            }
        }
        Command::Set(key, value) => {
            let n = state.sets.fetch_add(1, Ordering::SeqCst) + 1;
            if faults.fail_every_nth_set.map_or(false, |k| n % k == 0) {
                return match wire {
                    Wire::Resp => b"-ERR injected failure\r\n".to_vec(),
                    Wire::Memcache => b"SERVER_ERROR injected failure\r\n".to_vec(),
                };
            }
            state.store.lock().insert(key, value);
            match wire {
                Wire::Resp => b"+OK\r\n".to_vec(),
                Wire::Memcache => b"STORED\r\n".to_vec(),
            }
        }
        Command::Get(key) => {
            state.gets.fetch_add(1, Ordering::SeqCst);
            let value = state.store.lock().get(&key).cloned();
            let mut out = Vec::new();
            match (wire, value) {
                (Wire::Resp, Some(v)) => {
                    out.extend_from_slice(format!("${}\r\n", v.len()).as_bytes());
                    out.extend_from_slice(&v);
                    out.extend_from_slice(b"\r\n");
                }
                (Wire::Resp, None) => out.extend_from_slice(b"$-1\r\n"),
                (Wire::Memcache, Some(v)) => {
                    out.extend_from_slice(format!("VALUE {} 0 {}\r\n", key, v.len()).as_bytes());
                    out.extend_from_slice(&v);
                    out.extend_from_slice(b"\r\nEND\r\n");
                }
                (Wire::Memcache, None) => out.extend_from_slice(b"END\r\n"),
            }
            out
        }
        Command::Unknown(name) => match wire {
            Wire::Resp => format!("-ERR unknown command '{}'\r\n", name).into_bytes(),
            Wire::Memcache => b"ERROR\r\n".to_vec(),
        },
    }
}

/// `None` on a clean EOF between commands.
fn read_line<R: BufRead>(r: &mut R) -> io::Result<Option<String>> {
    let mut line = String::new();
    if r.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

fn read_block<R: BufRead>(r: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len + 2];
    r.read_exact(&mut buf)?;
    buf.truncate(len);
    Ok(buf)
}

fn bad(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

fn read_resp_command<R: BufRead>(r: &mut R) -> io::Result<Option<Command>> {
    let Some(header) = read_line(r)? else { return Ok(None) };
    let argc: usize = header
        .strip_prefix('*')
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| bad("expected array"))?;

    let mut args = Vec::with_capacity(argc);
    for _ in 0..argc {
        let line = read_line(r)?.ok_or_else(|| bad("eof in command"))?;
        let len: usize = line
            .strip_prefix('$')
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| bad("expected bulk string"))?;
        args.push(read_block(r, len)?);
    }

    let text = |i: usize| String::from_utf8_lossy(&args[i]).into_owned();
    let name = text(0).to_ascii_uppercase();
    Ok(Some(match (name.as_str(), args.len()) {
        ("PING", _) => Command::Ping,
        ("SET", 3) => Command::Set(text(1), args[2].clone()),
        ("GET", 2) => Command::Get(text(1)),
        _ => Command::Unknown(name),
    }))
}

fn read_memcache_command<R: BufRead>(r: &mut R) -> io::Result<Option<Command>> {
    let Some(line) = read_line(r)? else { return Ok(None) };
    let parts: Vec<&str> = line.split_ascii_whitespace().collect();
    Ok(Some(match parts.as_slice() {
        ["version"] => Command::Ping,
        ["get", key] => Command::Get(key.to_string()),
        ["set", key, _flags, _exptime, len] => {
            let len: usize = len.parse().map_err(|_| bad("bad set length"))?;
            Command::Set(key.to_string(), read_block(r, len)?)
        }
        _ => Command::Unknown(line.clone()),
    }))
}
