//! Benchmark configuration: value types, parsing, validation and TOML loading.

use crate::{BenchError, BenchResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Pause between two runs so the backend can settle.
pub const DEFAULT_SETTLE_MS: u64 = 1_000;

/// Largest value the harness writes or accepts in a reply (redis'
/// default `proto-max-bulk-len`).
pub const MAX_VALUE_BYTES: usize = 512 * 1024 * 1024;

// ────────────────────────────────────────────────────────────────────────────────
// Protocol / criterion
// ────────────────────────────────────────────────────────────────────────────────

/// Backend wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Redis,
    Memcache,
}

impl Default for Protocol {
    fn default() -> Self {
        Self::Redis
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Redis => write!(f, "redis"),
            Self::Memcache => write!(f, "memcache"),
        }
    }
}

impl FromStr for Protocol {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memcache" | "memcached" => Ok(Self::Memcache),
            other => Err(BenchError::Config(format!("unknown protocol: {}", other))),
        }
    }
}

/// Metric used to pick the best and worst run per operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Criterion {
    /// Lower p99 latency is better.
    P99,
    /// Higher ops/sec is better.
    Throughput,
}

impl Default for Criterion {
    fn default() -> Self {
        Self::P99
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::P99 => write!(f, "p99"),
            Self::Throughput => write!(f, "throughput"),
        }
    }
}

impl FromStr for Criterion {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "p99" => Ok(Self::P99),
            "throughput" | "opsps" => Ok(Self::Throughput),
            other => Err(BenchError::Config(format!("unknown criterion: {}", other))),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Payload size
// ────────────────────────────────────────────────────────────────────────────────

/// Size of written values: `N` bytes, or uniform in `MIN-MAX` (inclusive).
///
/// `Fixed(0)` disables writes entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DataSize {
    Fixed(usize),
    Range { min: usize, max: usize },
}

impl DataSize {
    pub fn writes_enabled(&self) -> bool {
        !matches!(self, DataSize::Fixed(0))
    }

    /// Upper bound of a written value.
    pub fn max(&self) -> usize {
        match *self {
            DataSize::Fixed(n) => n,
            DataSize::Range { max, .. } => max,
        }
    }

    /// Bytes per operation used for KB/s and Gb/s estimates.
    ///
    /// With a range this is the upper bound, not the size actually sent, so
    /// bandwidth figures for ranged payloads are an over-estimate.
    pub fn bandwidth_bytes(&self) -> usize {
        self.max()
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        match *self {
            DataSize::Fixed(n) => n,
            DataSize::Range { min, max } => rng.gen_range(min..=max),
        }
    }
}

impl Default for DataSize {
    fn default() -> Self {
        DataSize::Fixed(32)
    }
}

impl fmt::Display for DataSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSize::Fixed(n) => write!(f, "{}", n),
            DataSize::Range { min, max } => write!(f, "{}-{}", min, max),
        }
    }
}

impl FromStr for DataSize {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || BenchError::Config(format!("malformed data size '{}': expected N or MIN-MAX", s));
        let s = s.trim();
        match s.split_once('-') {
            None => s.parse().map(DataSize::Fixed).map_err(|_| bad()),
            Some((lo, hi)) => {
                let min: usize = lo.trim().parse().map_err(|_| bad())?;
                let max: usize = hi.trim().parse().map_err(|_| bad())?;
                if min > max {
                    return Err(BenchError::Config(format!(
                        "data size range {}-{} has min > max",
                        min, max
                    )));
                }
                if min == max {
                    Ok(DataSize::Fixed(min))
                } else {
                    Ok(DataSize::Range { min, max })
                }
            }
        }
    }
}

impl TryFrom<String> for DataSize {
    type Error = BenchError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DataSize> for String {
    fn from(d: DataSize) -> Self {
        d.to_string()
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Transport
// ────────────────────────────────────────────────────────────────────────────────

/// How to reach the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            Transport::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Config
// ────────────────────────────────────────────────────────────────────────────────

/// Complete benchmark configuration. Immutable once a benchmark starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of full benchmark executions.
    pub runs: usize,
    /// Operations per worker per run.
    pub iterations: usize,
    /// Number of workers running in parallel.
    pub concurrency: usize,
    /// Probability that an operation is a write.
    pub ratio: f64,
    /// Fixed key, or key prefix when `key_range > 0`.
    pub key: String,
    /// Number of distinct keys; 0 means always use `key`.
    pub key_range: u64,
    pub data: DataSize,
    pub server: String,
    pub port: u16,
    /// Unix domain socket; overrides `server`/`port` when set.
    pub socket: Option<PathBuf>,
    pub protocol: Protocol,
    pub criterion: Criterion,
    /// Base RNG seed. Workers derive their own seeds from it.
    pub seed: Option<u64>,
    pub settle_ms: u64,
    /// Directory for percentile distribution dumps.
    pub out_dir: Option<PathBuf>,
    /// Directory for CSV + JSON exports.
    pub export: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runs: 3,
            iterations: 1_000,
            concurrency: 1,
            ratio: 0.1,
            key: "lol".to_string(),
            key_range: 0,
            data: DataSize::default(),
            server: "127.0.0.1".to_string(),
            port: 6379,
            socket: None,
            protocol: Protocol::default(),
            criterion: Criterion::default(),
            seed: None,
            settle_ms: DEFAULT_SETTLE_MS,
            out_dir: None,
            export: None,
        }
    }
}

impl Config {
    /// Load a configuration from a TOML file. Missing keys take defaults.
    pub fn load_toml(path: &Path) -> BenchResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            BenchError::Config(format!("failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> BenchResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> BenchResult<()> {
        if !(0.0..=1.0).contains(&self.ratio) || self.ratio.is_nan() {
            return Err(BenchError::Config(format!(
                "ratio must be within [0, 1], got {}",
                self.ratio
            )));
        }
        if self.runs == 0 {
            return Err(BenchError::Config("runs must be at least 1".into()));
        }
        if self.iterations == 0 {
            return Err(BenchError::Config("iterations must be at least 1".into()));
        }
        if self.concurrency == 0 {
            return Err(BenchError::Config("concurrency must be at least 1".into()));
        }
        if self.key.is_empty() {
            return Err(BenchError::Config("key must not be empty".into()));
        }
        if let DataSize::Range { min, max } = self.data {
            if min > max {
                return Err(BenchError::Config(format!(
                    "data size range {}-{} has min > max",
                    min, max
                )));
            }
        }
        if self.data.max() > MAX_VALUE_BYTES {
            return Err(BenchError::Config(format!(
                "data size {} exceeds the {} byte value limit",
                self.data, MAX_VALUE_BYTES
            )));
        }
        Ok(())
    }

    pub fn writes_enabled(&self) -> bool {
        self.data.writes_enabled()
    }

    pub fn transport(&self) -> Transport {
        match &self.socket {
            Some(path) => Transport::Unix(path.clone()),
            None => Transport::Tcp {
                host: self.server.clone(),
                port: self.port,
            },
        }
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Total operations issued by one run.
    pub fn ops_per_run(&self) -> usize {
        self.iterations.saturating_mul(self.concurrency)
    }
}
