//! Backend adapters.
//!
//! Every backend speaks the small [`KvClient`] surface (ping / set / get).
//! [`KvSource`] wraps a client with an [`OpPlanner`] and turns it into an
//! [`OperationSource`], the only thing the worker pool knows about. The
//! protocol is picked once, at configuration time, through [`Backend`].

pub mod conn;
pub mod memcache_adapter;
pub mod redis_adapter;

use crate::config::{Config, Protocol};
use crate::pool::Slot;
use crate::{BenchError, BenchResult, OpName, Sample};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};

use memcache_adapter::MemcacheClient;
use redis_adapter::RespClient;

pub const OP_GET: &str = "GET";
pub const OP_SET: &str = "SET";

// ────────────────────────────────────────────────────────────────────────────────
// Operation source contract
// ────────────────────────────────────────────────────────────────────────────────

/// Outcome of one timed operation.
#[derive(Debug)]
pub struct Attempt {
    pub op: OpName,
    pub duration: Duration,
    pub error: Option<BenchError>,
}

impl Attempt {
    pub fn new(op: impl Into<OpName>, duration: Duration, error: Option<BenchError>) -> Self {
        Self {
            op: op.into(),
            duration,
            error,
        }
    }

    pub fn ok(op: impl Into<OpName>, duration: Duration) -> Self {
        Self::new(op, duration, None)
    }

    /// Classify the attempt: a sample (failed or not), or a fatal error that
    /// makes the source unusable.
    pub fn into_sample(self) -> Result<Sample, BenchError> {
        match self.error {
            None => Ok(Sample::ok(self.op, self.duration)),
            Some(e) if e.is_fatal() => Err(e),
            Some(_) => Ok(Sample::failed(self.op, self.duration)),
        }
    }
}

/// Something that can perform timed operations against a backend.
///
/// Instances are owned by exactly one worker and never shared.
pub trait OperationSource: Send {
    /// Pre-populate the backend. Not timed.
    fn initialize(&mut self) -> BenchResult<()>;

    /// Execute one operation. Only the backend call itself is timed.
    fn perform_one(&mut self) -> Attempt;
}

/// Minimal key-value client surface every protocol adapter implements.
pub trait KvClient: Send {
    fn name(&self) -> &'static str;

    fn ping(&mut self) -> BenchResult<()>;
    fn set(&mut self, key: &str, value: &[u8]) -> BenchResult<()>;
    fn get(&mut self, key: &str) -> BenchResult<Option<Vec<u8>>>;
}

// ────────────────────────────────────────────────────────────────────────────────
// Operation planner (per-worker, seeded)
// ────────────────────────────────────────────────────────────────────────────────

/// Next operation chosen by the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedOp {
    Get { key: String },
    Set { key: String, size: usize },
}

impl PlannedOp {
    pub fn name(&self) -> &'static str {
        match self {
            PlannedOp::Get { .. } => OP_GET,
            PlannedOp::Set { .. } => OP_SET,
        }
    }
}

/// Chooses operation kind, key and value size from the shared config with a
/// worker-owned RNG.
pub struct OpPlanner {
    config: Arc<Config>,
    rng: ChaCha8Rng,
    payload: Vec<u8>,
}

impl OpPlanner {
    pub fn new(config: Arc<Config>, seed: u64) -> Self {
        let payload = vec![b'x'; config.data.max()];
        Self {
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
            payload,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn next_op(&mut self) -> PlannedOp {
        let roll: f64 = self.rng.gen();
        let key = self.key();
        if self.config.writes_enabled() && roll < self.config.ratio {
            let size = self.value_size();
            PlannedOp::Set { key, size }
        } else {
            PlannedOp::Get { key }
        }
    }

    /// A key drawn uniformly from the key range, or the fixed key.
    pub fn key(&mut self) -> String {
        match self.config.key_range {
            0 => self.config.key.clone(),
            range => {
                let i = self.rng.gen_range(0..range);
                self.key_at(i)
            }
        }
    }

    pub fn key_at(&self, i: u64) -> String {
        format!("{}-{}", self.config.key, i)
    }

    pub fn value_size(&mut self) -> usize {
        self.config.data.sample(&mut self.rng)
    }

    /// A `size`-byte value. Borrowed from a buffer built once per planner.
    pub fn payload(&self, size: usize) -> &[u8] {
        &self.payload[..size.min(self.payload.len())]
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// KvSource: planner + client
// ────────────────────────────────────────────────────────────────────────────────

pub struct KvSource<C> {
    client: C,
    planner: OpPlanner,
}

impl<C: KvClient> KvSource<C> {
    pub fn new(client: C, planner: OpPlanner) -> Self {
        Self { client, planner }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }
}

impl<C: KvClient> OperationSource for KvSource<C> {
    fn initialize(&mut self) -> BenchResult<()> {
        let cfg = self.planner.config();
        if !cfg.writes_enabled() {
            return self.client.ping().map_err(BenchError::during_setup);
        }

        let key_range = cfg.key_range;
        if key_range == 0 {
            let key = cfg.key.clone();
            let size = self.planner.value_size();
            let value = self.planner.payload(size);
            self.client.set(&key, value).map_err(BenchError::during_setup)?;
            let stored = self.client.get(&key).map_err(BenchError::during_setup)?;
            if stored.as_deref() != Some(value) {
                return Err(BenchError::connection(
                    crate::Phase::Setup,
                    format!(
                        "{}: seeded value for '{}' did not read back ({} bytes written, {} read)",
                        self.client.name(),
                        key,
                        value.len(),
                        stored.map(|v| v.len()).unwrap_or(0)
                    ),
                ));
            }
            return Ok(());
        }

        for i in 0..key_range {
            let key = self.planner.key_at(i);
            let size = self.planner.value_size();
            self.client
                .set(&key, self.planner.payload(size))
                .map_err(BenchError::during_setup)?;
        }
        tracing::debug!(backend = self.client.name(), keys = key_range, "seeded key range");
        Ok(())
    }

    fn perform_one(&mut self) -> Attempt {
        let planned = self.planner.next_op();
        let op = planned.name();
        match planned {
            PlannedOp::Get { key } => {
                let start = Instant::now();
                let res = self.client.get(&key);
                let elapsed = start.elapsed();
                Attempt::new(op, elapsed, res.err())
            }
            PlannedOp::Set { key, size } => {
                let value = self.planner.payload(size);
                let start = Instant::now();
                let res = self.client.set(&key, value);
                let elapsed = start.elapsed();
                Attempt::new(op, elapsed, res.err())
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Backend: the tagged protocol choice
// ────────────────────────────────────────────────────────────────────────────────

pub enum Backend {
    Redis(KvSource<RespClient>),
    Memcache(KvSource<MemcacheClient>),
}

impl Backend {
    /// Connect a fresh source for `slot`. Connection failures are setup
    /// errors: the source never produced a sample.
    pub fn connect(config: &Arc<Config>, slot: Slot) -> BenchResult<Self> {
        let seed = slot.seed(config.seed.unwrap_or(0));
        let planner = OpPlanner::new(Arc::clone(config), seed);
        let transport = config.transport();
        let backend = match config.protocol {
            Protocol::Redis => {
                let client = RespClient::connect(&transport).map_err(BenchError::during_setup)?;
                Backend::Redis(KvSource::new(client, planner))
            }
            Protocol::Memcache => {
                let client =
                    MemcacheClient::connect(&transport).map_err(BenchError::during_setup)?;
                Backend::Memcache(KvSource::new(client, planner))
            }
        };
        Ok(backend)
    }

    /// Factory for the worker pool.
    pub fn factory(config: Arc<Config>) -> impl Fn(Slot) -> BenchResult<Backend> + Sync {
        move |slot| Backend::connect(&config, slot)
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Backend::Redis(_) => Protocol::Redis,
            Backend::Memcache(_) => Protocol::Memcache,
        }
    }
}

impl OperationSource for Backend {
    fn initialize(&mut self) -> BenchResult<()> {
        match self {
            Backend::Redis(s) => s.initialize(),
            Backend::Memcache(s) => s.initialize(),
        }
    }

    fn perform_one(&mut self) -> Attempt {
        match self {
            Backend::Redis(s) => s.perform_one(),
            Backend::Memcache(s) => s.perform_one(),
        }
    }
}
