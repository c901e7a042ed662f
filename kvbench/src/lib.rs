//! Shared types, error handling and module wiring for kvbench.
//!
//! The harness is split the same way the data flows:
//!
//! ```text
//! run_benchmark ──► WorkerPool ──► N × OperationSource ──► Sample channel
//!                                                              │
//!       RunAggregator ◄── OpResult (stats) ◄── SampleCollector ◄┘
//! ```

pub mod adapters;
pub mod aggregate;
pub mod collector;
pub mod config;
pub mod pool;
pub mod report;
pub mod stats;

pub use adapters::{Attempt, Backend, KvClient, KvSource, OpPlanner, OperationSource};
pub use aggregate::{run_benchmark, Outcome, Ranked, RunAggregator, RunRecord};
pub use collector::SampleCollector;
pub use config::{Config, Criterion, DataSize, Protocol, Transport};
pub use pool::{RunStats, Slot, WorkerPool};
pub use stats::{LatencyRecorder, OpResult};

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

// ────────────────────────────────────────────────────────────────────────────────
// Error type
// ────────────────────────────────────────────────────────────────────────────────

pub type BenchResult<T> = std::result::Result<T, BenchError>;

/// Phase of a run in which a connection-level failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Connecting and pre-populating the backend, before any sample is taken.
    Setup,
    /// The measured part of the run.
    SteadyState,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Setup => write!(f, "setup"),
            Phase::SteadyState => write!(f, "steady-state"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    /// Invalid flags or ranges. Detected before the first run.
    #[error("configuration error: {0}")]
    Config(String),

    /// Backend unreachable or unusable. Fatal to the worker that hit it.
    #[error("connection error during {phase}: {message}")]
    Connection { phase: Phase, message: String },

    /// A single GET/SET failed. Counted, never fatal.
    #[error("operation failed: {0}")]
    Operation(String),

    #[error("only {started} of {requested} workers could be started: {source}")]
    Spawn {
        started: usize,
        requested: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("export error: {0}")]
    Export(String),
}

impl BenchError {
    pub fn connection(phase: Phase, message: impl Into<String>) -> Self {
        BenchError::Connection {
            phase,
            message: message.into(),
        }
    }

    /// Everything except a per-operation failure ends the worker.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BenchError::Operation(_))
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            BenchError::Connection { phase, .. } => Some(*phase),
            BenchError::Spawn { .. } => Some(Phase::Setup),
            _ => None,
        }
    }

    /// Re-tag a failure that happened while preparing a run.
    ///
    /// Any backend failure during setup means the run cannot be measured,
    /// so operation errors are promoted to setup connection errors.
    pub fn during_setup(self) -> Self {
        match self {
            BenchError::Connection { message, .. } | BenchError::Operation(message) => {
                BenchError::Connection {
                    phase: Phase::Setup,
                    message,
                }
            }
            other => other,
        }
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            BenchError::Config(_) => 2,
            _ => 1,
        }
    }
}

impl From<csv::Error> for BenchError {
    fn from(e: csv::Error) -> Self {
        BenchError::Export(e.to_string())
    }
}

impl From<serde_json::Error> for BenchError {
    fn from(e: serde_json::Error) -> Self {
        BenchError::Export(e.to_string())
    }
}

impl From<toml::de::Error> for BenchError {
    fn from(e: toml::de::Error) -> Self {
        BenchError::Config(e.to_string())
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Samples
// ────────────────────────────────────────────────────────────────────────────────

/// Logical operation name ("GET", "SET", ...). Static for the built-in
/// backends, owned only when a source invents its own names.
pub type OpName = Cow<'static, str>;

/// One measured operation attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub op: OpName,
    pub duration: Duration,
    pub failed: bool,
}

impl Sample {
    pub fn ok(op: impl Into<OpName>, duration: Duration) -> Self {
        Self {
            op: op.into(),
            duration,
            failed: false,
        }
    }

    pub fn failed(op: impl Into<OpName>, duration: Duration) -> Self {
        Self {
            op: op.into(),
            duration,
            failed: true,
        }
    }
}
