//! Sample collector: folds the sample stream into per-operation recorders.
//!
//! The collector is owned by the single thread draining the pool's channel,
//! so it needs no synchronization of its own.

use crate::aggregate::RunRecord;
use crate::stats::{LatencyRecorder, OpResult};
use crate::{OpName, Sample};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct SampleCollector {
    groups: HashMap<OpName, LatencyRecorder>,
    received: u64,
}

impl SampleCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one sample. New operation names open a new group.
    pub fn record(&mut self, sample: Sample) {
        let rec = self.groups.entry(sample.op).or_default();
        if sample.failed {
            rec.record_error();
        } else {
            rec.record(sample.duration);
        }
        self.received += 1;
    }

    /// Samples seen so far, failed ones included.
    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn get(&self, op: &str) -> Option<&LatencyRecorder> {
        self.groups.get(op)
    }

    pub fn operations(&self) -> impl Iterator<Item = (&str, &LatencyRecorder)> {
        self.groups.iter().map(|(op, rec)| (op.as_ref(), rec))
    }

    /// Successful plus failed samples recorded for `op`.
    pub fn count(&self, op: &str) -> u64 {
        self.get(op).map(|r| r.ops() + r.errors()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.received == 0
    }

    /// Turn every group into its final statistics.
    ///
    /// Operations that only ever failed still get a (degenerate) result.
    pub fn into_record(self, payload_bytes: usize) -> RunRecord {
        self.groups
            .into_iter()
            .map(|(op, rec)| {
                let op = op.into_owned();
                let result = OpResult::from_recorder(op.clone(), rec, payload_bytes);
                (op, result)
            })
            .collect()
    }
}
