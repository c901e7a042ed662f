//! Run aggregation: repeat the benchmark and keep the best and worst result
//! per operation.

use crate::adapters::OperationSource;
use crate::config::{Config, Criterion};
use crate::pool::{Slot, WorkerPool};
use crate::stats::OpResult;
use crate::BenchResult;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

/// Per-operation results of one run, keyed by operation name.
pub type RunRecord = BTreeMap<String, OpResult>;

impl Criterion {
    /// `true` if `a` is strictly better than `b`.
    ///
    /// A result with recorded time always beats one without; two results
    /// without recorded time are never better than each other.
    pub fn better(&self, a: &OpResult, b: &OpResult) -> bool {
        match (a.degenerate, b.degenerate) {
            (false, true) => return true,
            (true, _) => return false,
            (false, false) => {}
        }
        match self {
            Criterion::P99 => a.p99 < b.p99,
            Criterion::Throughput => a.ops_per_sec > b.ops_per_sec,
        }
    }
}

/// A retained result and the 1-based run that produced it.
#[derive(Debug, Clone)]
pub struct Ranked {
    pub run: usize,
    pub result: Arc<OpResult>,
}

/// Running best/worst per operation. Holds one entry per operation in each
/// map, however many runs are observed.
#[derive(Debug)]
pub struct RunAggregator {
    criterion: Criterion,
    runs: usize,
    best: BTreeMap<String, Ranked>,
    worst: BTreeMap<String, Ranked>,
}

impl RunAggregator {
    pub fn new(criterion: Criterion) -> Self {
        Self {
            criterion,
            runs: 0,
            best: BTreeMap::new(),
            worst: BTreeMap::new(),
        }
    }

    pub fn criterion(&self) -> Criterion {
        self.criterion
    }

    /// Fold the results of run `run` into the standings.
    ///
    /// Ties keep the earlier run. Operations missing from `record` keep
    /// whatever they had.
    pub fn observe(&mut self, run: usize, record: RunRecord) {
        self.runs += 1;
        for (op, result) in record {
            let ranked = Ranked {
                run,
                result: Arc::new(result),
            };
            if !self.best.contains_key(&op) {
                self.best.insert(op.clone(), ranked.clone());
                self.worst.insert(op, ranked);
                continue;
            }
            if let Some(best) = self.best.get_mut(&op) {
                if self.criterion.better(&ranked.result, &best.result) {
                    *best = ranked.clone();
                }
            }
            if let Some(worst) = self.worst.get_mut(&op) {
                if self.criterion.better(&worst.result, &ranked.result) {
                    *worst = ranked;
                }
            }
        }
    }

    pub fn best(&self, op: &str) -> Option<&Ranked> {
        self.best.get(op)
    }

    pub fn worst(&self, op: &str) -> Option<&Ranked> {
        self.worst.get(op)
    }

    pub fn into_outcome(self) -> Outcome {
        Outcome {
            criterion: self.criterion,
            runs: self.runs,
            best: self.best,
            worst: self.worst,
        }
    }
}

/// Final standings after all runs.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub criterion: Criterion,
    /// Runs that completed and were observed.
    pub runs: usize,
    pub best: BTreeMap<String, Ranked>,
    pub worst: BTreeMap<String, Ranked>,
}

impl Outcome {
    /// Operation names, sorted.
    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.best.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.best.is_empty()
    }
}

/// Execute `config.runs` runs and return the best/worst standings.
///
/// The first fatal run error ends the benchmark.
pub fn run_benchmark<S, F>(config: Arc<Config>, factory: F) -> BenchResult<Outcome>
where
    S: OperationSource,
    F: Fn(Slot) -> BenchResult<S> + Sync,
{
    let runs = config.runs;
    let settle = config.settle();
    let payload = config.data.bandwidth_bytes();
    let mut aggregator = RunAggregator::new(config.criterion);
    let pool = WorkerPool::new(Arc::clone(&config), factory);

    for run in 1..=runs {
        info!(run, runs, "RUN {}/{}", run, runs);
        let stats = pool.run(run)?;
        let record = stats.collector.into_record(payload);
        for (op, result) in &record {
            if result.degenerate {
                warn!(run, op = %op, errors = result.errors, "no successful operations");
            } else {
                info!(run, op = %op, "{}", result);
            }
        }
        info!(
            run,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            workers = stats.workers,
            "run finished"
        );
        aggregator.observe(run, record);

        if run < runs && !settle.is_zero() {
            thread::sleep(settle);
        }
    }

    Ok(aggregator.into_outcome())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::LatencyRecorder;
    use std::time::Duration;

    fn result(op: &str, latency: Duration, n: usize) -> OpResult {
        let mut rec = LatencyRecorder::new();
        for _ in 0..n {
            rec.record(latency);
        }
        OpResult::from_recorder(op, rec, 32)
    }

    fn record(entries: &[(&str, Duration)]) -> RunRecord {
        entries
            .iter()
            .map(|(op, d)| (op.to_string(), result(op, *d, 100)))
            .collect()
    }

    fn degenerate(op: &str) -> OpResult {
        let mut rec = LatencyRecorder::new();
        rec.record_error();
        OpResult::from_recorder(op, rec, 32)
    }

    #[test]
    fn test_lower_p99_wins() {
        let mut agg = RunAggregator::new(Criterion::P99);
        for (run, ms) in [(1, 5), (2, 1), (3, 3)] {
            agg.observe(run, record(&[("GET", Duration::from_millis(ms))]));
        }
        assert_eq!(agg.best("GET").unwrap().run, 2);
        assert_eq!(agg.worst("GET").unwrap().run, 1);
        assert_eq!(agg.best("GET").unwrap().result.p99, Duration::from_millis(1));
    }

    #[test]
    fn test_higher_throughput_wins() {
        let mut agg = RunAggregator::new(Criterion::Throughput);
        for (run, ms) in [(1, 5), (2, 1), (3, 3)] {
            agg.observe(run, record(&[("GET", Duration::from_millis(ms))]));
        }
        // Faster calls mean more ops per second of recorded time.
        assert_eq!(agg.best("GET").unwrap().run, 2);
        assert_eq!(agg.worst("GET").unwrap().run, 1);
    }

    #[test]
    fn test_ties_keep_earlier_run() {
        let mut agg = RunAggregator::new(Criterion::P99);
        for run in 1..=3 {
            agg.observe(run, record(&[("SET", Duration::from_millis(2))]));
        }
        assert_eq!(agg.best("SET").unwrap().run, 1);
        assert_eq!(agg.worst("SET").unwrap().run, 1);
    }

    #[test]
    fn test_absent_operation_keeps_standing() {
        let mut agg = RunAggregator::new(Criterion::P99);
        agg.observe(
            1,
            record(&[
                ("GET", Duration::from_millis(2)),
                ("SET", Duration::from_millis(4)),
            ]),
        );
        agg.observe(2, record(&[("GET", Duration::from_millis(1))]));

        assert_eq!(agg.best("SET").unwrap().run, 1);
        assert_eq!(agg.worst("SET").unwrap().run, 1);
        assert_eq!(agg.best("GET").unwrap().run, 2);

        let outcome = agg.into_outcome();
        assert_eq!(outcome.runs, 2);
        assert_eq!(outcome.operations().collect::<Vec<_>>(), vec!["GET", "SET"]);
    }

    #[test]
    fn test_degenerate_never_beats_real_result() {
        let real = result("GET", Duration::from_millis(9), 10);
        let empty = degenerate("GET");
        for c in [Criterion::P99, Criterion::Throughput] {
            assert!(c.better(&real, &empty));
            assert!(!c.better(&empty, &real));
            assert!(!c.better(&empty, &empty));
        }

        let mut agg = RunAggregator::new(Criterion::P99);
        agg.observe(1, [("GET".to_string(), empty)].into_iter().collect());
        agg.observe(2, [("GET".to_string(), real)].into_iter().collect());
        assert_eq!(agg.best("GET").unwrap().run, 2);
        assert_eq!(agg.worst("GET").unwrap().run, 1);
    }
}
