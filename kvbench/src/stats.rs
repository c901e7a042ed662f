//! Latency recording and per-operation statistics.
//!
//! Durations are recorded in microseconds into an HDR histogram covering
//! 10µs to 60s with 3 significant digits, so percentile lookups cost the same
//! regardless of how many samples a run produced.

use hdrhistogram::Histogram;
use std::fmt;
use std::io::{self, Write};
use std::time::Duration;

/// Lowest discernible latency, in microseconds.
pub const HIST_LOW_US: u64 = 10;
/// Highest trackable latency, in microseconds. Larger values saturate.
pub const HIST_HIGH_US: u64 = 60_000_000;
pub const HIST_SIGFIGS: u8 = 3;

fn new_histogram() -> Histogram<u64> {
    Histogram::<u64>::new_with_bounds(HIST_LOW_US, HIST_HIGH_US, HIST_SIGFIGS)
        .expect("histogram bounds are compile-time constants")
}

// ────────────────────────────────────────────────────────────────────────────────
// Latency recorder
// ────────────────────────────────────────────────────────────────────────────────

/// Running aggregate for one operation within one run.
#[derive(Debug, Clone)]
pub struct LatencyRecorder {
    hist: Histogram<u64>,
    total: Duration,
    ops: u64,
    errors: u64,
}

impl LatencyRecorder {
    pub fn new() -> Self {
        Self {
            hist: new_histogram(),
            total: Duration::ZERO,
            ops: 0,
            errors: 0,
        }
    }

    /// Record one successful operation.
    #[inline]
    pub fn record(&mut self, elapsed: Duration) {
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.hist.saturating_record(us);
        self.total += elapsed;
        self.ops += 1;
    }

    /// Record one failed operation. Its duration is not part of the latency
    /// distribution.
    #[inline]
    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    pub fn ops(&self) -> u64 {
        self.ops
    }

    pub fn errors(&self) -> u64 {
        self.errors
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn histogram(&self) -> &Histogram<u64> {
        &self.hist
    }

    /// Successful ops per second of summed operation time. Zero when no time
    /// was recorded.
    pub fn throughput(&self) -> f64 {
        let secs = self.total.as_secs_f64();
        if secs > 0.0 {
            self.ops as f64 / secs
        } else {
            0.0
        }
    }

    /// Latency at `percentile` (0..=100). Zero for an empty recorder.
    pub fn percentile(&self, percentile: f64) -> Duration {
        Duration::from_micros(value_above_percentile(&self.hist, percentile))
    }
}

impl Default for LatencyRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Smallest recorded value that more than `percentile`% of samples do not
/// exceed: the sample at rank `floor(n * p / 100) + 1`.
///
/// Returned as the lowest value of its bucket, so latencies that the
/// histogram represents exactly come back unchanged.
fn value_above_percentile(hist: &Histogram<u64>, percentile: f64) -> u64 {
    let n = hist.len();
    if n == 0 {
        return 0;
    }
    let p = percentile.clamp(0.0, 100.0);
    let below = ((n as f64 * p) / 100.0).floor() as u64;
    let rank = (below + 1).min(n);

    let mut seen = 0u64;
    for v in hist.iter_recorded() {
        seen += v.count_at_value();
        if seen >= rank {
            return hist.lowest_equivalent(v.value_iterated_to());
        }
    }
    hist.lowest_equivalent(hist.max())
}

// ────────────────────────────────────────────────────────────────────────────────
// Per-operation result
// ────────────────────────────────────────────────────────────────────────────────

/// Statistics for one operation within one run.
#[derive(Debug, Clone)]
pub struct OpResult {
    pub op: String,
    pub ops: u64,
    pub errors: u64,
    /// Sum of successful operation durations.
    pub total: Duration,
    pub ops_per_sec: f64,
    /// Estimated KB/s, from the configured payload upper bound.
    pub kbps: f64,
    /// Estimated Gb/s, from the configured payload upper bound.
    pub gbps: f64,
    pub p50: Duration,
    pub p99: Duration,
    pub p999: Duration,
    pub mean: Duration,
    pub max: Duration,
    /// No time was recorded, so throughput and percentiles are meaningless.
    pub degenerate: bool,
    pub histogram: Histogram<u64>,
}

impl OpResult {
    /// Build the final statistics for `op`.
    ///
    /// `payload_bytes` is the per-operation size used for the bandwidth
    /// estimates; callers pass the configured maximum.
    pub fn from_recorder(op: impl Into<String>, rec: LatencyRecorder, payload_bytes: usize) -> Self {
        let ops_per_sec = rec.throughput();
        let degenerate = rec.total.is_zero();
        let payload = payload_bytes as f64;
        let mean = if rec.hist.is_empty() {
            Duration::ZERO
        } else {
            Duration::from_micros(rec.hist.mean() as u64)
        };
        let max = if rec.hist.is_empty() {
            Duration::ZERO
        } else {
            Duration::from_micros(rec.hist.max())
        };

        Self {
            op: op.into(),
            ops: rec.ops,
            errors: rec.errors,
            total: rec.total,
            ops_per_sec,
            kbps: payload * ops_per_sec / 1_000.0,
            gbps: payload * 8.0 * ops_per_sec / 1_000_000_000.0,
            p50: rec.percentile(50.0),
            p99: rec.percentile(99.0),
            p999: rec.percentile(99.9),
            mean,
            max,
            degenerate,
            histogram: rec.hist,
        }
    }

    /// Write the percentile distribution as a line-based table.
    ///
    /// Values are in milliseconds; the footer carries mean, deviation, max and
    /// bucket usage.
    pub fn write_percentiles<W: Write>(&self, mut writer: W) -> io::Result<()> {
        const QUANTILE_PRECISION: usize = 6;
        const TICKS_PER_HALF: u32 = 10;
        let hist = &self.histogram;

        writeln!(
            writer,
            "{:>12} {:>width$} {:>10} {:>14}\n",
            "Value",
            "Percentile",
            "TotalCount",
            "1/(1-Percentile)",
            width = QUANTILE_PRECISION + 2
        )?;

        if !hist.is_empty() {
            let mut sum = 0u64;
            for v in hist.iter_quantiles(TICKS_PER_HALF) {
                sum += v.count_since_last_iteration();
                let value_ms = v.value_iterated_to() as f64 / 1_000.0;
                let q = v.quantile_iterated_to();
                if q < 1.0 {
                    writeln!(
                        writer,
                        "{:12.3} {:1.*} {:10} {:14.2}",
                        value_ms,
                        QUANTILE_PRECISION,
                        q,
                        sum,
                        1.0 / (1.0 - q)
                    )?;
                } else {
                    writeln!(
                        writer,
                        "{:12.3} {:1.*} {:10} {:>14}",
                        value_ms, QUANTILE_PRECISION, q, sum, "∞"
                    )?;
                }
            }
        }

        let (mean, stdev, max) = if hist.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            (hist.mean() / 1_000.0, hist.stdev() / 1_000.0, hist.max() as f64 / 1_000.0)
        };
        write_footer(&mut writer, "Mean", mean, "StdDeviation", stdev)?;
        write_footer(&mut writer, "Max", max, "Total count", hist.len())?;
        write_footer(&mut writer, "Buckets", hist.buckets(), "SubBuckets", hist.distinct_values())?;
        Ok(())
    }
}

fn write_footer<W: Write, A: fmt::Display, B: fmt::Display>(
    writer: &mut W,
    label1: &str,
    data1: A,
    label2: &str,
    data2: B,
) -> io::Result<()> {
    writeln!(
        writer,
        "#[{:10} = {:12.2}, {:14} = {:12.2}]",
        label1, data1, label2, data2
    )
}

impl fmt::Display for OpResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ops {}; errors: {}; total {:?}; ops/sec {:.0}; p99: {:?}, KBps {:.2}; Gbps {:.2}",
            self.ops, self.errors, self.total, self.ops_per_sec, self.p99, self.kbps, self.gbps
        )
    }
}
