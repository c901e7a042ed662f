//! Pretty-print benchmark outcomes, write percentile dumps, CSV and JSON export.

use crate::aggregate::{Outcome, Ranked};
use crate::config::{Config, Criterion};
use crate::BenchResult;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CSV_FILE: &str = "kvbench_results.csv";
pub const JSON_FILE: &str = "kvbench_results.json";

/// Which retained run a row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Selection {
    Best,
    Worst,
}

impl Selection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Selection::Best => "best",
            Selection::Worst => "worst",
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn entries(outcome: &Outcome, selection: Selection) -> &BTreeMap<String, Ranked> {
    match selection {
        Selection::Best => &outcome.best,
        Selection::Worst => &outcome.worst,
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Terminal output
// ────────────────────────────────────────────────────────────────────────────────

pub fn print_banner(config: &Config) {
    println!(
        "\n{}",
        "╔══════════════════════════════════════════════════════════════╗"
            .bold()
            .blue()
    );
    println!(
        "{}",
        "║                kvbench latency / throughput                  ║"
            .bold()
            .blue()
    );
    println!(
        "{}",
        "╚══════════════════════════════════════════════════════════════╝"
            .bold()
            .blue()
    );
    println!(
        "  Backend: {} @ {}  Runs: {}  Workers: {}  Iterations: {}",
        config.protocol,
        config.transport(),
        config.runs,
        config.concurrency,
        config.iterations
    );
    println!(
        "  Write ratio: {}  Data: {}  Keys: {}  Criterion: {}",
        config.ratio,
        config.data,
        if config.key_range == 0 {
            config.key.clone()
        } else {
            format!("{}-[0..{})", config.key, config.key_range)
        },
        config.criterion
    );
}

/// Print the WORST and BEST tables.
pub fn print_outcome(outcome: &Outcome) {
    if outcome.is_empty() {
        println!("\n{}", "No operations were recorded.".yellow());
        return;
    }
    print_selection(outcome, Selection::Worst);
    print_selection(outcome, Selection::Best);
}

fn print_selection(outcome: &Outcome, selection: Selection) {
    let title = match selection {
        Selection::Worst => format!("━━━ WORST ({}) ━━━", outcome.criterion).bold().red(),
        Selection::Best => format!("━━━ BEST ({}) ━━━", outcome.criterion).bold().green(),
    };
    println!("\n{}", title);

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS);
    table.set_header(vec![
        "Op",
        "Run",
        "Ops",
        "Errors",
        "Total",
        "Ops/sec",
        "p50 (μs)",
        "p99 (μs)",
        "p99.9 (μs)",
        "KB/s",
        "Gb/s",
    ]);

    for (op, ranked) in entries(outcome, selection) {
        let r = &ranked.result;
        let highlight = match selection {
            Selection::Best => Color::Green,
            Selection::Worst => Color::Red,
        };
        let (p99_cell, tp_cell) = match outcome.criterion {
            Criterion::P99 => (
                Cell::new(micros(r.p99)).fg(highlight),
                Cell::new(format_throughput(r.ops_per_sec)),
            ),
            Criterion::Throughput => (
                Cell::new(micros(r.p99)),
                Cell::new(format_throughput(r.ops_per_sec)).fg(highlight),
            ),
        };
        let errors = if r.errors > 0 {
            Cell::new(format_count(r.errors)).fg(Color::Yellow)
        } else {
            Cell::new("0")
        };

        table.add_row(vec![
            Cell::new(op),
            Cell::new(ranked.run),
            Cell::new(format_count(r.ops)),
            errors,
            Cell::new(format!("{:.3?}", r.total)),
            tp_cell,
            Cell::new(micros(r.p50)),
            p99_cell,
            Cell::new(micros(r.p999)),
            Cell::new(format!("{:.2}", r.kbps)),
            Cell::new(format!("{:.3}", r.gbps)),
        ]);
    }

    println!("{table}");

    for (op, ranked) in entries(outcome, selection) {
        println!(
            "  {} {}",
            format!("{:>6} (run {})", op, ranked.run).bold(),
            ranked.result.to_string().dimmed()
        );
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Percentile dumps
// ────────────────────────────────────────────────────────────────────────────────

/// Dump file for one (selection, operation) pair.
pub fn dump_path(dir: &Path, selection: Selection, op: &str) -> PathBuf {
    let op: String = op
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    dir.join(format!("{}_{}.hdr", selection, op))
}

/// Write the percentile distribution of every retained result into `dir`.
pub fn write_percentile_dumps(outcome: &Outcome, dir: &Path) -> BenchResult<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for selection in [Selection::Best, Selection::Worst] {
        for (op, ranked) in entries(outcome, selection) {
            let path = dump_path(dir, selection, op);
            let mut file = BufWriter::new(File::create(&path)?);
            ranked.result.write_percentiles(&mut file)?;
            file.flush()?;
            written.push(path);
        }
    }
    println!("  Percentile dumps written to {}", dir.display());
    Ok(written)
}

// ────────────────────────────────────────────────────────────────────────────────
// CSV / JSON export
// ────────────────────────────────────────────────────────────────────────────────

/// One exported row: a retained result for one operation.
#[derive(Debug, Clone, Serialize)]
pub struct ExportRecord {
    pub selection: Selection,
    pub op: String,
    pub run: usize,
    pub ops: u64,
    pub errors: u64,
    pub total_secs: f64,
    pub ops_per_sec: f64,
    pub p50_us: u64,
    pub p99_us: u64,
    pub p999_us: u64,
    pub mean_us: u64,
    pub max_us: u64,
    pub kbps: f64,
    pub gbps: f64,
    pub degenerate: bool,
}

#[derive(Debug, Serialize)]
struct ExportDocument<'a> {
    criterion: Criterion,
    runs: usize,
    results: &'a [ExportRecord],
}

pub fn export_records(outcome: &Outcome) -> Vec<ExportRecord> {
    let mut records = Vec::new();
    for selection in [Selection::Best, Selection::Worst] {
        for (op, ranked) in entries(outcome, selection) {
            let r = &ranked.result;
            records.push(ExportRecord {
                selection,
                op: op.clone(),
                run: ranked.run,
                ops: r.ops,
                errors: r.errors,
                total_secs: r.total.as_secs_f64(),
                ops_per_sec: r.ops_per_sec,
                p50_us: as_micros(r.p50),
                p99_us: as_micros(r.p99),
                p999_us: as_micros(r.p999),
                mean_us: as_micros(r.mean),
                max_us: as_micros(r.max),
                kbps: r.kbps,
                gbps: r.gbps,
                degenerate: r.degenerate,
            });
        }
    }
    records
}

pub fn export_csv(outcome: &Outcome, path: &Path) -> BenchResult<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    for record in export_records(outcome) {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    println!("  CSV exported to {}", path.display());
    Ok(())
}

pub fn export_json(outcome: &Outcome, path: &Path) -> BenchResult<()> {
    let records = export_records(outcome);
    let doc = ExportDocument {
        criterion: outcome.criterion,
        runs: outcome.runs,
        results: &records,
    };
    let json = serde_json::to_string_pretty(&doc)?;
    fs::write(path, json)?;
    println!("  JSON exported to {}", path.display());
    Ok(())
}

/// Write both export files into `dir`.
pub fn export_all(outcome: &Outcome, dir: &Path) -> BenchResult<()> {
    fs::create_dir_all(dir)?;
    export_csv(outcome, &dir.join(CSV_FILE))?;
    export_json(outcome, &dir.join(JSON_FILE))
}

// ────────────────────────────────────────────────────────────────────────────────
// Formatting helpers
// ────────────────────────────────────────────────────────────────────────────────

fn as_micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

fn micros(d: Duration) -> String {
    format!("{:.1}", d.as_secs_f64() * 1_000_000.0)
}

fn format_throughput(t: f64) -> String {
    if t >= 1_000_000.0 {
        format!("{:.2}M", t / 1_000_000.0)
    } else if t >= 1_000.0 {
        format!("{:.1}K", t / 1_000.0)
    } else {
        format!("{:.0}", t)
    }
}

fn format_count(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{RunAggregator, RunRecord};
    use crate::stats::{LatencyRecorder, OpResult};

    fn outcome() -> Outcome {
        let mut agg = RunAggregator::new(Criterion::P99);
        for (run, ms) in [(1u64, 3u64), (2, 1)] {
            let mut record = RunRecord::new();
            for op in ["GET", "SET"] {
                let mut rec = LatencyRecorder::new();
                for _ in 0..50 {
                    rec.record(Duration::from_millis(ms));
                }
                record.insert(op.to_string(), OpResult::from_recorder(op, rec, 32));
            }
            agg.observe(run as usize, record);
        }
        agg.into_outcome()
    }

    #[test]
    fn test_dump_files_named_by_selection_and_op() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_percentile_dumps(&outcome(), dir.path()).unwrap();
        assert_eq!(written.len(), 4);
        for name in ["best_GET.hdr", "best_SET.hdr", "worst_GET.hdr", "worst_SET.hdr"] {
            let text = fs::read_to_string(dir.path().join(name)).unwrap();
            assert!(text.contains("Percentile"), "{} missing header", name);
            assert!(text.contains("#[Max"));
        }
    }

    #[test]
    fn test_dump_path_sanitizes_op() {
        let p = dump_path(Path::new("/tmp"), Selection::Worst, "MGET/3");
        assert_eq!(p, PathBuf::from("/tmp/worst_MGET_3.hdr"));
    }

    #[test]
    fn test_export_csv_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = outcome();
        export_all(&outcome, dir.path()).unwrap();

        let mut rdr = csv::Reader::from_path(dir.path().join(CSV_FILE)).unwrap();
        let headers = rdr.headers().unwrap().clone();
        assert_eq!(&headers[0], "selection");
        assert_eq!(&headers[1], "op");
        let rows: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 4);
        assert_eq!(&rows[0][0], "best");
        assert_eq!(&rows[0][2], "2");

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(JSON_FILE)).unwrap())
                .unwrap();
        assert_eq!(json["criterion"], "p99");
        assert_eq!(json["runs"], 2);
        assert_eq!(json["results"].as_array().unwrap().len(), 4);
        assert_eq!(json["results"][0]["p99_us"], 1_000);
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_throughput(950.0), "950");
        assert_eq!(format_throughput(12_345.0), "12.3K");
        assert_eq!(format_throughput(2_500_000.0), "2.50M");
        assert_eq!(format_count(999), "999");
        assert_eq!(micros(Duration::from_micros(1500)), "1500.0");
    }
}
