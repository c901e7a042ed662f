//! kvbench: latency / throughput load generator for redis and memcached.
//!
//! Usage:
//!   kvbench                                  # 3 runs × 1000 ops against redis on :6379
//!   kvbench -c 16 -n 10000 -r 0.2 -d 64-512  # 16 workers, 20% writes, ranged payloads
//!   kvbench -P memcache -p 11211 --key-range 1000
//!   kvbench -S /tmp/redis.sock -o dumps --export results
//!   kvbench --config bench.toml --criterion throughput

use clap::Parser;
use colored::Colorize;
use kvbench::config::{Config, Criterion, DataSize, Protocol};
use kvbench::{report, run_benchmark, Backend, BenchError, BenchResult, Outcome};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "kvbench", about = "Key-value latency and throughput benchmark")]
#[command(version)]
struct Cli {
    /// Number of full benchmark runs [default: 3].
    #[arg(short = 'x', long)]
    runs: Option<usize>,

    /// Operations per worker per run [default: 1000].
    #[arg(short = 'n', long)]
    iterations: Option<usize>,

    /// Parallel workers [default: 1].
    #[arg(short = 'c', long)]
    concurrency: Option<usize>,

    /// Fraction of operations that are writes [default: 0.1].
    #[arg(short = 'r', long)]
    ratio: Option<f64>,

    /// Key, or key prefix with --key-range [default: lol].
    #[arg(short = 'k', long)]
    key: Option<String>,

    /// Number of distinct keys "<key>-<i>"; 0 uses the fixed key.
    #[arg(long)]
    key_range: Option<u64>,

    /// Value size: N or MIN-MAX bytes; 0 disables writes [default: 32].
    #[arg(short = 'd', long)]
    data: Option<DataSize>,

    /// Server host [default: 127.0.0.1].
    #[arg(short = 's', long)]
    server: Option<String>,

    /// Server port [default: 6379].
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Unix domain socket; takes precedence over --server/--port.
    #[arg(short = 'S', long)]
    socket: Option<PathBuf>,

    /// Backend protocol [default: redis].
    #[arg(short = 'P', long, value_enum)]
    protocol: Option<Protocol>,

    /// Metric used to pick best/worst runs [default: p99].
    #[arg(long, value_enum)]
    criterion: Option<Criterion>,

    /// Base RNG seed; drawn at random when omitted.
    #[arg(long)]
    seed: Option<u64>,

    /// Pause between runs in milliseconds [default: 1000].
    #[arg(long)]
    settle_ms: Option<u64>,

    /// Directory for percentile distribution dumps.
    #[arg(short = 'o', long)]
    out_dir: Option<PathBuf>,

    /// Export directory for CSV + JSON results.
    #[arg(long)]
    export: Option<PathBuf>,

    /// TOML file with base settings; flags override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

impl Cli {
    fn into_config(self) -> BenchResult<Config> {
        let mut cfg = match &self.config {
            Some(path) => Config::load_toml(path)?,
            None => Config::default(),
        };

        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = self.$field { cfg.$field = v; })*
            };
        }
        merge!(
            runs,
            iterations,
            concurrency,
            ratio,
            key,
            key_range,
            data,
            server,
            port,
            protocol,
            criterion,
            settle_ms,
        );
        if self.socket.is_some() {
            cfg.socket = self.socket;
        }
        if self.seed.is_some() {
            cfg.seed = self.seed;
        }
        if self.out_dir.is_some() {
            cfg.out_dir = self.out_dir;
        }
        if self.export.is_some() {
            cfg.export = self.export;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(mut config: Config) -> BenchResult<Outcome> {
    let seed = *config.seed.get_or_insert_with(rand::random);
    info!(seed, "base seed (pass --seed {} to reproduce)", seed);

    report::print_banner(&config);

    let config = Arc::new(config);
    let outcome = run_benchmark(Arc::clone(&config), Backend::factory(Arc::clone(&config)))?;

    report::print_outcome(&outcome);
    if let Some(dir) = &config.out_dir {
        report::write_percentile_dumps(&outcome, dir)?;
    }
    if let Some(dir) = &config.export {
        report::export_all(&outcome, dir)?;
    }
    Ok(outcome)
}

fn fail(e: &BenchError) -> ExitCode {
    let phase = match e.phase() {
        Some(phase) => format!(" ({})", phase),
        None => String::new(),
    };
    eprintln!("{}{} {}", "FAILED".bold().red(), phase, e);
    ExitCode::from(e.exit_code())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = match cli.into_config() {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };

    match run(config) {
        Ok(outcome) => {
            info!(runs = outcome.runs, operations = outcome.best.len(), "benchmark complete");
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}
