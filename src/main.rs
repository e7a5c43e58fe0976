// PERFHARVEST v1.2.0 -- SIDE-CHANNEL TELEMETRY DATASET HARNESS
// RUNS ATTACK AND BENIGN WORKLOADS UNDER BACKGROUND LOAD WHILE THE
// PROFILER SAMPLES HARDWARE COUNTERS. ONE LABELED CSV ROW PER TRIAL.
//
// THE HARNESS NEVER MEASURES ANYTHING ITSELF. perf stat DOES THE
// COUNTING; THIS BINARY OWNS PLANNING, PROCESS LIFETIMES AND THE CSV.

mod cli;

use std::sync::atomic::AtomicBool;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cli::ConfigArgs;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "perfharvest")]
#[command(about = "PERFHARVEST -- HARDWARE-COUNTER DATASETS FOR SIDE-CHANNEL DETECTION")]
struct Cli {
    // DEBUG LOGGING (RUST_LOG TAKES PRECEDENCE)
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    // PLAN AND COLLECT THE FULL DATASET
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        // PRINT THE PER-TRIAL OUTCOME TABLE ON EXIT
        #[arg(long)]
        dump_log: bool,
    },

    // PRINT THE BUDGET BREAKDOWN WITHOUT RUNNING ANYTHING
    Plan {
        #[command(flatten)]
        config: ConfigArgs,

        // ALSO LIST EVERY TRIAL
        #[arg(long)]
        list: bool,

        // PRINT THE RESOLVED CONFIG AS JSON (USABLE WITH --config) AND EXIT
        #[arg(long)]
        dump_config: bool,
    },

    // RUN THE PROFILER ALONE AND PRINT COUNTER VECTORS
    Capture {
        #[command(flatten)]
        config: ConfigArgs,

        // NUMBER OF CAPTURES (0 = UNTIL CTRL+C)
        #[arg(long, default_value_t = 1)]
        count: u64,

        // PAUSE BETWEEN CAPTURES
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },

    // VERIFY PROFILER, LOAD GENERATOR, WORKLOADS AND KERNEL SUPPORT
    Check {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    // WORKLOADS LIVE IN THEIR OWN PROCESS GROUPS: CTRL+C REACHES ONLY US.
    // THE RUNNING TRIAL FINISHES AND CLEANS UP, THE REST ARE SKIPPED.
    ctrlc::set_handler(move || {
        SHUTDOWN.store(true, std::sync::atomic::Ordering::Relaxed);
    })?;

    match cli.mode {
        Mode::Run { config, dump_log } => cli::run::run_collect(&config, dump_log, &SHUTDOWN),
        Mode::Plan { config, list, dump_config } => cli::plan::run_plan(&config, list, dump_config),
        Mode::Capture { config, count, interval_ms } => {
            cli::capture::run_capture(&config, count, interval_ms, &SHUTDOWN)
        }
        Mode::Check { config } => cli::check::run_check(&config),
    }
}
