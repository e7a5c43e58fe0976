use std::sync::atomic::AtomicBool;

use anyhow::{bail, Context, Result};

use perfharvest::dataset::DatasetWriter;
use perfharvest::planner;
use perfharvest::scheduler::SampleScheduler;

use super::plan::print_budget;
use super::{rng_for, ConfigArgs};

pub fn run_collect(args: &ConfigArgs, dump_log: bool, shutdown: &AtomicBool) -> Result<()> {
    let cfg = args.resolve()?;

    // CONFIG ERRORS SURFACE HERE, BEFORE ANY PROCESS IS STARTED
    let plan = planner::plan(&cfg, &mut rng_for(&cfg))?;

    println!("PERFHARVEST v{}", env!("CARGO_PKG_VERSION"));
    println!("OUTPUT:          {}", cfg.output.display());
    println!("PROFILER:        {}", cfg.profiler.argv().join(" "));
    println!("EVENTS:          {}", cfg.events().len());
    println!("WINDOW:          {} ms (+{} ms grace)", cfg.sample_ms, cfg.profiler.grace_ms);
    println!("COOLDOWN:        {} ms", cfg.cooldown_ms);
    println!();
    print_budget(plan.budget());
    println!();

    let writer = DatasetWriter::open(&cfg.output, cfg.events())
        .with_context(|| format!("OPENING {}", cfg.output.display()))?;
    let mut sched = SampleScheduler::new(&cfg, writer);

    println!("PERFHARVEST IS COLLECTING (CTRL+C STOPS AFTER THE CURRENT TRIAL)");
    let summary = sched.run_plan(&plan, shutdown);

    if dump_log {
        sched.log.dump();
    }
    sched.log.summary();
    println!("  ROWS WRITTEN:      {}", sched.rows_written());
    if summary.interrupted {
        println!("  INTERRUPTED:       {}/{} TRIALS ATTEMPTED", summary.attempted, summary.planned);
    }

    if sched.writer_failed() {
        bail!("DATASET OUTPUT {} FAILED DURING THE RUN, LATER TRIALS WERE DISCARDED", cfg.output.display());
    }
    sched.finish().context("FLUSHING DATASET")?;
    println!("\nDATASET SAVED TO {}", cfg.output.display());
    Ok(())
}
