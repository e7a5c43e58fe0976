use anyhow::Result;

use perfharvest::planner::{self, ExperimentPlan, PlanBudget};

use super::{rng_for, ConfigArgs};

pub fn print_budget(b: &PlanBudget) {
    println!("PLAN");
    println!("  TOTAL REQUESTED:   {}", b.total_samples);
    println!("  ATTACK SAMPLES:    {}", b.attack_samples);
    println!("  BENIGN SAMPLES:    {}", b.benign_samples);
    println!("  ATTACK COMBOS:     {}", b.attack_combinations);
    println!("  PER ATTACK COMBO:  {}", b.per_attack_combination);
    println!("  PER BENIGN LOAD:   {} ({} load levels)", b.per_benign_load, b.load_levels);
    println!("  PLANNED TRIALS:    {} ({} attack + {} benign)",
             b.planned(), b.attack_trials(), b.benign_trials());
    if b.dropped() > 0 {
        println!("  DROPPED:           {} (INTEGER DIVISION REMAINDER)", b.dropped());
    }
}

fn print_trials(plan: &ExperimentPlan) {
    println!();
    println!("{:<6} {:<48} {:<6} {:<10} {}", "#", "SAMPLE_ID", "LABEL", "LOAD", "COMMANDS");
    println!("{}", "-".repeat(100));
    for (i, t) in plan.trials().iter().enumerate() {
        let cmds: Vec<String> = t.workload_commands().iter().map(|c| c.join(" ")).collect();
        println!("{:<6} {:<48} {:<6} {:<10} {}",
                 i, t.sample_id, t.label.as_u8(), t.load_level, cmds.join(" | "));
    }
}

pub fn run_plan(args: &ConfigArgs, list: bool, dump_config: bool) -> Result<()> {
    let cfg = args.resolve()?;
    if dump_config {
        println!("{}", cfg.to_json()?);
        return Ok(());
    }
    let plan = planner::plan(&cfg, &mut rng_for(&cfg))?;

    print_budget(plan.budget());
    if list {
        print_trials(&plan);
    }

    let est_ms = plan.len() as u64 * (cfg.sample_ms + cfg.cooldown_ms);
    println!();
    println!("ESTIMATED RUNTIME: ~{:.1}h ({} TRIALS x {}ms WINDOW + {}ms COOLDOWN)",
             est_ms as f64 / 3_600_000.0, plan.len(), cfg.sample_ms, cfg.cooldown_ms);
    Ok(())
}
