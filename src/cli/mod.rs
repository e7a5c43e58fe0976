pub mod capture;
pub mod check;
pub mod plan;
pub mod run;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use rand::rngs::StdRng;
use rand::SeedableRng;

use perfharvest::config::HarnessConfig;

// SHARED BY EVERY SUBCOMMAND: FILE FIRST, THEN FLAG OVERRIDES
#[derive(Args)]
pub struct ConfigArgs {
    // JSON CONFIG FILE (MISSING FIELDS KEEP THEIR DEFAULTS)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long)]
    total_samples: Option<u64>,

    // MEASUREMENT WINDOW PER TRIAL
    #[arg(long)]
    sample_ms: Option<u64>,

    #[arg(long)]
    cooldown_ms: Option<u64>,

    // SEED FOR BENIGN COMMAND SELECTION (REPRODUCIBLE PLANS)
    #[arg(long)]
    seed: Option<u64>,

    // RESTRICT TO THESE ATTACKS (REPEATABLE)
    #[arg(long = "attack")]
    attacks: Vec<String>,

    // RESTRICT TO THESE TARGET MODULES (REPEATABLE)
    #[arg(long = "target")]
    targets: Vec<String>,
}

impl ConfigArgs {
    pub fn resolve(&self) -> Result<HarnessConfig> {
        let mut cfg = match &self.config {
            Some(path) => HarnessConfig::load(path)?,
            None => HarnessConfig::default(),
        };

        if let Some(output) = &self.output {
            cfg.output = output.clone();
        }
        if let Some(n) = self.total_samples {
            cfg.total_samples = n;
        }
        if let Some(ms) = self.sample_ms {
            cfg.sample_ms = ms;
        }
        if let Some(ms) = self.cooldown_ms {
            cfg.cooldown_ms = ms;
        }
        if self.seed.is_some() {
            cfg.seed = self.seed;
        }
        cfg.select_attacks(&self.attacks)?;
        if !self.targets.is_empty() {
            cfg.targets = Some(self.targets.clone());
        }

        cfg.validate().context("INVALID CONFIGURATION")?;
        Ok(cfg)
    }
}

pub fn rng_for(cfg: &HarnessConfig) -> StdRng {
    match cfg.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}
