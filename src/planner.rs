// PERFHARVEST EXPERIMENT PLANNER
// PURE FUNCTION: CONFIG + RNG -> ORDERED TRIAL LIST.
//
// BUDGET SPLIT (ALL INTEGER DIVISION, REMAINDERS DROPPED, NEVER REDISTRIBUTED):
//   attack_samples         = total / 2
//   benign_samples         = total / 2
//   per_attack_combination = attack_samples / (attacks * targets * load_levels)
//   per_benign_load        = benign_samples / load_levels
// PlanBudget::dropped() REPORTS WHAT THE TRUNCATION COST.

use std::path::Path;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::{HarnessConfig, LoadLevel, BENIGN_MARKER};
use crate::error::ConfigError;

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Label {
    Benign = 0,
    Attack = 1,
}

impl Label {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrialDescriptor {
    pub sample_id: String,
    pub label: Label,
    pub attack_type: String,
    pub load_level: LoadLevel,
    pub primary_command: Option<Vec<String>>,
    pub auxiliary_commands: Vec<Vec<String>>,
}

impl TrialDescriptor {
    // PRIMARY FIRST, THEN AUXILIARIES: THE FULL WORKLOAD SET OF THE TRIAL
    pub fn workload_commands(&self) -> Vec<Vec<String>> {
        self.primary_command
            .iter()
            .chain(self.auxiliary_commands.iter())
            .cloned()
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlanBudget {
    pub total_samples: u64,
    pub attack_samples: u64,
    pub benign_samples: u64,
    pub attack_combinations: u64,
    pub per_attack_combination: u64,
    pub load_levels: u64,
    pub per_benign_load: u64,
}

impl PlanBudget {
    pub fn attack_trials(&self) -> u64 {
        self.attack_combinations * self.per_attack_combination
    }

    pub fn benign_trials(&self) -> u64 {
        self.load_levels * self.per_benign_load
    }

    pub fn planned(&self) -> u64 {
        self.attack_trials() + self.benign_trials()
    }

    pub fn dropped(&self) -> u64 {
        self.total_samples - self.planned()
    }
}

#[derive(Clone, Debug)]
pub struct ExperimentPlan {
    trials: Vec<TrialDescriptor>,
    budget: PlanBudget,
}

impl ExperimentPlan {
    pub fn trials(&self) -> &[TrialDescriptor] {
        &self.trials
    }

    pub fn budget(&self) -> &PlanBudget {
        &self.budget
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }
}

pub fn budget(config: &HarnessConfig) -> Result<PlanBudget, ConfigError> {
    config.validate()?;
    let targets = config.selected_targets()?.len() as u64;
    let attacks = config.attacks.len() as u64;
    let load_levels = config.load_levels.len() as u64;

    let attack_samples = config.total_samples / 2;
    let benign_samples = config.total_samples / 2;
    let attack_combinations = attacks * targets * load_levels;
    let per_benign_load = benign_samples / load_levels;

    if per_benign_load > 0 && config.benign_commands.is_empty() {
        return Err(ConfigError::NoBenignCommands);
    }

    Ok(PlanBudget {
        total_samples: config.total_samples,
        attack_samples,
        benign_samples,
        attack_combinations,
        per_attack_combination: attack_samples / attack_combinations,
        load_levels,
        per_benign_load,
    })
}

pub fn plan<R: Rng>(config: &HarnessConfig, rng: &mut R) -> Result<ExperimentPlan, ConfigError> {
    let budget = budget(config)?;
    let targets = config.selected_targets()?;
    let mut trials = Vec::with_capacity(budget.planned() as usize);

    // ATTACKS: attack x target x load, LOAD INNERMOST
    for attack in &config.attacks {
        for target in &targets {
            let module = module_name(&target.module);
            for profile in &config.load_levels {
                for i in 0..budget.per_attack_combination {
                    trials.push(TrialDescriptor {
                        sample_id: format!("{}_{}_{}_{}", attack.name, module, profile.level, i),
                        label: Label::Attack,
                        attack_type: attack.name.clone(),
                        load_level: profile.level,
                        primary_command: Some(vec![
                            attack.executable.clone(),
                            target.module.clone(),
                            target.offset.clone(),
                        ]),
                        auxiliary_commands: Vec::new(),
                    });
                }
            }
        }
    }

    // BENIGN: RANDOM 2..=4 DISTINCT CATALOG COMMANDS PER TRIAL
    for profile in &config.load_levels {
        for i in 0..budget.per_benign_load {
            let n = rng.gen_range(config.benign_min_procs..=config.benign_max_procs);
            let commands = config
                .benign_commands
                .choose_multiple(rng, n)
                .cloned()
                .collect();
            trials.push(TrialDescriptor {
                sample_id: format!("{}_{}_{}", BENIGN_MARKER, profile.level, i),
                label: Label::Benign,
                attack_type: BENIGN_MARKER.to_string(),
                load_level: profile.level,
                primary_command: None,
                auxiliary_commands: commands,
            });
        }
    }

    Ok(ExperimentPlan { trials, budget })
}

// "/usr/lib/x86_64-linux-gnu/libssl.so.1.1" -> "libssl.so.1.1"
fn module_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}
