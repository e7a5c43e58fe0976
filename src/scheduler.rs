// PERFHARVEST SAMPLE SCHEDULER
// DRIVES TRIALS ONE AT A TIME, STRICTLY IN PLAN ORDER:
//
//   IDLE -> LAUNCHING -> CAPTURING -> CLEANING_UP -> COMMITTED | DISCARDED
//        -> COOLDOWN -> IDLE
//
// A TRIAL NEVER ABORTS THE RUN. EVERY TRIAL ENDS IN EXACTLY ONE ROW OR
// EXACTLY ONE LOGGED DISCARD, A FAILED DATASET WRITE INCLUDED.

use std::any::Any;
use std::cell::Cell;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::capture::{CounterCapture, CounterVector, Sampler};
use crate::config::{HarnessConfig, LoadProfile};
use crate::dataset::{DatasetWriter, SampleRecord};
use crate::error::TrialError;
use crate::event::{TrialLog, TrialOutcome};
use crate::orchestrator::Orchestrator;
use crate::planner::{ExperimentPlan, TrialDescriptor};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrialState {
    Idle,
    Launching,
    Capturing,
    CleaningUp,
    Committed,
    Discarded,
    Cooldown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub planned: usize,
    pub attempted: u64,
    pub committed: u64,
    pub discarded: u64,
    pub interrupted: bool,
}

pub struct SampleScheduler<W: Write> {
    orchestrator: Orchestrator,
    sampler: Box<dyn Sampler>,
    writer: DatasetWriter<W>,
    load_levels: Vec<LoadProfile>,
    sample_duration: Duration,
    cooldown: Duration,
    state: Cell<TrialState>,
    pub log: TrialLog,
}

impl<W: Write> SampleScheduler<W> {
    pub fn new(config: &HarnessConfig, writer: DatasetWriter<W>) -> Self {
        let sampler = Box::new(CounterCapture::new(config.profiler.clone()));
        Self::with_sampler(config, writer, sampler)
    }

    pub fn with_sampler(config: &HarnessConfig, writer: DatasetWriter<W>, sampler: Box<dyn Sampler>) -> Self {
        Self {
            orchestrator: Orchestrator::new(config.stop_grace()),
            sampler,
            writer,
            load_levels: config.load_levels.clone(),
            sample_duration: config.sample_duration(),
            cooldown: config.cooldown(),
            state: Cell::new(TrialState::Idle),
            log: TrialLog::new(),
        }
    }

    pub fn state(&self) -> TrialState {
        self.state.get()
    }

    pub fn rows_written(&self) -> u64 {
        self.writer.rows_written()
    }

    pub fn run_plan(&mut self, plan: &ExperimentPlan, shutdown: &AtomicBool) -> RunSummary {
        let planned = plan.len();
        let mut summary = RunSummary {
            planned,
            attempted: 0,
            committed: 0,
            discarded: 0,
            interrupted: false,
        };

        for (i, trial) in plan.trials().iter().enumerate() {
            if shutdown.load(Ordering::Relaxed) {
                warn!("shutdown requested, skipping {} remaining trial(s)", planned - i);
                summary.interrupted = true;
                break;
            }
            info!(trial = i + 1, total = planned, sample_id = %trial.sample_id, "trial start");
            let outcome = self.run_trial(trial);
            summary.attempted += 1;
            if outcome.is_committed() {
                summary.committed += 1;
            } else {
                summary.discarded += 1;
            }
        }
        summary
    }

    pub fn run_trial(&mut self, trial: &TrialDescriptor) -> TrialOutcome {
        let started = Instant::now();
        let (result, processes) = self.execute(trial);
        let committed = result.and_then(|counters| self.commit(trial, counters));

        let outcome = match committed {
            Ok(()) => {
                self.transition(TrialState::Committed);
                debug!(sample_id = %trial.sample_id, "committed");
                TrialOutcome::Committed {
                    sample_id: trial.sample_id.clone(),
                }
            }
            Err(e) => {
                self.transition(TrialState::Discarded);
                warn!(sample_id = %trial.sample_id, kind = e.kind().label(), error = %e, "discarded");
                TrialOutcome::Discarded {
                    sample_id: trial.sample_id.clone(),
                    kind: e.kind(),
                    reason: e.to_string(),
                }
            }
        };
        self.log.record(&outcome, started.elapsed(), processes);

        self.transition(TrialState::Cooldown);
        std::thread::sleep(self.cooldown);
        self.transition(TrialState::Idle);
        outcome
    }

    pub fn writer_failed(&self) -> bool {
        self.writer.has_failed()
    }

    pub fn finish(self) -> io::Result<W> {
        self.writer.close()
    }

    // LAUNCH + CAPTURE + CLEANUP. RETURNS THE CAPTURE RESULT AND HOW MANY
    // PROCESSES THE ORCHESTRATOR REAPED. A PANIC ANYWHERE IN HERE BECOMES
    // AN Unexpected FAILURE; THE ORCHESTRATOR'S GUARD HAS ALREADY CLEANED UP.
    fn execute(&self, trial: &TrialDescriptor) -> (Result<CounterVector, TrialError>, usize) {
        let load = match self.load_levels.iter().find(|p| p.level == trial.load_level) {
            Some(p) => p,
            None => {
                self.transition(TrialState::CleaningUp);
                let e = TrialError::Unexpected(format!("load level {} not configured", trial.load_level));
                return (Err(e), 0);
            }
        };
        let workloads = trial.workload_commands();

        self.transition(TrialState::Launching);
        let scope = panic::catch_unwind(AssertUnwindSafe(|| {
            self.orchestrator.run_with_auxiliaries(load, &workloads, || {
                self.transition(TrialState::Capturing);
                let counters = self.sampler.sample(self.sample_duration);
                self.transition(TrialState::CleaningUp);
                counters
            })
        }));

        // LAUNCH FAILURES SKIP CAPTURING, BUT CLEANUP STILL RAN
        if self.state() != TrialState::CleaningUp {
            self.transition(TrialState::CleaningUp);
        }

        match scope {
            Ok(scope) => (scope.outcome, scope.reaped.len()),
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                (Err(TrialError::Unexpected(format!("panic during trial: {}", msg))), 0)
            }
        }
    }

    // A WRITE FAILURE DISCARDS THE TRIAL LIKE ANY OTHER FAULT
    fn commit(&mut self, trial: &TrialDescriptor, counters: CounterVector) -> Result<(), TrialError> {
        let record = SampleRecord::new(trial, counters);
        self.writer.append(&record).map_err(|e| {
            TrialError::Unexpected(format!("writing sample {}: {}", trial.sample_id, e))
        })
    }

    fn transition(&self, next: TrialState) {
        debug!(from = ?self.state.get(), to = ?next, "trial state");
        self.state.set(next);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
