// PERFHARVEST TRIAL LOG
// RECORDS THE OUTCOME OF EVERY TRIAL FOR THE END-OF-RUN SUMMARY.
// COUNTERS COVER THE WHOLE RUN; THE PER-TRIAL TABLE IS A PRE-ALLOCATED
// RING BUFFER, SO MEMORY STAYS FLAT OVER THOUSANDS OF TRIALS.

use std::time::{Duration, Instant};

use crate::error::FailureKind;

const MAX_ENTRIES: usize = 8192;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrialOutcome {
    Committed { sample_id: String },
    Discarded { sample_id: String, kind: FailureKind, reason: String },
}

impl TrialOutcome {
    pub fn sample_id(&self) -> &str {
        match self {
            Self::Committed { sample_id } | Self::Discarded { sample_id, .. } => sample_id,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

#[derive(Clone, Debug)]
struct Entry {
    outcome: TrialOutcome,
    elapsed: Duration,
    processes: usize,
}

pub struct TrialLog {
    entries: Vec<Option<Entry>>,
    head: usize,
    len: usize,
    committed: u64,
    discarded: [u64; 4],
    started: Instant,
}

impl TrialLog {
    pub fn new() -> Self {
        Self {
            entries: vec![None; MAX_ENTRIES],
            head: 0,
            len: 0,
            committed: 0,
            discarded: [0; 4],
            started: Instant::now(),
        }
    }

    // ONE CALL PER TRIAL. OVERWRITES THE OLDEST ENTRY WHEN FULL.
    pub fn record(&mut self, outcome: &TrialOutcome, elapsed: Duration, processes: usize) {
        match outcome {
            TrialOutcome::Committed { .. } => self.committed += 1,
            TrialOutcome::Discarded { kind, .. } => self.discarded[kind_index(*kind)] += 1,
        }
        self.entries[self.head] = Some(Entry {
            outcome: outcome.clone(),
            elapsed,
            processes,
        });
        self.head = (self.head + 1) % MAX_ENTRIES;
        if self.len < MAX_ENTRIES {
            self.len += 1;
        }
    }

    pub fn committed(&self) -> u64 {
        self.committed
    }

    pub fn discarded(&self) -> u64 {
        self.discarded.iter().sum()
    }

    pub fn discarded_by(&self, kind: FailureKind) -> u64 {
        self.discarded[kind_index(kind)]
    }

    pub fn attempted(&self) -> u64 {
        self.committed + self.discarded()
    }

    fn iter_chronological(&self) -> impl Iterator<Item = &Entry> {
        let start = if self.len < MAX_ENTRIES { 0 } else { self.head };
        (0..self.len).filter_map(move |i| self.entries[(start + i) % MAX_ENTRIES].as_ref())
    }

    // PER-TRIAL TABLE
    pub fn dump(&self) {
        if self.len == 0 {
            return;
        }

        println!("\n{:<48} {:<10} {:<24} {:>6} {:>9}",
            "SAMPLE_ID", "OUTCOME", "KIND", "PROCS", "ELAPSED");
        println!("{}", "-".repeat(101));

        for e in self.iter_chronological() {
            let (outcome, kind) = match &e.outcome {
                TrialOutcome::Committed { .. } => ("COMMIT", "-"),
                TrialOutcome::Discarded { kind, .. } => ("DISCARD", kind.label()),
            };
            println!("{:<48} {:<10} {:<24} {:>6} {:>8.1}s",
                e.outcome.sample_id(), outcome, kind, e.processes, e.elapsed.as_secs_f64());
        }

        if self.attempted() > self.len as u64 {
            println!("\n(RING BUFFER WRAPPED -- SHOWING MOST RECENT {} TRIALS)", MAX_ENTRIES);
        }
        println!("TOTAL TRIALS: {}", self.attempted());
    }

    pub fn summary(&self) {
        let attempted = self.attempted();
        let elapsed_s = self.started.elapsed().as_secs_f64();

        println!("\n{}", "=".repeat(50));
        println!("PERFHARVEST SUMMARY");
        println!("{}", "=".repeat(50));
        println!("  TRIALS ATTEMPTED:  {}", attempted);
        println!("  COMMITTED:         {}", self.committed);
        println!("  DISCARDED:         {}", self.discarded());
        for kind in FailureKind::ALL {
            let n = self.discarded_by(kind);
            if n > 0 {
                println!("    {:<24}{}", kind.label(), n);
            }
        }
        if attempted > 0 {
            let pct = self.committed as f64 / attempted as f64 * 100.0;
            println!("  COMMIT RATE:       {:.1}%", pct);
        }
        println!("  ELAPSED:           {:.1}s", elapsed_s);
    }
}

impl Default for TrialLog {
    fn default() -> Self {
        Self::new()
    }
}

fn kind_index(kind: FailureKind) -> usize {
    match kind {
        FailureKind::Spawn => 0,
        FailureKind::CaptureTimeout => 1,
        FailureKind::IncompleteCounterData => 2,
        FailureKind::Unexpected => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(id: &str) -> TrialOutcome {
        TrialOutcome::Committed { sample_id: id.to_string() }
    }

    fn discard(id: &str, kind: FailureKind) -> TrialOutcome {
        TrialOutcome::Discarded {
            sample_id: id.to_string(),
            kind,
            reason: "test".to_string(),
        }
    }

    #[test]
    fn record_counts_by_outcome() {
        let mut log = TrialLog::new();
        assert_eq!(log.len, 0);

        log.record(&commit("a"), Duration::from_secs(5), 2);
        log.record(&discard("b", FailureKind::CaptureTimeout), Duration::from_secs(7), 1);
        log.record(&discard("c", FailureKind::IncompleteCounterData), Duration::from_secs(5), 3);
        log.record(&discard("d", FailureKind::IncompleteCounterData), Duration::from_secs(5), 3);

        assert_eq!(log.len, 4);
        assert_eq!(log.committed(), 1);
        assert_eq!(log.discarded(), 3);
        assert_eq!(log.discarded_by(FailureKind::IncompleteCounterData), 2);
        assert_eq!(log.discarded_by(FailureKind::Spawn), 0);
        assert_eq!(log.attempted(), 4);
    }

    #[test]
    fn ring_buffer_wraps() {
        let mut log = TrialLog::new();

        // FILL TO CAPACITY
        for i in 0..MAX_ENTRIES {
            log.record(&commit(&i.to_string()), Duration::ZERO, 0);
        }
        assert_eq!(log.len, MAX_ENTRIES);
        assert_eq!(log.head, 0);

        // ONE MORE OVERWRITES THE OLDEST, COUNTERS KEEP EVERYTHING
        log.record(&commit("newest"), Duration::ZERO, 0);
        assert_eq!(log.len, MAX_ENTRIES);
        assert_eq!(log.head, 1);
        assert_eq!(log.committed(), MAX_ENTRIES as u64 + 1);

        let ordered: Vec<&str> = log.iter_chronological()
            .map(|e| e.outcome.sample_id())
            .collect();
        assert_eq!(ordered[0], "1");
        assert_eq!(*ordered.last().unwrap(), "newest");
        assert_eq!(ordered.len(), MAX_ENTRIES);
    }

    #[test]
    fn summary_no_panic_empty() {
        let log = TrialLog::new();
        log.summary();
        log.dump();
    }

    #[test]
    fn dump_no_panic() {
        let mut log = TrialLog::new();
        log.record(&commit("fr_libc.so.6_no-load_0"), Duration::from_millis(5100), 1);
        log.record(&discard("benign_full-load_0", FailureKind::Spawn), Duration::from_millis(40), 2);
        log.dump();
        log.summary();
    }

    #[test]
    fn outcome_accessors() {
        assert!(commit("x").is_committed());
        assert!(!discard("y", FailureKind::Unexpected).is_committed());
        assert_eq!(discard("y", FailureKind::Unexpected).sample_id(), "y");
    }
}
