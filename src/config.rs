// PERFHARVEST CONFIGURATION
// ONE IMMUTABLE VALUE, BUILT ONCE, PASSED TO PLANNER AND SCHEDULER.
// DEFAULTS REPRODUCE THE REFERENCE COLLECTION SETUP; A JSON FILE MAY
// OVERRIDE ANY FIELD, CLI FLAGS OVERRIDE THE FILE.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// BUDGET AND TIMING

pub const DEFAULT_TOTAL_SAMPLES: u64   = 288 * 8;
pub const DEFAULT_SAMPLE_MS: u64       = 5_000;   // 5S MEASUREMENT WINDOW
pub const DEFAULT_COOLDOWN_MS: u64     = 2_000;   // 2S BETWEEN TRIALS
pub const DEFAULT_CAPTURE_GRACE_MS: u64 = 2_000;  // PROFILER SHUTDOWN AFTER SIGINT
pub const DEFAULT_STOP_GRACE_MS: u64   = 500;     // SIGTERM -> SIGKILL

// BENIGN SUBSET SIZE (INCLUSIVE)

pub const BENIGN_MIN_PROCS: usize = 2;
pub const BENIGN_MAX_PROCS: usize = 4;

pub const BENIGN_MARKER: &str = "benign";
pub const DEFAULT_OUTPUT: &str = "dataset.csv";

// HARDWARE EVENTS, IN REPORT ORDER. ONE CSV COLUMN EACH.

pub const DEFAULT_EVENTS: [&str; 12] = [
    "cache-references",
    "cache-misses",
    "cycles",
    "instructions",
    "branches",
    "branch-misses",
    "L1-dcache-loads",
    "L1-dcache-load-misses",
    "LLC-loads",
    "LLC-load-misses",
    "dTLB-loads",
    "dTLB-load-misses",
];

// LOAD LEVEL

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum LoadLevel {
    #[serde(rename = "no-load")]
    NoLoad,
    #[serde(rename = "avg-load")]
    AvgLoad,
    #[serde(rename = "full-load")]
    FullLoad,
}

impl LoadLevel {
    pub fn label(self) -> &'static str {
        match self {
            Self::NoLoad => "no-load",
            Self::AvgLoad => "avg-load",
            Self::FullLoad => "full-load",
        }
    }
}

impl std::fmt::Display for LoadLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadProfile {
    pub level: LoadLevel,
    // NONE: NO BACKGROUND STRESS FOR THIS LEVEL
    pub command: Option<Vec<String>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackEntry {
    pub name: String,
    pub executable: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetOffset {
    pub module: String,
    pub offset: String,
}

// PROFILER INVOCATION AND REPORT FORMAT

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStream {
    Stdout,
    Stderr,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    pub program: String,
    pub args: Vec<String>,
    pub event_flag: String,
    pub events: Vec<String>,
    pub stream: ReportStream,
    pub delimiter: char,
    pub value_field: usize,
    pub thousands_separators: String,
    pub grace_ms: u64,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            program: "perf".to_string(),
            args: strings(&["stat", "-x,", "-a"]),
            event_flag: "-e".to_string(),
            events: strings(&DEFAULT_EVENTS),
            stream: ReportStream::Stderr,
            delimiter: ',',
            value_field: 0,
            thousands_separators: ",".to_string(),
            grace_ms: DEFAULT_CAPTURE_GRACE_MS,
        }
    }
}

impl ProfilerConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    // FULL ARGV: program args... event_flag ev1,ev2,...
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 3);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        if !self.event_flag.is_empty() {
            argv.push(self.event_flag.clone());
        }
        argv.push(self.events.join(","));
        argv
    }
}

// HARNESS CONFIG

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub attacks: Vec<AttackEntry>,
    pub target_offsets: Vec<TargetOffset>,
    // SUBSET OF target_offsets MODULES TO PLAN FOR. NONE = ALL OF THEM.
    pub targets: Option<Vec<String>>,
    pub load_levels: Vec<LoadProfile>,
    pub benign_commands: Vec<Vec<String>>,
    pub benign_min_procs: usize,
    pub benign_max_procs: usize,
    pub total_samples: u64,
    pub sample_ms: u64,
    pub cooldown_ms: u64,
    pub stop_grace_ms: u64,
    pub output: PathBuf,
    pub seed: Option<u64>,
    pub profiler: ProfilerConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let attacks = [
            ("fr", "./attacks/fr/fr"),
            ("pp", "./attacks/pp/pp"),
            ("ff", "./attacks/ff/ff"),
            ("er", "./attacks/er/er"),
        ]
        .iter()
        .map(|(name, exe)| AttackEntry {
            name: name.to_string(),
            executable: exe.to_string(),
        })
        .collect();

        let target_offsets = [
            ("/lib/x86_64-linux-gnu/libc.so.6", "0x60100"),
            ("/usr/lib/x86_64-linux-gnu/libcrypto.so.1.1", "0xbba40"),
            ("/usr/lib/x86_64-linux-gnu/libssl.so.1.1", "0x22550"),
            ("/usr/lib/x86_64-linux-gnu/libstdc++.so.6", "0xbd000"),
            ("/lib/x86_64-linux-gnu/libpam.so.0", "0x4c40"),
            ("/usr/lib/x86_64-linux-gnu/libz.so.1", "0x1810"),
            ("/usr/lib/x86_64-linux-gnu/libX11.so.6", "0x4080"),
            ("/lib/x86_64-linux-gnu/libm.so.6", "0x1d000"),
            ("/lib/x86_64-linux-gnu/libsystemd.so.0", "0x2000"),
            ("/usr/lib/x86_64-linux-gnu/libsqlite3.so.0", "0x1500"),
            ("/usr/lib/x86_64-linux-gnu/libgcrypt.so.20", "0x7000"),
            ("/lib64/ld-linux-x86-64.so.2", "0x10e0"),
        ]
        .iter()
        .map(|(module, offset)| TargetOffset {
            module: module.to_string(),
            offset: offset.to_string(),
        })
        .collect();

        // STRESS-NG TIMEOUT OUTLIVES THE 5S WINDOW; THE ORCHESTRATOR STOPS IT
        let load_levels = vec![
            LoadProfile { level: LoadLevel::NoLoad, command: None },
            LoadProfile {
                level: LoadLevel::AvgLoad,
                command: Some(strings(&["stress-ng", "--cpu", "2", "--timeout", "6s", "--quiet"])),
            },
            LoadProfile {
                level: LoadLevel::FullLoad,
                command: Some(strings(&[
                    "stress-ng", "--cpu", "4", "--vm", "2", "--vm-bytes", "512M",
                    "--timeout", "6s", "--quiet",
                ])),
            },
        ];

        let benign_commands = vec![
            strings(&["/usr/bin/ls", "-lR", "/usr"]),
            strings(&["/bin/cat", "/etc/passwd"]),
            strings(&["/usr/bin/grep", "root", "/etc/passwd"]),
            strings(&["/usr/bin/openssl", "rand", "-hex", "64"]),
            strings(&["/usr/bin/curl", "-s", "https://example.com"]),
            strings(&["/usr/bin/apt", "list"]),
            strings(&["/usr/bin/g++", "--version"]),
            strings(&["/usr/bin/sudo", "-V"]),
            strings(&["/usr/bin/loginctl"]),
            strings(&["/bin/tar", "cf", "/dev/null", "/etc"]),
            strings(&["/usr/bin/gzip", "--version"]),
            strings(&["/usr/bin/xprop"]),
            strings(&["/usr/bin/python3", "-c", "import math; print(math.exp(1))"]),
            strings(&["/usr/bin/systemctl", "list-units"]),
            strings(&["/usr/bin/sqlite3", ":memory:", "SELECT 1;"]),
            strings(&["/usr/bin/gpg", "--version"]),
        ];

        Self {
            attacks,
            target_offsets,
            targets: None,
            load_levels,
            benign_commands,
            benign_min_procs: BENIGN_MIN_PROCS,
            benign_max_procs: BENIGN_MAX_PROCS,
            total_samples: DEFAULT_TOTAL_SAMPLES,
            sample_ms: DEFAULT_SAMPLE_MS,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            stop_grace_ms: DEFAULT_STOP_GRACE_MS,
            output: PathBuf::from(DEFAULT_OUTPUT),
            seed: None,
            profiler: ProfilerConfig::default(),
        }
    }
}

impl HarnessConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    // PRETTY JSON THAT load() ACCEPTS: A STARTING POINT FOR --config FILES
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    pub fn sample_duration(&self) -> Duration {
        Duration::from_millis(self.sample_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn events(&self) -> &[String] {
        &self.profiler.events
    }

    // RESTRICT THE ATTACK CATALOG TO THE NAMED SUBSET, KEEPING CATALOG ORDER
    pub fn select_attacks(&mut self, names: &[String]) -> Result<(), ConfigError> {
        if names.is_empty() {
            return Ok(());
        }
        for name in names {
            if !self.attacks.iter().any(|a| &a.name == name) {
                return Err(ConfigError::UnknownAttack(name.clone()));
            }
        }
        self.attacks.retain(|a| names.contains(&a.name));
        Ok(())
    }

    // TARGETS SELECTED FOR PLANNING, IN target_offsets ORDER
    pub fn selected_targets(&self) -> Result<Vec<&TargetOffset>, ConfigError> {
        match &self.targets {
            None => Ok(self.target_offsets.iter().collect()),
            Some(names) => {
                for name in names {
                    if !self.target_offsets.iter().any(|t| &t.module == name) {
                        return Err(ConfigError::UnknownTarget(name.clone()));
                    }
                }
                Ok(self.target_offsets.iter()
                    .filter(|t| names.contains(&t.module))
                    .collect())
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.attacks.is_empty() {
            return Err(ConfigError::NoAttacks);
        }
        for attack in &self.attacks {
            if attack.name.is_empty() || attack.executable.is_empty() {
                return Err(ConfigError::EmptyCommand(format!("attack '{}'", attack.name)));
            }
        }

        let offset_re = offset_regex();
        for target in &self.target_offsets {
            if !offset_re.is_match(&target.offset) {
                return Err(ConfigError::BadOffset {
                    module: target.module.clone(),
                    offset: target.offset.clone(),
                });
            }
        }
        if self.selected_targets()?.is_empty() {
            return Err(ConfigError::NoTargets);
        }

        if self.load_levels.is_empty() {
            return Err(ConfigError::EmptyLoadLevels);
        }
        let mut seen = HashSet::new();
        for profile in &self.load_levels {
            if !seen.insert(profile.level) {
                return Err(ConfigError::DuplicateLoadLevel(profile.level));
            }
            if let Some(cmd) = &profile.command {
                if cmd.is_empty() {
                    return Err(ConfigError::EmptyCommand(format!("load level {}", profile.level)));
                }
            }
        }

        if let Some(i) = self.benign_commands.iter().position(|c| c.is_empty()) {
            return Err(ConfigError::EmptyCommand(format!("benign command #{}", i)));
        }
        if !self.benign_commands.is_empty()
            && (self.benign_min_procs == 0
                || self.benign_min_procs > self.benign_max_procs
                || self.benign_max_procs > self.benign_commands.len())
        {
            return Err(ConfigError::BenignRange {
                min: self.benign_min_procs,
                max: self.benign_max_procs,
                catalog: self.benign_commands.len(),
            });
        }

        if self.profiler.events.is_empty() {
            return Err(ConfigError::NoEvents);
        }
        let event_re = event_regex();
        for event in &self.profiler.events {
            if !event_re.is_match(event) {
                return Err(ConfigError::BadEvent(event.clone()));
            }
        }
        if self.profiler.program.is_empty() {
            return Err(ConfigError::EmptyCommand("profiler".to_string()));
        }

        if self.sample_ms == 0 {
            return Err(ConfigError::ZeroDuration);
        }
        Ok(())
    }
}

// HEX WITH 0x PREFIX OR PLAIN DECIMAL
fn offset_regex() -> Regex {
    Regex::new(r"^(0[xX][0-9a-fA-F]+|[0-9]+)$").expect("static regex")
}

// SYMBOLIC NAMES (cycles, L1-dcache-loads) OR RAW PMU SYNTAX (cpu/event=0x3c/u)
// COMMAS WOULD SPLIT THE -e LIST, SO THEY ARE REJECTED
fn event_regex() -> Regex {
    Regex::new(r"^[A-Za-z0-9_.:/=\-]+$").expect("static regex")
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = HarnessConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.attacks.len(), 4);
        assert_eq!(cfg.target_offsets.len(), 12);
        assert_eq!(cfg.load_levels.len(), 3);
        assert_eq!(cfg.benign_commands.len(), 16);
        assert_eq!(cfg.events().len(), 12);
    }

    #[test]
    fn profiler_argv_joins_events() {
        let mut p = ProfilerConfig::default();
        p.events = vec!["cycles".to_string(), "instructions".to_string()];
        assert_eq!(
            p.argv(),
            vec!["perf", "stat", "-x,", "-a", "-e", "cycles,instructions"]
        );
    }

    #[test]
    fn offsets_accept_hex_and_decimal() {
        let re = offset_regex();
        assert!(re.is_match("0x60100"));
        assert!(re.is_match("0XBBA40"));
        assert!(re.is_match("4096"));
        assert!(!re.is_match("0x"));
        assert!(!re.is_match("60100h"));
        assert!(!re.is_match(""));
    }

    #[test]
    fn bad_offset_rejected() {
        let mut cfg = HarnessConfig::default();
        cfg.target_offsets[0].offset = "zz".to_string();
        assert!(matches!(cfg.validate(), Err(ConfigError::BadOffset { .. })));
    }

    #[test]
    fn event_with_comma_rejected() {
        let mut cfg = HarnessConfig::default();
        cfg.profiler.events.push("cycles,instructions".to_string());
        assert!(matches!(cfg.validate(), Err(ConfigError::BadEvent(_))));
    }

    #[test]
    fn raw_pmu_event_accepted() {
        let mut cfg = HarnessConfig::default();
        cfg.profiler.events = vec!["cpu/event=0x3c/u".to_string(), "r01c2".to_string()];
        cfg.validate().unwrap();
    }

    #[test]
    fn unknown_target_selection_rejected() {
        let mut cfg = HarnessConfig::default();
        cfg.targets = Some(vec!["/lib/libnope.so".to_string()]);
        assert!(matches!(cfg.validate(), Err(ConfigError::UnknownTarget(_))));
    }

    #[test]
    fn target_selection_keeps_table_order() {
        let mut cfg = HarnessConfig::default();
        cfg.targets = Some(vec![
            "/lib/x86_64-linux-gnu/libm.so.6".to_string(),
            "/lib/x86_64-linux-gnu/libc.so.6".to_string(),
        ]);
        let sel: Vec<&str> = cfg.selected_targets().unwrap()
            .iter()
            .map(|t| t.module.as_str())
            .collect();
        assert_eq!(sel, vec!["/lib/x86_64-linux-gnu/libc.so.6", "/lib/x86_64-linux-gnu/libm.so.6"]);
    }

    #[test]
    fn empty_load_levels_rejected() {
        let mut cfg = HarnessConfig::default();
        cfg.load_levels.clear();
        assert!(matches!(cfg.validate(), Err(ConfigError::EmptyLoadLevels)));
    }

    #[test]
    fn duplicate_load_level_rejected() {
        let mut cfg = HarnessConfig::default();
        cfg.load_levels.push(LoadProfile { level: LoadLevel::NoLoad, command: None });
        assert!(matches!(cfg.validate(), Err(ConfigError::DuplicateLoadLevel(LoadLevel::NoLoad))));
    }

    #[test]
    fn benign_range_larger_than_catalog_rejected() {
        let mut cfg = HarnessConfig::default();
        cfg.benign_commands.truncate(3);
        assert!(matches!(cfg.validate(), Err(ConfigError::BenignRange { max: 4, catalog: 3, .. })));
    }

    #[test]
    fn select_attacks_subset_and_unknown() {
        let mut cfg = HarnessConfig::default();
        cfg.select_attacks(&["ff".to_string(), "fr".to_string()]).unwrap();
        let names: Vec<&str> = cfg.attacks.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["fr", "ff"]);
        assert!(matches!(
            cfg.select_attacks(&["xx".to_string()]),
            Err(ConfigError::UnknownAttack(_))
        ));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let cfg: HarnessConfig = serde_json::from_str(
            r#"{ "total_samples": 90, "profiler": { "program": "/usr/local/bin/perf" } }"#,
        ).unwrap();
        assert_eq!(cfg.total_samples, 90);
        assert_eq!(cfg.profiler.program, "/usr/local/bin/perf");
        assert_eq!(cfg.profiler.events.len(), 12);
        assert_eq!(cfg.attacks.len(), 4);
    }

    #[test]
    fn load_level_labels_roundtrip_through_json() {
        let p: LoadProfile = serde_json::from_str(
            r#"{ "level": "avg-load", "command": ["stress-ng", "--cpu", "1"] }"#,
        ).unwrap();
        assert_eq!(p.level, LoadLevel::AvgLoad);
        assert!(serde_json::from_str::<LoadLevel>(r#""heavy""#).is_err());
    }

    #[test]
    fn dumped_config_loads_back_unchanged() {
        let mut cfg = HarnessConfig::default();
        cfg.seed = Some(17);
        cfg.targets = Some(vec!["/lib64/ld-linux-x86-64.so.2".to_string()]);
        let json = cfg.to_json().unwrap();
        assert!(json.contains("\"full-load\""));
        assert!(json.contains("\"stderr\""));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dumped.json");
        std::fs::write(&path, &json).unwrap();
        assert_eq!(HarnessConfig::load(&path).unwrap(), cfg);
    }
}
