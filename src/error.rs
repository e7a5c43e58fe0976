// PERFHARVEST ERROR TAXONOMY
// CONFIG ERRORS ARE FATAL BEFORE THE FIRST TRIAL.
// TRIAL ERRORS DISCARD ONE TRIAL AND NEVER STOP THE RUN.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config::LoadLevel;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot serialize config: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("no attacks configured")]
    NoAttacks,
    #[error("unknown attack '{0}'")]
    UnknownAttack(String),
    #[error("no targets selected")]
    NoTargets,
    #[error("unknown target '{0}' (not in target offset table)")]
    UnknownTarget(String),
    #[error("target {module}: offset '{offset}' is neither 0x-hex nor decimal")]
    BadOffset { module: String, offset: String },
    #[error("load-level set is empty")]
    EmptyLoadLevels,
    #[error("load level {0} configured twice")]
    DuplicateLoadLevel(LoadLevel),
    #[error("{0} has an empty command")]
    EmptyCommand(String),
    #[error("benign subset size {min}..={max} does not fit a catalog of {catalog}")]
    BenignRange { min: usize, max: usize, catalog: usize },
    #[error("benign trials requested but the benign catalog is empty")]
    NoBenignCommands,
    #[error("no profiler events configured")]
    NoEvents,
    #[error("invalid event name '{0}'")]
    BadEvent(String),
    #[error("sample duration must be non-zero")]
    ZeroDuration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Spawn,
    CaptureTimeout,
    IncompleteCounterData,
    Unexpected,
}

impl FailureKind {
    pub const ALL: [FailureKind; 4] = [
        Self::Spawn,
        Self::CaptureTimeout,
        Self::IncompleteCounterData,
        Self::Unexpected,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Spawn => "SPAWN",
            Self::CaptureTimeout => "CAPTURE_TIMEOUT",
            Self::IncompleteCounterData => "INCOMPLETE_COUNTER_DATA",
            Self::Unexpected => "UNEXPECTED",
        }
    }
}

#[derive(Debug, Error)]
pub enum TrialError {
    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("profiler still running after {0:?}")]
    CaptureTimeout(Duration),
    #[error("expected {expected} counter values, parsed {found}")]
    IncompleteCounterData { expected: usize, found: usize },
    #[error("{0}")]
    Unexpected(String),
}

impl TrialError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Spawn { .. } => FailureKind::Spawn,
            Self::CaptureTimeout(_) => FailureKind::CaptureTimeout,
            Self::IncompleteCounterData { .. } => FailureKind::IncompleteCounterData,
            Self::Unexpected(_) => FailureKind::Unexpected,
        }
    }
}

impl From<std::io::Error> for TrialError {
    fn from(e: std::io::Error) -> Self {
        Self::Unexpected(format!("io error: {}", e))
    }
}
