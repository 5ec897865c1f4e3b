// Error types for the scheduling engine.
//
// Two families, matching when they can happen:
// - `ConfigError`: raised while building a `Scheduler`, adding patterns or
//   tasks, or loading config. These are the only errors that prevent
//   playback from starting.
// - `RebuildError` / `TaskError`: produced by user code at run time. The run
//   loop catches them, logs them, and reports them to the observer. They
//   never propagate out of the clock.
//
// `ExportError` belongs to the MIDI recorder sink.

use std::path::PathBuf;

use subsequence_harmony::HarmonyError;
use thiserror::Error;

/// Setup-time failures. Fatal: playback does not start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("bpm must be a positive finite number, got {0}")]
    InvalidBpm(f64),

    #[error("pulses per beat must be at least 1")]
    ZeroPulsesPerBeat,

    #[error("beats per bar must be at least 1")]
    ZeroBeatsPerBar,

    #[error("pattern {name:?}: length of {beats} beats is shorter than one pulse")]
    PatternTooShort { name: String, beats: f64 },

    #[error("pattern {name:?}: lookahead {lookahead} beats must be within 0..={length}")]
    InvalidLookahead {
        name: String,
        lookahead: f64,
        length: f64,
    },

    #[error("pattern {name:?}: MIDI channel {channel} is outside 0..=15")]
    InvalidChannel { name: String, channel: u8 },

    #[error("duplicate pattern name {0:?}")]
    DuplicatePattern(String),

    #[error("task {name:?}: period of {beats} beats is shorter than one pulse")]
    InvalidTaskPeriod { name: String, beats: f64 },

    #[error("harmony cycle of {0} beats is shorter than one pulse")]
    InvalidHarmonyCycle(f64),

    #[error("following an external clock needs pulses per beat divisible by 24, got {0}")]
    ExternalClockResolution(u32),

    #[error("worker pool needs at least one thread and a queue capacity of at least one")]
    InvalidWorkerPool,

    #[error("spin margin must be a non-negative number of milliseconds, got {0}")]
    InvalidSpinMargin(f64),

    #[error("form: {0}")]
    InvalidForm(String),

    #[error("ramp of {0} beats is invalid")]
    InvalidRamp(f64),

    #[error("scheduler already started")]
    AlreadyStarted,

    #[error("harmony: {0}")]
    Harmony(#[from] HarmonyError),

    #[error("could not read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("could not start worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Failure inside a pattern rebuild hook. The cycle plays silent.
#[derive(Debug, Clone, Error)]
pub enum RebuildError {
    #[error("{0}")]
    Failed(String),

    #[error("rebuild hook panicked: {0}")]
    Panicked(String),
}

impl RebuildError {
    pub fn msg(message: impl Into<String>) -> Self {
        RebuildError::Failed(message.into())
    }
}

/// Failure inside a background task. The task runs again next period.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn msg(message: impl Into<String>) -> Self {
        TaskError::Failed(message.into())
    }
}

/// MIDI file export failures.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("could not encode MIDI file: {0}")]
    Encode(#[source] std::io::Error),

    #[error("could not write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
