// Data-driven engine configuration.
//
// `EngineConfig` holds every tunable the scheduler reads at construction:
// tempo and resolution, timing strategy, the master seed, worker pool sizing,
// optional harmony, and whether to follow an external clock. It loads from
// JSON (every field defaulted, so `{}` is a valid config) and `validate()`
// performs all configuration-time checks. `Scheduler::new` calls it, so a bad
// tempo or an invalid chord graph stops the session before the first pulse
// rather than inside the run loop.
//
// See also: `scheduler.rs`, which consumes this, and
// `subsequence_harmony::harmonic_state` for the harmony parameters.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use subsequence_harmony::{HarmonicState, HarmonyParams, parse_note_name, style_by_name};
use tracing::info;

use crate::clock::{TimingStrategy, beats_to_pulses};
use crate::error::ConfigError;

/// Top-level engine configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Initial tempo in beats per minute. Ignored while following an
    /// external clock.
    pub bpm: f64,
    /// Pulses per beat, the resolution of all scheduling. 24 matches MIDI
    /// clock.
    pub pulses_per_beat: u32,
    /// Beats per bar, for bar counting and form advancement.
    pub beats_per_bar: u32,
    /// How the realtime loop waits between pulses.
    pub timing: TimingConfig,
    /// Master seed for every random decision. `None` derives one from the
    /// system clock and logs it so the run can be replayed.
    pub seed: Option<u64>,
    /// Background task worker pool.
    pub workers: WorkerConfig,
    /// Harmony, if any patterns should receive chords.
    pub harmony: Option<HarmonyConfig>,
    /// Follow incoming clock signals instead of the wall clock.
    pub external_clock: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bpm: 125.0,
            pulses_per_beat: 24,
            beats_per_bar: 4,
            timing: TimingConfig::default(),
            seed: None,
            workers: WorkerConfig::default(),
            harmony: None,
            external_clock: false,
        }
    }
}

/// Realtime wait strategy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Sleep to within `spin_margin_ms` of each pulse, then busy-wait.
    pub spin_wait: bool,
    /// How early to stop sleeping, in milliseconds.
    pub spin_margin_ms: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            spin_wait: true,
            spin_margin_ms: 1.0,
        }
    }
}

impl TimingConfig {
    pub fn strategy(&self) -> TimingStrategy {
        if self.spin_wait {
            TimingStrategy::SleepThenSpin {
                margin: Duration::from_secs_f64(self.spin_margin_ms.max(0.0) / 1000.0),
            }
        } else {
            TimingStrategy::Sleep
        }
    }
}

/// Worker pool sizing for background tasks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker threads.
    pub threads: usize,
    /// Pending invocations allowed before new ones are dropped.
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: 2,
            queue_capacity: 64,
        }
    }
}

/// Harmony settings: style, key, cycle and selection parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarmonyConfig {
    /// Chord graph style name, e.g. `"functional_major"` or `"dorian_minor"`.
    pub style: String,
    /// Key name, e.g. `"C"`, `"F#"`, `"Bb"`.
    pub key: String,
    /// Beats between chord changes.
    pub cycle_beats: f64,
    /// How far ahead of each chord change the next chord is chosen. Patterns
    /// never look further ahead than this, so a rebuild always sees the
    /// chord for the cycle it builds.
    pub lookahead_beats: f64,
    /// Key gravity blend, 0..=1.
    pub gravity: f64,
    /// Melodic inertia strength, 0..=1.
    pub nir_strength: f64,
    /// Root repeat damping, (0, 1].
    pub root_diversity: f64,
    /// Chords remembered, including the current one.
    pub history_len: usize,
    /// Override the style's default for including a dominant 7th.
    pub dominant_7th: Option<bool>,
}

impl Default for HarmonyConfig {
    fn default() -> Self {
        let params = HarmonyParams::default();
        Self {
            style: "functional_major".into(),
            key: "C".into(),
            cycle_beats: 4.0,
            lookahead_beats: 1.0,
            gravity: params.gravity,
            nir_strength: params.nir_strength,
            root_diversity: params.root_diversity,
            history_len: params.history_len,
            dominant_7th: None,
        }
    }
}

impl HarmonyConfig {
    pub fn params(&self) -> HarmonyParams {
        HarmonyParams {
            gravity: self.gravity,
            nir_strength: self.nir_strength,
            root_diversity: self.root_diversity,
            history_len: self.history_len,
        }
    }

    /// Build and validate the harmonic state this config describes.
    pub fn build_state(&self, seed: u64) -> Result<HarmonicState, ConfigError> {
        let style = style_by_name(&self.style, self.dominant_7th)?;
        let key = parse_note_name(&self.key)?;
        Ok(HarmonicState::new(style.as_ref(), key, self.params(), seed)?)
    }

    fn validate(&self, pulses_per_beat: u32) -> Result<(), ConfigError> {
        if !self.cycle_beats.is_finite() || beats_to_pulses(self.cycle_beats, pulses_per_beat) == 0
        {
            return Err(ConfigError::InvalidHarmonyCycle(self.cycle_beats));
        }
        if !(0.0..=self.cycle_beats).contains(&self.lookahead_beats) {
            return Err(ConfigError::InvalidLookahead {
                name: "harmony".into(),
                lookahead: self.lookahead_beats,
                length: self.cycle_beats,
            });
        }
        self.params().validate()?;
        style_by_name(&self.style, self.dominant_7th)?;
        parse_note_name(&self.key)?;
        Ok(())
    }
}

impl EngineConfig {
    /// Parse from a JSON string. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Run every configuration-time check.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.bpm.is_finite() && self.bpm > 0.0) {
            return Err(ConfigError::InvalidBpm(self.bpm));
        }
        if self.pulses_per_beat == 0 {
            return Err(ConfigError::ZeroPulsesPerBeat);
        }
        if self.beats_per_bar == 0 {
            return Err(ConfigError::ZeroBeatsPerBar);
        }
        if !(self.timing.spin_margin_ms.is_finite() && self.timing.spin_margin_ms >= 0.0) {
            return Err(ConfigError::InvalidSpinMargin(self.timing.spin_margin_ms));
        }
        if self.workers.threads == 0 || self.workers.queue_capacity == 0 {
            return Err(ConfigError::InvalidWorkerPool);
        }
        if self.external_clock && self.pulses_per_beat % 24 != 0 {
            return Err(ConfigError::ExternalClockResolution(self.pulses_per_beat));
        }
        if let Some(harmony) = &self.harmony {
            harmony.validate(self.pulses_per_beat)?;
        }
        Ok(())
    }

    /// The configured seed, or one derived from the system clock.
    pub fn resolve_seed(&self) -> u64 {
        match self.seed {
            Some(seed) => seed,
            None => {
                let seed = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_nanos() as u64)
                    .unwrap_or(0);
                info!(seed, "no seed configured; using clock-derived seed");
                seed
            }
        }
    }

    pub fn pulses_per_bar(&self) -> u64 {
        self.pulses_per_beat as u64 * self.beats_per_bar as u64
    }
}
