// Conductor: named, time-varying control signals.
//
// Signals are pure functions of the beat position, so any number of pattern
// rebuilds can sample them without coordination. The scheduler samples every
// signal at the start beat of the cycle being built and hands the values to
// the hook through `RebuildContext::signal`.

use std::f64::consts::TAU;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::easing::Easing;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LfoShape {
    Sine,
    Triangle,
    Saw,
    Square,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    /// Periodic oscillation between `min` and `max`. `phase` is a fraction of
    /// a cycle.
    Lfo {
        shape: LfoShape,
        cycle_beats: f64,
        min: f64,
        max: f64,
        phase: f64,
    },
    /// One-shot move from `start` to `end` over `beats`, beginning at
    /// `start_beat`. Holds `start` before and `end` after.
    Ramp {
        start: f64,
        end: f64,
        beats: f64,
        start_beat: f64,
        easing: Easing,
    },
}

impl Signal {
    pub fn value_at(&self, beat: f64) -> f64 {
        match *self {
            Signal::Lfo {
                shape,
                cycle_beats,
                min,
                max,
                phase,
            } => {
                if cycle_beats <= 0.0 {
                    return min;
                }
                let progress = (beat / cycle_beats + phase).rem_euclid(1.0);
                let unit = match shape {
                    LfoShape::Sine => ((progress * TAU).sin() + 1.0) / 2.0,
                    LfoShape::Triangle => {
                        if progress < 0.5 {
                            progress * 2.0
                        } else {
                            2.0 - progress * 2.0
                        }
                    }
                    LfoShape::Saw => progress,
                    LfoShape::Square => {
                        if progress < 0.5 {
                            1.0
                        } else {
                            0.0
                        }
                    }
                };
                min + unit * (max - min)
            }
            Signal::Ramp {
                start,
                end,
                beats,
                start_beat,
                easing,
            } => {
                let elapsed = beat - start_beat;
                if elapsed <= 0.0 {
                    start
                } else if beats <= 0.0 || elapsed >= beats {
                    end
                } else {
                    easing.lerp(start, end, elapsed / beats)
                }
            }
        }
    }
}

/// Registry of named signals.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Conductor {
    signals: FxHashMap<String, Signal>,
}

impl Conductor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a signal.
    pub fn set(&mut self, name: impl Into<String>, signal: Signal) {
        self.signals.insert(name.into(), signal);
    }

    pub fn lfo(&mut self, name: impl Into<String>, shape: LfoShape, cycle_beats: f64, min: f64, max: f64) {
        self.set(
            name,
            Signal::Lfo {
                shape,
                cycle_beats,
                min,
                max,
                phase: 0.0,
            },
        );
    }

    pub fn ramp(&mut self, name: impl Into<String>, start: f64, end: f64, beats: f64, start_beat: f64) {
        self.set(
            name,
            Signal::Ramp {
                start,
                end,
                beats,
                start_beat,
                easing: Easing::Linear,
            },
        );
    }

    pub fn remove(&mut self, name: &str) -> Option<Signal> {
        self.signals.remove(name)
    }

    pub fn value(&self, name: &str, beat: f64) -> Option<f64> {
        self.signals.get(name).map(|s| s.value_at(beat))
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Every signal sampled at `beat`, sorted by name.
    pub fn sample_all(&self, beat: f64) -> Vec<(String, f64)> {
        let mut values: Vec<(String, f64)> = self
            .signals
            .iter()
            .map(|(name, s)| (name.clone(), s.value_at(beat)))
            .collect();
        values.sort_by(|a, b| a.0.cmp(&b.0));
        values
    }
}
