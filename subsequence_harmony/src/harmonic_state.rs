// The harmonic decision engine: picks the next chord once per harmonic cycle.
//
// `HarmonicState` owns the validated chord graph for one key, the gravity
// sets, the tuning parameters, a bounded history of recent chords, and its own
// seeded generator. `advance()` scores every successor of the current chord
// and draws one:
//
//   weight = edge_weight * gravity * inertia * diversity   (floored at 1e-6)
//
// - gravity: `1 + (1 - g) * [functional] + g * [diatonic]`. At g = 0 only the
//   functional chords are boosted; at g = 1 every diatonic chord is.
// - inertia: melodic-expectation scoring of root motion (process, gap-fill,
//   proximity, closure), blended toward 1.0 by `nir_strength`.
// - diversity: `root_diversity ^ k` where k counts history entries sharing
//   the candidate's root.
//
// History starts as `[tonic]` and the chosen chord is appended after each
// draw, so the "most recent root motion" used by inertia is always the move
// from the previous chord to the current one.
//
// **Critical constraint: determinism.** Candidate order comes from the
// graph's insertion order and every draw consumes exactly one value from the
// generator. Same seed, same configuration, same call sequence: same chords.
//
// See also: `chord_graph.rs` for styles, `voice_leading.rs` for turning the
// chosen chord into pitches, and the engine's `scheduler.rs`, which advances
// this state on its own cycle and shares the current chord with patterns.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use subsequence_prng::SeqRng;
use tracing::{debug, warn};

use crate::chord::{Chord, signed_interval};
use crate::chord_graph::{BuiltGraph, ChordGraph, GravitySets, build_validated};
use crate::error::HarmonyError;
use crate::weighted_graph::WeightedGraph;

/// Default damping per history entry sharing a candidate's root.
pub const DEFAULT_ROOT_DIVERSITY: f64 = 0.4;

/// Default number of chords remembered, including the current one.
pub const DEFAULT_HISTORY_LEN: usize = 4;

/// Lower bound on any candidate's composite weight.
pub const MIN_WEIGHT: f64 = 1e-6;

// Inertia bonuses, added to a neutral score of 1.0.
const GAP_FILL_REVERSAL: f64 = 0.5;
const GAP_FILL_NARROWING: f64 = 0.3;
const PROCESS_CONTINUATION: f64 = 0.4;
const PROCESS_SIMILAR_STEP: f64 = 0.2;
const CLOSURE: f64 = 0.2;
const PROXIMITY: f64 = 0.3;

/// Tuning parameters for chord selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarmonyParams {
    /// 0 pulls toward the functional chords only, 1 spreads the pull over the
    /// whole diatonic set.
    pub gravity: f64,
    /// 0 is a pure weighted walk; 1 applies the full inertia scoring.
    pub nir_strength: f64,
    /// Per-occurrence damping for recently used roots. 1 disables it.
    pub root_diversity: f64,
    /// Chords remembered for diversity and inertia, including the current one.
    pub history_len: usize,
}

impl Default for HarmonyParams {
    fn default() -> Self {
        Self {
            gravity: 1.0,
            nir_strength: 0.5,
            root_diversity: DEFAULT_ROOT_DIVERSITY,
            history_len: DEFAULT_HISTORY_LEN,
        }
    }
}

impl HarmonyParams {
    /// Range-check every field.
    pub fn validate(&self) -> Result<(), HarmonyError> {
        unit_interval("gravity", self.gravity)?;
        unit_interval("nir_strength", self.nir_strength)?;
        if !(self.root_diversity > 0.0 && self.root_diversity <= 1.0) {
            return Err(HarmonyError::ParameterOutOfRange {
                name: "root_diversity",
                value: self.root_diversity,
                range: "(0, 1]",
            });
        }
        if self.history_len == 0 {
            return Err(HarmonyError::EmptyHistory);
        }
        Ok(())
    }
}

fn unit_interval(name: &'static str, value: f64) -> Result<(), HarmonyError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(HarmonyError::ParameterOutOfRange {
            name,
            value,
            range: "[0, 1]",
        })
    }
}

/// Current chord, key, graph and history for one harmonic voice.
#[derive(Debug, Clone)]
pub struct HarmonicState {
    key: u8,
    style_name: String,
    graph: WeightedGraph<Chord>,
    tonic: Chord,
    gravity_sets: GravitySets,
    params: HarmonyParams,
    current: Chord,
    history: VecDeque<Chord>,
    rng: SeqRng,
}

impl HarmonicState {
    /// Build the style's graph for `key`, validate it, and start on the tonic.
    pub fn new(
        style: &dyn ChordGraph,
        key: u8,
        params: HarmonyParams,
        seed: u64,
    ) -> Result<Self, HarmonyError> {
        params.validate()?;
        let BuiltGraph {
            graph,
            tonic,
            gravity,
        } = build_validated(style, key)?;
        debug!(style = style.name(), key, tonic = %tonic, "harmonic state ready");
        Ok(Self {
            key,
            style_name: style.name().to_string(),
            graph,
            tonic,
            gravity_sets: gravity,
            params,
            current: tonic,
            history: VecDeque::from([tonic]),
            rng: SeqRng::new(seed),
        })
    }

    pub fn current_chord(&self) -> Chord {
        self.current
    }

    pub fn key(&self) -> u8 {
        self.key
    }

    pub fn tonic(&self) -> Chord {
        self.tonic
    }

    pub fn style_name(&self) -> &str {
        &self.style_name
    }

    pub fn params(&self) -> HarmonyParams {
        self.params
    }

    pub fn graph(&self) -> &WeightedGraph<Chord> {
        &self.graph
    }

    /// Recent chords, oldest first. The last entry is the current chord.
    pub fn history(&self) -> impl ExactSizeIterator<Item = &Chord> {
        self.history.iter()
    }

    /// Replace the tuning parameters. History is trimmed if it shrank.
    pub fn set_params(&mut self, params: HarmonyParams) -> Result<(), HarmonyError> {
        params.validate()?;
        self.params = params;
        while self.history.len() > params.history_len {
            self.history.pop_front();
        }
        Ok(())
    }

    /// Switch to another style and/or key without forgetting history.
    ///
    /// The current chord survives if the new graph contains it; otherwise
    /// the state moves to the new tonic.
    pub fn restyle(&mut self, style: &dyn ChordGraph, key: u8) -> Result<(), HarmonyError> {
        let BuiltGraph {
            graph,
            tonic,
            gravity,
        } = build_validated(style, key)?;
        if !graph.contains(&self.current) {
            self.current = tonic;
            self.push_history(tonic);
        }
        self.key = key;
        self.style_name = style.name().to_string();
        self.graph = graph;
        self.tonic = tonic;
        self.gravity_sets = gravity;
        debug!(style = style.name(), key, current = %self.current, "harmony restyled");
        Ok(())
    }

    /// Composite weight of every successor of the current chord, in graph
    /// order. This is exactly the distribution `advance` draws from.
    pub fn candidate_weights(&self) -> Vec<(Chord, f64)> {
        self.graph
            .successors(&self.current)
            .iter()
            .map(|&(candidate, edge)| {
                let weight = edge as f64
                    * self.gravity_factor(&candidate)
                    * self.inertia_factor(&candidate)
                    * self.diversity_factor(&candidate);
                (candidate, weight.max(MIN_WEIGHT))
            })
            .collect()
    }

    /// Pick the next chord, make it current, and record it in history.
    pub fn advance(&mut self) -> Chord {
        let candidates = self.candidate_weights();
        let weights: Vec<f64> = candidates.iter().map(|&(_, w)| w).collect();
        let next = match self.rng.weighted_index(&weights) {
            Some(i) => candidates[i].0,
            None => {
                // Validation rules this out; staying put keeps playback going.
                warn!(chord = %self.current, "no successors; holding current chord");
                self.current
            }
        };
        debug!(from = %self.current, to = %next, "chord advanced");
        self.current = next;
        self.push_history(next);
        next
    }

    fn push_history(&mut self, chord: Chord) {
        self.history.push_back(chord);
        while self.history.len() > self.params.history_len {
            self.history.pop_front();
        }
    }

    fn gravity_factor(&self, candidate: &Chord) -> f64 {
        let g = self.params.gravity;
        let functional = self.gravity_sets.functional.contains(candidate) as u8 as f64;
        let diatonic = self.gravity_sets.diatonic.contains(candidate) as u8 as f64;
        1.0 + (1.0 - g) * functional + g * diatonic
    }

    fn inertia_factor(&self, candidate: &Chord) -> f64 {
        let strength = self.params.nir_strength;
        if strength == 0.0 {
            return 1.0;
        }
        let target = signed_interval(self.current.root, candidate.root);
        let mut score = 1.0;

        let len = self.history.len();
        if len >= 2 {
            let prev = signed_interval(self.history[len - 2].root, self.history[len - 1].root);
            let prev_size = prev.abs();
            if prev_size > 4 {
                if target != 0 && target.signum() != prev.signum() {
                    score += GAP_FILL_REVERSAL;
                    if target.abs() < prev_size {
                        score += GAP_FILL_NARROWING;
                    }
                }
            } else if (1..=2).contains(&prev_size) {
                if target != 0 && target.signum() == prev.signum() {
                    score += PROCESS_CONTINUATION;
                }
                if (target - prev).abs() <= 1 {
                    score += PROCESS_SIMILAR_STEP;
                }
            }
        }

        if *candidate == self.tonic {
            score += CLOSURE;
        }
        if (1..=3).contains(&target.abs()) {
            score += PROXIMITY;
        }

        1.0 + (score - 1.0) * strength
    }

    fn diversity_factor(&self, candidate: &Chord) -> f64 {
        let repeats = self
            .history
            .iter()
            .filter(|c| c.root == candidate.root)
            .count();
        self.params.root_diversity.powi(repeats as i32)
    }
}
