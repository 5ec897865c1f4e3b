// Chord graph strategies: how a harmonic style turns a key into a graph.
//
// A `ChordGraph` produces two things for a key:
// - `build`: a `WeightedGraph<Chord>` of allowed progressions plus the tonic.
// - `gravity_sets`: the diatonic and functional chord sets that
//   `HarmonicState` uses for key gravity.
//
// The harmonic engine does not care how many chords a style has or what
// qualities they carry. It requires only what `build_validated` checks: no
// dead ends, the tonic reachable from every node, and a functional set
// contained in the diatonic set.
//
// Built-in styles live in `styles.rs` and are reached by name through
// `Style::from_name` / `style_by_name`. Custom styles implement the trait
// directly; nothing needs registering.

use std::fmt;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::chord::{Chord, check_pitch_class};
use crate::error::HarmonyError;
use crate::styles;
use crate::weighted_graph::{GraphDefect, WeightedGraph};

/// Cadential pull (V -> I, ii -> V).
pub const WEIGHT_STRONG: u32 = 6;
/// Well-established motion that is not a cadence.
pub const WEIGHT_MEDIUM: u32 = 4;
/// Everyday diatonic motion.
pub const WEIGHT_COMMON: u32 = 3;
/// Deceptive resolution (V -> vi).
pub const WEIGHT_DECEPTIVE: u32 = 2;
/// Colour moves that should stay rare.
pub const WEIGHT_WEAK: u32 = 1;

/// The chord sets used for key gravity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GravitySets {
    /// Chords that belong to the key.
    pub diatonic: FxHashSet<Chord>,
    /// The smaller set of chords carrying the key's harmonic function.
    pub functional: FxHashSet<Chord>,
}

impl GravitySets {
    pub fn from_chords(
        diatonic: impl IntoIterator<Item = Chord>,
        functional: impl IntoIterator<Item = Chord>,
    ) -> Self {
        Self {
            diatonic: diatonic.into_iter().collect(),
            functional: functional.into_iter().collect(),
        }
    }
}

/// A harmonic style: builds a progression graph and gravity sets for a key.
///
/// `key` is the tonic pitch class, 0-11.
pub trait ChordGraph: Send + Sync {
    /// Registry name, e.g. `"functional_major"`.
    fn name(&self) -> &str;

    /// Build the progression graph for `key`, returning it with its tonic.
    fn build(&self, key: u8) -> Result<(WeightedGraph<Chord>, Chord), HarmonyError>;

    /// Diatonic and functional chord sets for `key`.
    fn gravity_sets(&self, key: u8) -> GravitySets;
}

/// A style's graph for one key, checked and ready for `HarmonicState`.
#[derive(Debug, Clone)]
pub struct BuiltGraph {
    pub graph: WeightedGraph<Chord>,
    pub tonic: Chord,
    pub gravity: GravitySets,
}

/// Build `style` for `key` and run every structural check.
pub fn build_validated(style: &dyn ChordGraph, key: u8) -> Result<BuiltGraph, HarmonyError> {
    let key = check_pitch_class(key)?;
    let (graph, tonic) = style.build(key)?;
    graph.validate(&tonic).map_err(|defect| match defect {
        GraphDefect::Empty => HarmonyError::EmptyGraph,
        GraphDefect::MissingHome(c) => HarmonyError::TonicMissing(c.name()),
        GraphDefect::DeadEnd(c) => HarmonyError::DeadEnd(c.name()),
        GraphDefect::Unreachable(c) => HarmonyError::UnreachableTonic(c.name()),
    })?;

    let gravity = style.gravity_sets(key);
    // Sorted so the reported chord does not depend on hash order.
    let mut stray: Vec<&Chord> = gravity.functional.difference(&gravity.diatonic).collect();
    stray.sort();
    if let Some(chord) = stray.first() {
        return Err(HarmonyError::NonConformingGravitySet(chord.name()));
    }

    Ok(BuiltGraph {
        graph,
        tonic,
        gravity,
    })
}

/// Build a graph from `(from, to, weight)` rows.
pub fn graph_from_edges(
    edges: &[(Chord, Chord, u32)],
) -> Result<WeightedGraph<Chord>, HarmonyError> {
    let mut graph = WeightedGraph::new();
    for &(from, to, weight) in edges {
        if !graph.add_transition(from, to, weight) {
            return Err(HarmonyError::ZeroWeight {
                from: from.name(),
                to: to.name(),
            });
        }
    }
    Ok(graph)
}

// ---------------------------------------------------------------------------
// Built-in style registry
// ---------------------------------------------------------------------------

/// The built-in harmonic styles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Style {
    FunctionalMajor,
    AeolianMinor,
    DorianMinor,
    PhrygianMinor,
    LydianMajor,
    Mixolydian,
    Suspended,
    ChromaticMediant,
    WholeTone,
    Diminished,
}

impl Style {
    pub const ALL: [Style; 10] = [
        Style::FunctionalMajor,
        Style::AeolianMinor,
        Style::DorianMinor,
        Style::PhrygianMinor,
        Style::LydianMajor,
        Style::Mixolydian,
        Style::Suspended,
        Style::ChromaticMediant,
        Style::WholeTone,
        Style::Diminished,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Style::FunctionalMajor => "functional_major",
            Style::AeolianMinor => "aeolian_minor",
            Style::DorianMinor => "dorian_minor",
            Style::PhrygianMinor => "phrygian_minor",
            Style::LydianMajor => "lydian_major",
            Style::Mixolydian => "mixolydian",
            Style::Suspended => "suspended",
            Style::ChromaticMediant => "chromatic_mediant",
            Style::WholeTone => "whole_tone",
            Style::Diminished => "diminished",
        }
    }

    /// Look a style up by registry name or one of the short aliases
    /// (`"major"`, `"minor"`, `"dark_techno"`).
    pub fn from_name(name: &str) -> Result<Style, HarmonyError> {
        match name {
            "major" => return Ok(Style::FunctionalMajor),
            "minor" => return Ok(Style::AeolianMinor),
            "dark_techno" => return Ok(Style::PhrygianMinor),
            _ => {}
        }
        Style::ALL
            .into_iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| HarmonyError::UnknownStyle(name.to_string()))
    }

    /// Instantiate the style. `dominant_7th` overrides the style's default
    /// for whether a V7 node is added; styles without a dominant ignore it.
    pub fn instance(self, dominant_7th: Option<bool>) -> Box<dyn ChordGraph> {
        match self {
            Style::FunctionalMajor => Box::new(styles::FunctionalMajor {
                dominant_7th: dominant_7th.unwrap_or(true),
            }),
            Style::AeolianMinor => Box::new(styles::AeolianMinor {
                dominant_7th: dominant_7th.unwrap_or(true),
            }),
            Style::DorianMinor => Box::new(styles::DorianMinor {
                dominant_7th: dominant_7th.unwrap_or(false),
            }),
            Style::PhrygianMinor => Box::new(styles::PhrygianMinor),
            Style::LydianMajor => Box::new(styles::LydianMajor {
                dominant_7th: dominant_7th.unwrap_or(true),
            }),
            Style::Mixolydian => Box::new(styles::Mixolydian),
            Style::Suspended => Box::new(styles::Suspended),
            Style::ChromaticMediant => Box::new(styles::ChromaticMediant),
            Style::WholeTone => Box::new(styles::WholeTone),
            Style::Diminished => Box::new(styles::Diminished),
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `Style::from_name(name)?.instance(dominant_7th)`.
pub fn style_by_name(
    name: &str,
    dominant_7th: Option<bool>,
) -> Result<Box<dyn ChordGraph>, HarmonyError> {
    Ok(Style::from_name(name)?.instance(dominant_7th))
}
