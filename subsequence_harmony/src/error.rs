// Error type for the harmony crate.
//
// Every failure here is a configuration-time failure: bad note names, out of
// range parameters, or a chord graph that could strand the harmonic state.
// None of these can occur once a `HarmonicState` has been built, so
// `HarmonicState::advance` is infallible.

use thiserror::Error;

/// Errors raised while building chord graphs or harmonic state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HarmonyError {
    /// A key or note name that does not parse (e.g. "H", "C##").
    #[error("unknown note name {0:?}")]
    UnknownNoteName(String),

    /// A pitch class outside 0..=11.
    #[error("pitch class {0} is outside 0..=11")]
    PitchClassOutOfRange(u8),

    /// No built-in chord graph style carries this name.
    #[error("unknown chord graph style {0:?}")]
    UnknownStyle(String),

    /// A tuning parameter outside its allowed interval.
    #[error("{name} must be in {range}, got {value}")]
    ParameterOutOfRange {
        name: &'static str,
        value: f64,
        range: &'static str,
    },

    /// History must hold at least the current chord.
    #[error("history length must be at least 1")]
    EmptyHistory,

    /// Edge weights are relative likelihoods and must be positive.
    #[error("transition {from} -> {to} has zero weight")]
    ZeroWeight { from: String, to: String },

    /// A graph with no nodes at all.
    #[error("chord graph is empty")]
    EmptyGraph,

    /// The tonic returned by a style is not part of its own graph.
    #[error("tonic {0} is not a node of the chord graph")]
    TonicMissing(String),

    /// A node with no successors would halt progression.
    #[error("chord {0} has no outgoing transitions")]
    DeadEnd(String),

    /// The tonic cannot be reached from this node.
    #[error("tonic is unreachable from chord {0}")]
    UnreachableTonic(String),

    /// A functional chord that is missing from the diatonic set.
    #[error("functional chord {0} is not in the diatonic set")]
    NonConformingGravitySet(String),
}
