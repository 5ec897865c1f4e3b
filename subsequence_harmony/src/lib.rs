// Harmonic decision engine for subsequence.
//
// Leaf-first module map:
// - `chord`: pitch classes, note names, `ChordQuality`, `Chord`.
// - `mode`: diatonic modes and their triads.
// - `weighted_graph`: generic weighted digraph with reachability validation.
// - `chord_graph`: the `ChordGraph` strategy trait, gravity sets, the
//   built-in style registry (`Style`), and `build_validated`.
// - `styles`: the ten built-in styles.
// - `harmonic_state`: `HarmonicState`, the per-cycle chord chooser.
// - `voice_leading`: `VoiceLeadingState`, the inversion chooser.
//
// The scheduling engine (`subsequence_engine`) owns one `HarmonicState`,
// advances it on the harmonic cycle, and hands the current chord to pattern
// rebuild hooks.

pub mod chord;
pub mod chord_graph;
pub mod error;
pub mod harmonic_state;
pub mod mode;
pub mod styles;
pub mod voice_leading;
pub mod weighted_graph;

pub use chord::{Chord, ChordQuality, note_name, parse_note_name};
pub use chord_graph::{ChordGraph, GravitySets, Style, build_validated, style_by_name};
pub use error::HarmonyError;
pub use harmonic_state::{HarmonicState, HarmonyParams};
pub use mode::Mode;
pub use voice_leading::VoiceLeadingState;
pub use weighted_graph::{GraphDefect, WeightedGraph};
