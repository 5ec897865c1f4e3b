// Diatonic modes and the triads built on their degrees.
//
// The built-in chord graph styles in `chord_graph.rs` need two things from a
// scale: the seven triads of a key (graph nodes) and the diatonic chord set
// used for key gravity. Both come from `Mode::diatonic_triads`, which stacks
// scale thirds on each degree and reads the resulting shape back as a
// `ChordQuality`. Nothing here stores per-mode quality tables; they fall out
// of the interval pattern.

use serde::{Deserialize, Serialize};

use crate::chord::{Chord, ChordQuality};

/// The seven rotations of the diatonic scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Major scale.
    Ionian,
    /// Minor with a raised 6th.
    Dorian,
    /// Minor with a lowered 2nd.
    Phrygian,
    /// Major with a raised 4th.
    Lydian,
    /// Major with a lowered 7th.
    Mixolydian,
    /// Natural minor.
    Aeolian,
    /// Diminished tonic; rarely used as a home key.
    Locrian,
}

impl Mode {
    pub const ALL: [Mode; 7] = [
        Mode::Ionian,
        Mode::Dorian,
        Mode::Phrygian,
        Mode::Lydian,
        Mode::Mixolydian,
        Mode::Aeolian,
        Mode::Locrian,
    ];

    /// Semitones from the tonic to each of the seven degrees.
    pub fn intervals(self) -> [u8; 7] {
        match self {
            Mode::Ionian => [0, 2, 4, 5, 7, 9, 11],
            Mode::Dorian => [0, 2, 3, 5, 7, 9, 10],
            Mode::Phrygian => [0, 1, 3, 5, 7, 8, 10],
            Mode::Lydian => [0, 2, 4, 6, 7, 9, 11],
            Mode::Mixolydian => [0, 2, 4, 5, 7, 9, 10],
            Mode::Aeolian => [0, 2, 3, 5, 7, 8, 10],
            Mode::Locrian => [0, 1, 3, 5, 6, 8, 10],
        }
    }

    /// Membership table of the mode's pitch classes in `key`.
    pub fn pitch_classes(self, key: u8) -> [bool; 12] {
        let mut pcs = [false; 12];
        for &interval in &self.intervals() {
            pcs[((key + interval) % 12) as usize] = true;
        }
        pcs
    }

    /// Triads on degrees 1-7 of the mode in `key`, built by stacking thirds.
    pub fn diatonic_triads(self, key: u8) -> [Chord; 7] {
        let steps = self.intervals();
        std::array::from_fn(|degree| {
            let root = steps[degree];
            let third = steps[(degree + 2) % 7];
            let fifth = steps[(degree + 4) % 7];
            let third_size = (third + 12 - root) % 12;
            let fifth_size = (fifth + 12 - root) % 12;
            // Every diatonic rotation yields a tertian triad; Major is only a
            // fallback for the type checker.
            let quality = ChordQuality::triad_from_shape(third_size, fifth_size)
                .unwrap_or(ChordQuality::Major);
            Chord::new(key + root, quality)
        })
    }
}
