// Pitch classes, note names, and the `Chord` value type.
//
// A `Chord` is a root pitch class (0-11, C = 0) plus a `ChordQuality`. The
// quality fixes the interval stack, so two chords with the same root and
// quality are the same graph node. `Chord` is `Copy + Eq + Hash + Ord` so it
// can key the hash maps in `weighted_graph.rs` and the gravity sets in
// `chord_graph.rs`.
//
// MIDI pitches are handled as `i32` until they reach an event, so voicing
// arithmetic in `voice_leading.rs` can move below 0 or above 127 before the
// final clamp.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::HarmonyError;

/// Sharp-spelled pitch class names, indexed by pitch class.
pub const PITCH_CLASS_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Parse a note name such as `"C"`, `"F#"`, `"Bb"` or `"e"` into a pitch
/// class. A single sharp (`#`) or flat (`b`) is accepted.
pub fn parse_note_name(name: &str) -> Result<u8, HarmonyError> {
    let unknown = || HarmonyError::UnknownNoteName(name.to_string());
    let trimmed = name.trim();
    let mut chars = trimmed.chars();
    let letter = chars.next().ok_or_else(unknown)?;
    let natural: i32 = match letter.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return Err(unknown()),
    };
    let accidental = match chars.as_str() {
        "" => 0,
        "#" => 1,
        "b" => -1,
        _ => return Err(unknown()),
    };
    Ok((natural + accidental).rem_euclid(12) as u8)
}

/// Sharp-spelled name of a pitch class (taken mod 12).
pub fn note_name(pitch_class: u8) -> &'static str {
    PITCH_CLASS_NAMES[(pitch_class % 12) as usize]
}

/// Reject pitch classes outside 0..=11.
pub fn check_pitch_class(pitch_class: u8) -> Result<u8, HarmonyError> {
    if pitch_class < 12 {
        Ok(pitch_class)
    } else {
        Err(HarmonyError::PitchClassOutOfRange(pitch_class))
    }
}

/// Signed shortest motion from one pitch class to another, in -5..=6.
///
/// A tritone is reported as +6.
pub fn signed_interval(from: u8, to: u8) -> i32 {
    let diff = (to as i32 - from as i32).rem_euclid(12);
    if diff > 6 { diff - 12 } else { diff }
}

/// Chord qualities and their interval stacks above the root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChordQuality {
    Major,
    Minor,
    Diminished,
    Augmented,
    Dominant7,
    Major7,
    Minor7,
    HalfDiminished7,
    Sus2,
    Sus4,
}

impl ChordQuality {
    /// Semitones above the root, ascending, starting at 0.
    pub fn intervals(self) -> &'static [u8] {
        match self {
            ChordQuality::Major => &[0, 4, 7],
            ChordQuality::Minor => &[0, 3, 7],
            ChordQuality::Diminished => &[0, 3, 6],
            ChordQuality::Augmented => &[0, 4, 8],
            ChordQuality::Dominant7 => &[0, 4, 7, 10],
            ChordQuality::Major7 => &[0, 4, 7, 11],
            ChordQuality::Minor7 => &[0, 3, 7, 10],
            ChordQuality::HalfDiminished7 => &[0, 3, 6, 10],
            ChordQuality::Sus2 => &[0, 2, 7],
            ChordQuality::Sus4 => &[0, 5, 7],
        }
    }

    /// Suffix appended to the root name ("m", "dim", "7", ...).
    pub fn suffix(self) -> &'static str {
        match self {
            ChordQuality::Major => "",
            ChordQuality::Minor => "m",
            ChordQuality::Diminished => "dim",
            ChordQuality::Augmented => "+",
            ChordQuality::Dominant7 => "7",
            ChordQuality::Major7 => "maj7",
            ChordQuality::Minor7 => "m7",
            ChordQuality::HalfDiminished7 => "m7b5",
            ChordQuality::Sus2 => "sus2",
            ChordQuality::Sus4 => "sus4",
        }
    }

    /// Triad quality for a stacked third and fifth, as found when building
    /// chords on scale degrees. `None` for shapes that are not tertian triads.
    pub fn triad_from_shape(third: u8, fifth: u8) -> Option<ChordQuality> {
        match (third, fifth) {
            (4, 7) => Some(ChordQuality::Major),
            (3, 7) => Some(ChordQuality::Minor),
            (3, 6) => Some(ChordQuality::Diminished),
            (4, 8) => Some(ChordQuality::Augmented),
            _ => None,
        }
    }
}

/// A chord: root pitch class plus quality.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Chord {
    /// Root pitch class, 0-11.
    pub root: u8,
    pub quality: ChordQuality,
}

impl Chord {
    /// Build a chord. The root is reduced mod 12.
    pub fn new(root: u8, quality: ChordQuality) -> Self {
        Self {
            root: root % 12,
            quality,
        }
    }

    pub fn major(root: u8) -> Self {
        Self::new(root, ChordQuality::Major)
    }

    pub fn minor(root: u8) -> Self {
        Self::new(root, ChordQuality::Minor)
    }

    /// The interval stack of this chord's quality.
    pub fn intervals(&self) -> &'static [u8] {
        self.quality.intervals()
    }

    /// Pitch classes of the chord tones, root first.
    pub fn pitch_classes(&self) -> Vec<u8> {
        self.intervals()
            .iter()
            .map(|&i| (self.root + i) % 12)
            .collect()
    }

    /// Human-readable name, e.g. "Am", "G7", "F#dim".
    pub fn name(&self) -> String {
        format!("{}{}", note_name(self.root), self.quality.suffix())
    }

    /// Root-position MIDI pitches with the root at `root_midi`.
    pub fn tones(&self, root_midi: i32) -> Vec<i32> {
        self.intervals()
            .iter()
            .map(|&i| root_midi + i as i32)
            .collect()
    }

    /// The MIDI pitch of this chord's root nearest to `base`. A root exactly
    /// a tritone away resolves downward.
    pub fn root_midi_near(&self, base: i32) -> i32 {
        let up = (self.root as i32 - base).rem_euclid(12);
        if up <= 5 { base + up } else { base + up - 12 }
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", note_name(self.root), self.quality.suffix())
    }
}
