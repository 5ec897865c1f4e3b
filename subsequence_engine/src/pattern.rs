// Patterns: what a rebuild hook sees and what it returns.
//
// A pattern is a named, fixed-length cycle on one MIDI channel. Before each
// cycle begins (one lookahead early), the scheduler calls the pattern's hook
// with a `RebuildContext` describing that cycle and copies the returned
// `EventSet` into the emission queue at `cycle start + offset`. The hook owns
// nothing the queue refers to: whatever it does with its own state afterwards
// cannot change events already scheduled.
//
// Offsets are in pulses relative to the cycle start. The `EventSet` helpers
// accept beats and convert using the cycle's pulses-per-beat. Events may
// extend past the cycle end (a long release); they are still scheduled.
//
// A hook may also change its pattern's length or lookahead with
// `set_length` / `set_lookahead`. The change applies to the cycle being built
// (its length decides when the next cycle starts) and every cycle after it.
//
// See also: `scheduler.rs` (`rebuild_pattern`) for the call site.

use serde::{Deserialize, Serialize};
use subsequence_harmony::Chord;
use subsequence_harmony::voice_leading::to_midi;
use subsequence_prng::SeqRng;

use crate::clock::beats_to_pulses;
use crate::error::{ConfigError, RebuildError};
use crate::event::EventKind;
use crate::form::SectionInfo;
use crate::shared_data::SharedData;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatternId(pub usize);

/// Default duration of a `hit_steps` hit, in beats.
pub const HIT_DURATION_BEATS: f64 = 0.1;

// ---------------------------------------------------------------------------
// Pattern declaration
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatternSpec {
    pub name: String,
    /// MIDI channel, 0..=15.
    pub channel: u8,
    /// Cycle length. Fractional lengths are allowed; patterns of different
    /// lengths drift against each other to form polyrhythms.
    pub length_beats: f64,
    /// How long before each cycle boundary the next cycle is built.
    pub lookahead_beats: f64,
    /// When set, the context carries the current chord voice-led from the
    /// previous one, with the root placed near this MIDI note.
    pub voice_leading_root: Option<u8>,
}

/// A validated `PatternSpec` converted to pulses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatternTiming {
    pub length_pulses: u64,
    pub lookahead_pulses: u64,
}

impl PatternSpec {
    /// A pattern with a one-beat lookahead (or the whole cycle, if shorter).
    pub fn new(name: impl Into<String>, channel: u8, length_beats: f64) -> Self {
        Self {
            name: name.into(),
            channel,
            length_beats,
            lookahead_beats: length_beats.clamp(0.0, 1.0),
            voice_leading_root: None,
        }
    }

    pub fn with_lookahead(mut self, beats: f64) -> Self {
        self.lookahead_beats = beats;
        self
    }

    pub fn with_voice_leading(mut self, root_midi: u8) -> Self {
        self.voice_leading_root = Some(root_midi);
        self
    }

    pub fn validate(&self, pulses_per_beat: u32) -> Result<PatternTiming, ConfigError> {
        if self.channel > 15 {
            return Err(ConfigError::InvalidChannel {
                name: self.name.clone(),
                channel: self.channel,
            });
        }
        let length_pulses = if self.length_beats.is_finite() {
            beats_to_pulses(self.length_beats, pulses_per_beat)
        } else {
            0
        };
        if length_pulses == 0 {
            return Err(ConfigError::PatternTooShort {
                name: self.name.clone(),
                beats: self.length_beats,
            });
        }
        if !(0.0..=self.length_beats).contains(&self.lookahead_beats) {
            return Err(ConfigError::InvalidLookahead {
                name: self.name.clone(),
                lookahead: self.lookahead_beats,
                length: self.length_beats,
            });
        }
        let lookahead_pulses =
            beats_to_pulses(self.lookahead_beats, pulses_per_beat).min(length_pulses);
        Ok(PatternTiming {
            length_pulses,
            lookahead_pulses,
        })
    }
}

// ---------------------------------------------------------------------------
// Event sets
// ---------------------------------------------------------------------------

/// One event at a pulse offset from its cycle's start.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternEvent {
    pub offset: u64,
    pub kind: EventKind,
}

/// The owned result of a rebuild.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventSet {
    pulses_per_beat: u32,
    length_pulses: u64,
    events: Vec<PatternEvent>,
    length_beats: Option<f64>,
    lookahead_beats: Option<f64>,
}

impl EventSet {
    pub fn new(pulses_per_beat: u32, length_pulses: u64) -> Self {
        Self {
            pulses_per_beat,
            length_pulses,
            events: Vec::new(),
            length_beats: None,
            lookahead_beats: None,
        }
    }

    /// Make this cycle, and the pattern from now on, `beats` long. Negative
    /// beat positions added afterwards count back from the new end. A length
    /// the pattern could not have been declared with is ignored.
    pub fn set_length(&mut self, beats: f64) -> &mut Self {
        self.length_beats = Some(beats);
        self.length_pulses = beats_to_pulses(beats, self.pulses_per_beat);
        self
    }

    /// Build later cycles `beats` before they start.
    pub fn set_lookahead(&mut self, beats: f64) -> &mut Self {
        self.lookahead_beats = Some(beats);
        self
    }

    pub fn requested_length(&self) -> Option<f64> {
        self.length_beats
    }

    pub fn requested_lookahead(&self) -> Option<f64> {
        self.lookahead_beats
    }

    pub fn has_timing_change(&self) -> bool {
        self.length_beats.is_some() || self.lookahead_beats.is_some()
    }

    /// A beat position to a pulse offset. Negative positions count back from
    /// the end of the cycle.
    fn offset(&self, beat: f64) -> u64 {
        if beat < 0.0 {
            self.length_pulses
                .saturating_sub(beats_to_pulses(-beat, self.pulses_per_beat))
        } else {
            beats_to_pulses(beat, self.pulses_per_beat)
        }
    }

    pub fn push(&mut self, offset: u64, kind: EventKind) -> &mut Self {
        self.events.push(PatternEvent { offset, kind });
        self
    }

    /// A note as a NoteOn/NoteOff pair. Durations shorter than a pulse are
    /// stretched to one pulse.
    pub fn note_at_pulse(&mut self, offset: u64, pitch: u8, velocity: u8, duration_pulses: u64) -> &mut Self {
        let pitch = pitch.min(127);
        self.push(
            offset,
            EventKind::NoteOn {
                note: pitch,
                velocity: velocity.min(127),
            },
        );
        self.push(
            offset + duration_pulses.max(1),
            EventKind::NoteOff {
                note: pitch,
                velocity: 0,
            },
        )
    }

    pub fn note(&mut self, beat: f64, pitch: u8, velocity: u8, duration_beats: f64) -> &mut Self {
        let offset = self.offset(beat);
        let duration = beats_to_pulses(duration_beats, self.pulses_per_beat);
        self.note_at_pulse(offset, pitch, velocity, duration)
    }

    /// Every pitch of `pitches` as simultaneous notes.
    pub fn chord(&mut self, beat: f64, pitches: &[u8], velocity: u8, duration_beats: f64) -> &mut Self {
        for &pitch in pitches {
            self.note(beat, pitch, velocity, duration_beats);
        }
        self
    }

    /// Short hits on a grid: the cycle is divided into `grid` equal steps and
    /// a hit is placed on each listed step. Steps outside the grid are
    /// ignored.
    pub fn hit_steps(&mut self, pitch: u8, steps: &[usize], grid: usize, velocity: u8) -> &mut Self {
        if grid == 0 {
            return self;
        }
        let duration = beats_to_pulses(HIT_DURATION_BEATS, self.pulses_per_beat);
        for &step in steps.iter().filter(|&&s| s < grid) {
            let offset =
                (step as f64 * self.length_pulses as f64 / grid as f64).round() as u64;
            self.note_at_pulse(offset, pitch, velocity, duration);
        }
        self
    }

    pub fn cc(&mut self, beat: f64, controller: u8, value: u8) -> &mut Self {
        let offset = self.offset(beat);
        self.push(
            offset,
            EventKind::ControlChange {
                controller: controller.min(127),
                value: value.min(127),
            },
        )
    }

    pub fn pitch_bend(&mut self, beat: f64, value: i16) -> &mut Self {
        let offset = self.offset(beat);
        self.push(
            offset,
            EventKind::PitchBend {
                value: value.clamp(-8192, 8191),
            },
        )
    }

    pub fn program_change(&mut self, beat: f64, program: u8) -> &mut Self {
        let offset = self.offset(beat);
        self.push(
            offset,
            EventKind::ProgramChange {
                program: program.min(127),
            },
        )
    }

    pub fn sysex(&mut self, beat: f64, data: Vec<u8>) -> &mut Self {
        let offset = self.offset(beat);
        self.push(offset, EventKind::SystemExclusive { data })
    }

    pub fn events(&self) -> &[PatternEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Rebuild context and hook
// ---------------------------------------------------------------------------

/// Everything a hook may read about the cycle it is building.
#[derive(Clone, Copy, Debug)]
pub struct RebuildContext<'a> {
    pub name: &'a str,
    pub channel: u8,
    /// Index of the cycle being built, from 0.
    pub cycle: u64,
    /// Absolute pulse the cycle starts on.
    pub start_pulse: u64,
    /// Bar the cycle starts in, from 0.
    pub bar: u64,
    pub pulses_per_beat: u32,
    pub length_pulses: u64,
    /// The chord sounding at the cycle start, if harmony is configured.
    pub chord: Option<Chord>,
    /// The key's pitch class, if harmony is configured.
    pub key: Option<u8>,
    /// `chord` voice-led from this pattern's previous voicing, when the
    /// pattern asked for voice leading.
    pub voicing: Option<&'a [i32]>,
    pub section: Option<&'a SectionInfo>,
    /// Conductor signals sampled at the cycle start, sorted by name.
    pub signals: &'a [(String, f64)],
    pub data: &'a SharedData,
    /// Seed for this pattern and cycle.
    pub seed: u64,
}

impl RebuildContext<'_> {
    /// A generator private to this pattern and cycle. Calling it twice gives
    /// two identical generators.
    pub fn rng(&self) -> SeqRng {
        SeqRng::new(self.seed)
    }

    pub fn signal(&self, name: &str) -> Option<f64> {
        self.signals
            .binary_search_by(|(n, _)| n.as_str().cmp(name))
            .ok()
            .map(|i| self.signals[i].1)
    }

    /// An empty event set sized for this cycle.
    pub fn events(&self) -> EventSet {
        EventSet::new(self.pulses_per_beat, self.length_pulses)
    }

    pub fn length_beats(&self) -> f64 {
        self.length_pulses as f64 / self.pulses_per_beat as f64
    }

    /// Voice-led chord as MIDI notes, if available.
    pub fn voiced_notes(&self) -> Option<Vec<u8>> {
        self.voicing.map(to_midi)
    }

    /// The current chord in root position with its root near `base_midi`.
    pub fn chord_notes(&self, base_midi: i32) -> Option<Vec<u8>> {
        let chord = self.chord?;
        Some(to_midi(&chord.tones(chord.root_midi_near(base_midi))))
    }
}

/// A pattern's rebuild function.
pub type RebuildHook = Box<dyn FnMut(&RebuildContext<'_>) -> Result<EventSet, RebuildError> + Send>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_converts_to_pulses() {
        let timing = PatternSpec::new("drums", 9, 4.0).validate(24).unwrap();
        assert_eq!(
            timing,
            PatternTiming {
                length_pulses: 96,
                lookahead_pulses: 24
            }
        );
        let short = PatternSpec::new("fill", 9, 0.5).validate(24).unwrap();
        assert_eq!(short.lookahead_pulses, 12);
    }

    #[test]
    fn invalid_specs_are_rejected() {
        assert!(matches!(
            PatternSpec::new("x", 16, 4.0).validate(24),
            Err(ConfigError::InvalidChannel { channel: 16, .. })
        ));
        assert!(matches!(
            PatternSpec::new("x", 0, 0.0).validate(24),
            Err(ConfigError::PatternTooShort { .. })
        ));
        assert!(matches!(
            PatternSpec::new("x", 0, 0.01).validate(24),
            Err(ConfigError::PatternTooShort { .. })
        ));
        assert!(matches!(
            PatternSpec::new("x", 0, 2.0).with_lookahead(3.0).validate(24),
            Err(ConfigError::InvalidLookahead { .. })
        ));
        assert!(matches!(
            PatternSpec::new("x", 0, 2.0).with_lookahead(-0.5).validate(24),
            Err(ConfigError::InvalidLookahead { .. })
        ));
    }

    #[test]
    fn note_expands_to_on_and_off() {
        let mut set = EventSet::new(24, 96);
        set.note(1.0, 60, 100, 0.5);
        assert_eq!(
            set.events(),
            &[
                PatternEvent {
                    offset: 24,
                    kind: EventKind::NoteOn {
                        note: 60,
                        velocity: 100
                    }
                },
                PatternEvent {
                    offset: 36,
                    kind: EventKind::NoteOff {
                        note: 60,
                        velocity: 0
                    }
                },
            ]
        );
    }

    #[test]
    fn set_length_moves_the_end_of_the_cycle() {
        let mut set = EventSet::new(24, 96);
        assert!(!set.has_timing_change());
        set.set_length(3.0).note(-1.0, 60, 100, 0.5);
        assert_eq!(set.events()[0].offset, 48);
        assert_eq!(set.requested_length(), Some(3.0));
        assert_eq!(set.requested_lookahead(), None);
        assert!(set.has_timing_change());
    }

    #[test]
    fn zero_duration_lasts_one_pulse() {
        let mut set = EventSet::new(24, 96);
        set.note_at_pulse(10, 60, 100, 0);
        assert_eq!(set.events()[1].offset, 11);
    }

    #[test]
    fn negative_beats_count_from_the_end() {
        let mut set = EventSet::new(24, 96);
        set.note(-0.5, 67, 90, 0.25);
        assert_eq!(set.events()[0].offset, 84);
    }

    #[test]
    fn hit_steps_divide_the_cycle() {
        let mut set = EventSet::new(24, 96);
        set.hit_steps(36, &[0, 4, 8, 12, 99], 16, 110);
        let ons: Vec<u64> = set
            .events()
            .iter()
            .filter(|e| matches!(e.kind, EventKind::NoteOn { .. }))
            .map(|e| e.offset)
            .collect();
        assert_eq!(ons, vec![0, 24, 48, 72]);
        // 0.1 beat at 24 PPQN rounds to 2 pulses.
        assert_eq!(set.events()[1].offset, 2);
    }

    #[test]
    fn hit_steps_on_a_triplet_grid() {
        let mut set = EventSet::new(24, 72);
        set.hit_steps(38, &[0, 1, 2], 3, 100);
        let ons: Vec<u64> = set.events().iter().step_by(2).map(|e| e.offset).collect();
        assert_eq!(ons, vec![0, 24, 48]);
    }

    #[test]
    fn controller_helpers_clamp() {
        let mut set = EventSet::new(24, 96);
        set.cc(0.0, 200, 200).pitch_bend(0.0, i16::MAX).program_change(0.0, 130);
        assert_eq!(
            set.events()[0].kind,
            EventKind::ControlChange {
                controller: 127,
                value: 127
            }
        );
        assert_eq!(set.events()[1].kind, EventKind::PitchBend { value: 8191 });
        assert_eq!(set.events()[2].kind, EventKind::ProgramChange { program: 127 });
    }

    fn ctx<'a>(data: &'a SharedData, signals: &'a [(String, f64)]) -> RebuildContext<'a> {
        RebuildContext {
            name: "p",
            channel: 0,
            cycle: 3,
            start_pulse: 288,
            bar: 3,
            pulses_per_beat: 24,
            length_pulses: 96,
            chord: Some(Chord::major(7)),
            key: Some(0),
            voicing: None,
            section: None,
            signals,
            data,
            seed: 1234,
        }
    }

    #[test]
    fn context_rng_is_reproducible() {
        let data = SharedData::new();
        let c = ctx(&data, &[]);
        assert_eq!(c.rng().next_u64(), c.rng().next_u64());
    }

    #[test]
    fn context_signal_lookup() {
        let data = SharedData::new();
        let signals = vec![("cutoff".to_string(), 0.3), ("swell".to_string(), 0.9)];
        let c = ctx(&data, &signals);
        assert_eq!(c.signal("swell"), Some(0.9));
        assert_eq!(c.signal("missing"), None);
        assert_eq!(c.length_beats(), 4.0);
    }

    #[test]
    fn chord_notes_sit_near_the_base() {
        let data = SharedData::new();
        let c = ctx(&data, &[]);
        // G major near C4 (60): G3 is 5 below, G4 is 7 above.
        assert_eq!(c.chord_notes(60), Some(vec![55, 59, 62]));
    }
}
