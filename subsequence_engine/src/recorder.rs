// MIDI file recorder sink.
//
// Captures dispatched events and encodes them as a Standard MIDI File with
// the `midly` crate: format 0 (one track), 480 ticks per quarter note, a
// tempo meta event at tick 0, and another wherever the tempo changed during
// the run (including every step of a ramp that moves the value). Pulses are
// scaled to ticks, so any pulses-per-beat setting records at the same
// musical positions.
//
// The recorder is a cheap cloneable handle; give one clone to the scheduler
// and keep the other to write the file after the run.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use midly::num::{u4, u7, u15, u24, u28};
use midly::{
    Format, Header, MetaMessage, MidiMessage, PitchBend, Smf, Timing, TrackEvent, TrackEventKind,
};

use crate::error::ExportError;
use crate::event::{EventKind, ScheduledEvent};
use crate::sink::EventSink;

pub const TICKS_PER_QUARTER: u16 = 480;

/// Microseconds per quarter note, as a tempo meta event stores it.
fn micros_per_quarter(bpm: f64) -> u32 {
    (60_000_000.0 / bpm).round().clamp(1.0, 0x00FF_FFFF as f64) as u32
}

#[derive(Clone, Debug)]
pub struct MidiRecorder {
    bpm: f64,
    pulses_per_beat: u32,
    events: Arc<Mutex<Vec<ScheduledEvent>>>,
    /// `(pulse, bpm)` in the order received.
    tempos: Arc<Mutex<Vec<(u64, f64)>>>,
}

impl MidiRecorder {
    pub fn new(bpm: f64, pulses_per_beat: u32) -> Self {
        Self {
            bpm,
            pulses_per_beat: pulses_per_beat.max(1),
            events: Arc::default(),
            tempos: Arc::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pulse_to_tick(&self, pulse: u64) -> u64 {
        (pulse * TICKS_PER_QUARTER as u64 + self.pulses_per_beat as u64 / 2)
            / self.pulses_per_beat as u64
    }

    /// Encode everything recorded so far.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ExportError> {
        let mut events = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        // Sinks receive events in pulse order, but be robust to a recorder fed
        // by hand.
        events.sort_by_key(|e| e.pulse);

        // SMF sysex payloads carry the terminating 0xF7 byte. Build them first
        // so the track can borrow them.
        let sysex: Vec<Vec<u8>> = events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::SystemExclusive { data } => {
                    let mut bytes: Vec<u8> = data.iter().map(|b| b & 0x7F).collect();
                    bytes.push(0xF7);
                    Some(bytes)
                }
                _ => None,
            })
            .collect();
        let mut sysex_iter = sysex.iter();

        let mut smf = Smf::new(Header::new(
            Format::SingleTrack,
            Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
        ));
        let mut tempos = self
            .tempos
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        // Stable, so changes at one pulse keep their order and the last wins.
        tempos.sort_by_key(|&(pulse, _)| pulse);
        let mut tempos = tempos.into_iter().peekable();

        let mut track = Vec::with_capacity(events.len() + 2);
        let mut tempo = micros_per_quarter(self.bpm);
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(tempo))),
        });

        let mut last_tick = 0u64;
        for event in &events {
            // Tempo changes go ahead of the events at their pulse.
            while let Some((pulse, bpm)) = tempos.next_if(|&(pulse, _)| pulse <= event.pulse) {
                let next = micros_per_quarter(bpm);
                if next == tempo {
                    continue;
                }
                tempo = next;
                let tick = self.pulse_to_tick(pulse);
                track.push(TrackEvent {
                    delta: u28::new(tick.saturating_sub(last_tick) as u32),
                    kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(tempo))),
                });
                last_tick = tick;
            }
            let tick = self.pulse_to_tick(event.pulse);
            let delta = tick.saturating_sub(last_tick) as u32;
            let channel = u4::new(event.channel);
            let kind = match &event.kind {
                EventKind::NoteOn { note, velocity } => TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::NoteOn {
                        key: u7::new(*note),
                        vel: u7::new(*velocity),
                    },
                },
                EventKind::NoteOff { note, velocity } => TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::NoteOff {
                        key: u7::new(*note),
                        vel: u7::new(*velocity),
                    },
                },
                EventKind::ControlChange { controller, value } => TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::Controller {
                        controller: u7::new(*controller),
                        value: u7::new(*value),
                    },
                },
                EventKind::PitchBend { value } => TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::PitchBend {
                        bend: PitchBend::from_int(*value),
                    },
                },
                EventKind::ProgramChange { program } => TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::ProgramChange {
                        program: u7::new(*program),
                    },
                },
                EventKind::SystemExclusive { .. } => match sysex_iter.next() {
                    Some(bytes) => TrackEventKind::SysEx(bytes),
                    None => continue,
                },
            };
            track.push(TrackEvent {
                delta: u28::new(delta),
                kind,
            });
            last_tick = tick;
        }
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });
        smf.tracks.push(track);

        let mut buf = Vec::new();
        smf.write_std(&mut buf).map_err(ExportError::Encode)?;
        Ok(buf)
    }

    /// Encode and write to `path`.
    pub fn write(&self, path: &Path) -> Result<(), ExportError> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes).map_err(|source| ExportError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl EventSink for MidiRecorder {
    fn emit(&mut self, event: &ScheduledEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }

    fn tempo(&mut self, pulse: u64, bpm: f64) {
        self.tempos
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((pulse, bpm));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(pulse: u64, kind: EventKind) -> ScheduledEvent {
        ScheduledEvent {
            pulse,
            channel: 2,
            kind,
        }
    }

    #[test]
    fn encodes_a_parseable_file() {
        let mut rec = MidiRecorder::new(120.0, 24);
        rec.emit(&ev(0, EventKind::NoteOn { note: 60, velocity: 90 }));
        rec.emit(&ev(24, EventKind::NoteOff { note: 60, velocity: 0 }));
        rec.emit(&ev(24, EventKind::ControlChange { controller: 1, value: 64 }));
        rec.emit(&ev(36, EventKind::PitchBend { value: -100 }));
        rec.emit(&ev(48, EventKind::SystemExclusive { data: vec![0x7E, 0x09] }));
        let bytes = rec.to_bytes().unwrap();

        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(smf.header.format, Format::SingleTrack);
        assert_eq!(smf.tracks.len(), 1);
        let track = &smf.tracks[0];
        assert_eq!(
            track[0].kind,
            TrackEventKind::Meta(MetaMessage::Tempo(u24::new(500_000)))
        );
        // Tempo, five events, end of track.
        assert_eq!(track.len(), 7);
        // One beat at 24 PPQN is 480 ticks.
        assert_eq!(track[2].delta.as_int(), 480);
        assert_eq!(track[3].delta.as_int(), 0);
        assert_eq!(track[4].delta.as_int(), 240);
        assert!(matches!(track[5].kind, TrackEventKind::SysEx(b) if b == &[0x7E, 0x09, 0xF7][..]));
    }

    #[test]
    fn tempo_changes_become_meta_events_at_their_pulse() {
        let mut rec = MidiRecorder::new(120.0, 24);
        rec.emit(&ev(0, EventKind::NoteOn { note: 60, velocity: 90 }));
        rec.tempo(24, 120.0);
        rec.tempo(24, 60.0);
        rec.emit(&ev(24, EventKind::NoteOff { note: 60, velocity: 0 }));
        rec.emit(&ev(48, EventKind::NoteOn { note: 62, velocity: 90 }));
        let bytes = rec.to_bytes().unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        let track = &smf.tracks[0];
        let tempos: Vec<(usize, u32)> = track
            .iter()
            .enumerate()
            .filter_map(|(i, e)| match e.kind {
                TrackEventKind::Meta(MetaMessage::Tempo(t)) => Some((i, t.as_int())),
                _ => None,
            })
            .collect();
        // The unchanged 120 is skipped; 60 BPM lands before the NoteOff.
        assert_eq!(tempos, vec![(0, 500_000), (2, 1_000_000)]);
        assert_eq!(track[2].delta.as_int(), 480);
        assert_eq!(track[3].delta.as_int(), 0);
    }

    #[test]
    fn pulses_scale_to_ticks() {
        let rec = MidiRecorder::new(120.0, 96);
        assert_eq!(rec.pulse_to_tick(96), 480);
        assert_eq!(rec.pulse_to_tick(1), 5);
    }

    #[test]
    fn clones_record_into_the_same_buffer() {
        let rec = MidiRecorder::new(100.0, 24);
        let mut sink: Box<dyn EventSink> = Box::new(rec.clone());
        sink.emit(&ev(0, EventKind::ProgramChange { program: 5 }));
        assert_eq!(rec.len(), 1);
    }

    #[test]
    fn write_reports_bad_paths() {
        let rec = MidiRecorder::new(120.0, 24);
        let err = rec
            .write(Path::new("/nonexistent-dir/definitely/missing.mid"))
            .unwrap_err();
        assert!(matches!(err, ExportError::Write { .. }));
    }
}
