// Where emitted events go, and who hears about run-time incidents.
//
// `EventSink` receives every dispatched event, in non-decreasing pulse order,
// on the scheduler's thread, plus every tempo change at the pulse it takes
// effect. Implementations must not block: a device driver should hand events
// to its own thread.
//
// `SchedulerObserver` is the out-of-band channel for everything that is not
// an event: lifecycle, chord and section changes, rebuild failures, underruns
// and background task failures. Methods default to no-ops and take `&self`,
// since task failures are reported from worker threads.
//
// See also: `recorder.rs` for the MIDI file sink.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError};
use subsequence_harmony::Chord;
use tracing::{debug, info, warn};

use crate::error::{RebuildError, TaskError};
use crate::event::{ALL_NOTES_OFF, EventKind, ScheduledEvent};
use crate::form::SectionInfo;

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

pub trait EventSink: Send {
    fn emit(&mut self, event: &ScheduledEvent);

    /// The tempo became `bpm` at `pulse`. Called for `set_bpm`, each step of
    /// a ramp, and changes in a followed clock's estimated tempo.
    fn tempo(&mut self, _pulse: u64, _bpm: f64) {}
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn emit(&mut self, event: &ScheduledEvent) {
        (**self).emit(event);
    }

    fn tempo(&mut self, pulse: u64, bpm: f64) {
        (**self).tempo(pulse, bpm);
    }
}

/// Keeps every event in a shared buffer. Clones see the same buffer, so a
/// test can keep one clone and hand the other to the scheduler.
#[derive(Clone, Debug, Default)]
pub struct CollectingSink {
    events: Arc<Mutex<Vec<ScheduledEvent>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything collected so far.
    pub fn events(&self) -> Vec<ScheduledEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Take everything collected so far, leaving the buffer empty.
    pub fn take(&self) -> Vec<ScheduledEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl EventSink for CollectingSink {
    fn emit(&mut self, event: &ScheduledEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Forwards events to another thread. A full channel drops a note or
/// controller event with a warning rather than stalling the clock. Releases
/// (NoteOff, NoteOn with velocity 0, all-notes-off) are never dropped: they
/// wait for room, so the receiving side must keep draining.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    sender: Sender<ScheduledEvent>,
}

impl ChannelSink {
    pub fn new(sender: Sender<ScheduledEvent>) -> Self {
        Self { sender }
    }
}

fn is_release(kind: &EventKind) -> bool {
    match kind {
        EventKind::NoteOff { .. } => true,
        EventKind::NoteOn { velocity, .. } => *velocity == 0,
        EventKind::ControlChange { controller, .. } => *controller == ALL_NOTES_OFF,
        _ => false,
    }
}

impl EventSink for ChannelSink {
    fn emit(&mut self, event: &ScheduledEvent) {
        if is_release(&event.kind) {
            // Only fails once the receiver is gone.
            let _ = self.sender.send(event.clone());
            return;
        }
        match self.sender.try_send(event.clone()) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                warn!(pulse = event.pulse, "event channel full; event dropped");
            }
        }
    }
}

/// Logs each event. Used by the demo binary's realtime mode in place of a
/// device driver.
#[derive(Clone, Debug)]
pub struct TracingSink {
    pulses_per_beat: u32,
}

impl TracingSink {
    pub fn new(pulses_per_beat: u32) -> Self {
        Self { pulses_per_beat }
    }
}

impl EventSink for TracingSink {
    fn emit(&mut self, event: &ScheduledEvent) {
        let beat = event.pulse as f64 / self.pulses_per_beat.max(1) as f64;
        match &event.kind {
            EventKind::NoteOn { note, velocity } => {
                info!(beat, channel = event.channel, note, velocity, "note on");
            }
            EventKind::NoteOff { .. } => {}
            kind => info!(beat, channel = event.channel, ?kind, "event"),
        }
    }

    fn tempo(&mut self, pulse: u64, bpm: f64) {
        let beat = pulse as f64 / self.pulses_per_beat.max(1) as f64;
        debug!(beat, bpm, "tempo");
    }
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

pub trait SchedulerObserver: Send + Sync {
    fn on_start(&self, _bpm: f64) {}
    fn on_stop(&self) {}
    fn on_bar(&self, _bar: u64) {}
    fn on_tempo(&self, _bpm: f64) {}
    fn on_chord(&self, _chord: Chord) {}
    /// `None` once the form has finished.
    fn on_section(&self, _section: Option<&SectionInfo>) {}
    fn on_rebuild(&self, _pattern: &str, _cycle: u64) {}
    fn on_rebuild_error(&self, _pattern: &str, _cycle: u64, _error: &RebuildError) {}
    /// A rebuild took longer than its lookahead; the previous cycle was
    /// replayed.
    fn on_underrun(&self, _pattern: &str, _cycle: u64, _elapsed: Duration) {}
    fn on_task_error(&self, _task: &str, _error: &TaskError) {}
}

/// Observer that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl SchedulerObserver for NoopObserver {}
