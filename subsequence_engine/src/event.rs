// Timed events and the two pulse-ordered queues the scheduler runs on.
//
// - `ScheduledEvent`: one output event at an absolute pulse. Copied into the
//   emission queue when its pattern is rebuilt and never mutated afterwards.
// - `EmissionQueue`: every event waiting to be sent to the sink.
// - `WakeQueue`: the run loop's wake-ups (harmony steps, form bars, task
//   firings, pattern rebuild deadlines).
//
// Both are min-heaps over `(pulse, class, sequence)`. `class` orders different
// kinds of item sharing a pulse; `sequence` is a monotonic insertion counter
// that makes the order total, so identical inputs always dispatch in
// identical order.
//
// See also: `scheduler.rs` for the loop that drains them, `sink.rs` for where
// emitted events go.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

use crate::pattern::PatternId;
use crate::task::TaskId;

// ---------------------------------------------------------------------------
// Output events
// ---------------------------------------------------------------------------

/// The payload of an output event. Channel-voice kinds carry 7-bit data.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8, velocity: u8 },
    ControlChange { controller: u8, value: u8 },
    /// Signed bend, -8192..=8191, 0 is centre.
    PitchBend { value: i16 },
    ProgramChange { program: u8 },
    /// Payload without the framing 0xF0/0xF7 bytes.
    SystemExclusive { data: Vec<u8> },
}

/// Controller number for "all notes off".
pub const ALL_NOTES_OFF: u8 = 123;

impl EventKind {
    /// Within a pulse, note-offs dispatch first so a note retriggered on the
    /// same pulse is not cut short by its predecessor's release.
    pub fn order_class(&self) -> u8 {
        match self {
            EventKind::NoteOff { .. } => 0,
            _ => 1,
        }
    }
}

/// An event at an absolute pulse on one channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub pulse: u64,
    /// MIDI channel, 0..=15.
    pub channel: u8,
    pub kind: EventKind,
}

// ---------------------------------------------------------------------------
// Generic pulse-ordered min-heap
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct Entry<T> {
    pulse: u64,
    class: u8,
    sequence: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.pulse == other.pulse && self.class == other.class && self.sequence == other.sequence
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the max-heap pops the smallest key.
        other
            .pulse
            .cmp(&self.pulse)
            .then_with(|| other.class.cmp(&self.class))
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Min-heap of items keyed by `(pulse, class, insertion order)`.
#[derive(Clone, Debug)]
pub struct PulseQueue<T> {
    heap: BinaryHeap<Entry<T>>,
    next_sequence: u64,
}

impl<T> Default for PulseQueue<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_sequence: 0,
        }
    }
}

impl<T> PulseQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pulse: u64, class: u8, item: T) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(Entry {
            pulse,
            class,
            sequence,
            item,
        });
    }

    pub fn peek_pulse(&self) -> Option<u64> {
        self.heap.peek().map(|e| e.pulse)
    }

    /// Pop the next item if its pulse is <= `up_to_pulse`.
    pub fn pop_if_ready(&mut self, up_to_pulse: u64) -> Option<(u64, T)> {
        if self.heap.peek().is_some_and(|e| e.pulse <= up_to_pulse) {
            self.heap.pop().map(|e| (e.pulse, e.item))
        } else {
            None
        }
    }

    /// Remove everything, returned in dispatch order.
    pub fn drain(&mut self) -> Vec<(u64, T)> {
        let mut out = Vec::with_capacity(self.heap.len());
        while let Some(e) = self.heap.pop() {
            out.push((e.pulse, e.item));
        }
        out
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Emission queue
// ---------------------------------------------------------------------------

/// Every event waiting to be dispatched, in output order.
#[derive(Clone, Debug, Default)]
pub struct EmissionQueue {
    queue: PulseQueue<ScheduledEvent>,
}

impl EmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, event: ScheduledEvent) {
        self.queue.push(event.pulse, event.kind.order_class(), event);
    }

    pub fn peek_pulse(&self) -> Option<u64> {
        self.queue.peek_pulse()
    }

    pub fn pop_if_ready(&mut self, up_to_pulse: u64) -> Option<ScheduledEvent> {
        self.queue.pop_if_ready(up_to_pulse).map(|(_, e)| e)
    }

    /// Discard-and-return everything still queued.
    pub fn drain(&mut self) -> Vec<ScheduledEvent> {
        self.queue.drain().into_iter().map(|(_, e)| e).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Wake queue
// ---------------------------------------------------------------------------

/// Something the run loop must do at a pulse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Wake {
    /// Choose the next chord.
    Harmony,
    /// Advance the form by one bar.
    Form,
    /// Submit a background task invocation.
    Task(TaskId),
    /// Rebuild a pattern's next cycle.
    Pattern(PatternId),
}

impl Wake {
    /// Harmony and form update the context that tasks and rebuilds read, so
    /// they go first within a pulse.
    pub fn order_class(self) -> u8 {
        match self {
            Wake::Harmony => 0,
            Wake::Form => 1,
            Wake::Task(_) => 2,
            Wake::Pattern(_) => 3,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct WakeQueue {
    queue: PulseQueue<Wake>,
}

impl WakeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, pulse: u64, wake: Wake) {
        self.queue.push(pulse, wake.order_class(), wake);
    }

    pub fn peek_pulse(&self) -> Option<u64> {
        self.queue.peek_pulse()
    }

    pub fn pop_if_ready(&mut self, up_to_pulse: u64) -> Option<(u64, Wake)> {
        self.queue.pop_if_ready(up_to_pulse)
    }

    pub fn clear(&mut self) {
        self.queue.drain();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
