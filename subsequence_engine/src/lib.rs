// subsequence_engine: real-time pattern scheduling for subsequence.
//
// A `Scheduler` owns one pulse clock and a set of patterns. Each pattern is
// rebuilt just before its next cycle begins, with the chord from the harmony
// engine (`subsequence_harmony`), the current form section, conductor
// signals, and whatever background tasks have written into `SharedData`.
// The rebuilt events go into a pulse-ordered emission queue and are handed to
// an `EventSink` when their pulse arrives.
//
// Module overview (leaf-first):
// - `error.rs`:          ConfigError (fatal, setup-time) vs. RebuildError /
//                        TaskError (contained, run-time) vs. ExportError.
// - `easing.rs`:         Easing curves for tempo ramps and conductor ramps.
// - `clock.rs`:          PulseClock (drift-free pulse from an anchor instant),
//                        TimingStrategy (sleep / sleep-then-spin), TempoRamp.
// - `event.rs`:          EventKind, ScheduledEvent, the generic pulse-ordered
//                        queue, EmissionQueue and WakeQueue.
// - `shared_data.rs`:    Thread-safe key-value context.
// - `config.rs`:         EngineConfig (serde/JSON) and harmony config.
// - `form.rs`:           Sections as a sequence or a weighted graph.
// - `conductor.rs`:      Named LFO and ramp signals sampled by beat.
// - `pattern.rs`:        PatternSpec, EventSet, RebuildContext, RebuildHook.
// - `task.rs`:           Periodic background tasks and their firing rule.
// - `worker_pool.rs`:    Bounded thread pool that runs tasks.
// - `sink.rs`:           EventSink implementations and SchedulerObserver.
// - `recorder.rs`:       Standard MIDI File recording sink (midly).
// - `external_clock.rs`: Follow a 24-tick-per-beat external clock.
// - `control.rs`:        SchedulerControl, live tempo/timing/form commands.
// - `scheduler.rs`:      The run loop tying all of the above together.
//
// The `subsequence` binary (`main.rs`) is a small demo composition.

pub mod clock;
pub mod conductor;
pub mod config;
pub mod control;
pub mod easing;
pub mod error;
pub mod event;
pub mod external_clock;
pub mod form;
pub mod pattern;
pub mod recorder;
pub mod scheduler;
pub mod shared_data;
pub mod sink;
pub mod task;
pub mod worker_pool;

pub use clock::{PulseClock, TimingStrategy};
pub use conductor::{Conductor, LfoShape, Signal};
pub use config::{EngineConfig, HarmonyConfig};
pub use control::SchedulerControl;
pub use easing::Easing;
pub use error::{ConfigError, ExportError, RebuildError, TaskError};
pub use event::{EventKind, ScheduledEvent};
pub use external_clock::ClockSignal;
pub use form::{FormSection, FormState, SectionInfo};
pub use pattern::{EventSet, PatternId, PatternSpec, RebuildContext, RebuildHook};
pub use recorder::MidiRecorder;
pub use scheduler::Scheduler;
pub use shared_data::SharedData;
pub use sink::{ChannelSink, CollectingSink, EventSink, SchedulerObserver, TracingSink};
pub use task::{ScheduleOptions, TaskContext, TaskFn, TaskId};
