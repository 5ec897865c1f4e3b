// The scheduler: pulse loop, just-in-time rebuilds, and event dispatch.
//
// One thread owns pulse time. For every pulse, in order:
//
// 1. Apply commands sent through `SchedulerControl`, then step any tempo
//    ramp.
// 2. Pop due wake-ups in class order (see `event::Wake`):
//    - Harmony chooses the chord for the next harmonic cycle.
//    - Form advances one bar.
//    - Tasks submit an invocation to the worker pool (never waiting on it).
//    - Patterns call their rebuild hook for the next cycle and copy the
//      resulting events into the emission queue at absolute pulses.
// 3. On a bar boundary, notify the observer of the bar and any chord or
//    section that takes effect here.
// 4. Dispatch every queued event due at or before this pulse to the sink,
//    tracking which notes are sounding.
//
// Harmony and form decide ahead of the boundary they apply to. Each decision
// is recorded against the pulse it takes effect at, so a rebuild reads the
// chord and section of the cycle it is building, not whatever happens to be
// current when it runs. Pattern lookaheads are capped at the harmony
// lookahead, so that chord is always decided in time, and the form decides
// bars as far ahead as the longest pattern lookahead, several bars if need be.
//
// Three ways to drive the loop share all of the above:
// - `run_realtime` / `advance`: wall-clock pulses from `PulseClock`.
// - `render`: simulated time, as fast as possible. Never underruns.
// - `run_following`: pulses from an external clock's ticks.
//
// Failure isolation: a rebuild error or panic leaves that cycle silent; a
// rebuild that overruns its lookahead in realtime replays the previous cycle
// instead; task failures are contained on the worker. None of these stop the
// clock. Only configuration errors, raised before playback, are fatal.
// Stopping never waits on a task still running: the worker pool is told to
// stop, the note-off flush goes out, and busy workers are detached after a
// short grace period.
//
// See also: `pattern.rs`, `task.rs`, `event.rs`, `clock.rs`.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use subsequence_harmony::{Chord, HarmonicState, VoiceLeadingState};
use subsequence_prng::SeqRng;
use tracing::{debug, error, info, warn};

use crate::clock::{PulseClock, TempoRamp, TimingStrategy, beats_to_pulses};
use crate::conductor::Conductor;
use crate::config::EngineConfig;
use crate::control::{Command, SchedulerControl, check_bpm, check_ramp_beats, command_channel};
use crate::easing::Easing;
use crate::error::{ConfigError, RebuildError, panic_message};
use crate::event::{ALL_NOTES_OFF, EmissionQueue, EventKind, ScheduledEvent, Wake, WakeQueue};
use crate::external_clock::{ClockFollower, ClockSignal, Transition};
use crate::form::{FormState, SectionInfo};
use crate::pattern::{EventSet, PatternId, PatternSpec, PatternTiming, RebuildContext, RebuildHook};
use crate::shared_data::SharedData;
use crate::sink::{EventSink, NoopObserver, SchedulerObserver};
use crate::task::{ScheduleOptions, ScheduledTask, TaskFn, TaskId, run_task};
use crate::worker_pool::WorkerPool;

/// How many decisions a timeline remembers beyond those still ahead of the
/// current pulse.
const TIMELINE_DEPTH: usize = 4;

/// How long `stop` waits for busy workers, after the flush, before
/// detaching them.
const STOP_GRACE: Duration = Duration::from_millis(100);

/// Poll interval for the stop flag while waiting on an external clock.
const FOLLOW_POLL: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

/// Values decided ahead of time, keyed by the pulse they take effect at.
#[derive(Debug)]
struct Timeline<T> {
    entries: VecDeque<(u64, T)>,
    depth: usize,
}

impl<T> Timeline<T> {
    fn starting_with(value: T) -> Self {
        Self {
            entries: VecDeque::from([(0, value)]),
            depth: TIMELINE_DEPTH,
        }
    }

    /// Remember `ahead` more decisions than the default. For values decided
    /// several boundaries early.
    fn keep_ahead(&mut self, ahead: usize) {
        self.depth = TIMELINE_DEPTH + ahead;
    }

    fn push(&mut self, pulse: u64, value: T) {
        self.entries.push_back((pulse, value));
        while self.entries.len() > self.depth {
            self.entries.pop_front();
        }
    }

    /// The value in effect at `pulse`.
    fn at(&self, pulse: u64) -> Option<&T> {
        self.entries
            .iter()
            .rev()
            .find(|(p, _)| *p <= pulse)
            .or_else(|| self.entries.front())
            .map(|(_, v)| v)
    }

    /// The value taking effect exactly at `pulse`, if any.
    fn starting_at(&self, pulse: u64) -> Option<&T> {
        self.entries.iter().find(|(p, _)| *p == pulse).map(|(_, v)| v)
    }
}

struct HarmonyClock {
    state: HarmonicState,
    cycle_pulses: u64,
    lookahead_pulses: u64,
    /// Pulse at which the next decided chord takes effect.
    next_change: u64,
    timeline: Timeline<Chord>,
}

impl HarmonyClock {
    fn chord_at(&self, pulse: u64) -> Chord {
        self.timeline
            .at(pulse)
            .copied()
            .unwrap_or_else(|| self.state.current_chord())
    }
}

#[derive(Clone, Debug)]
struct FormSnapshot {
    section: Option<SectionInfo>,
    changed: bool,
}

struct FormClock {
    state: FormState,
    lookahead_pulses: u64,
    next_bar: u64,
    /// Section to enter at `next_bar` instead of counting a bar.
    pending_jump: Option<String>,
    timeline: Timeline<FormSnapshot>,
}

struct PatternSlot {
    spec: PatternSpec,
    timing: PatternTiming,
    /// `timing.lookahead_pulses`, capped by the harmony and form lookaheads.
    lookahead_pulses: u64,
    hook: RebuildHook,
    seed: u64,
    next_cycle: u64,
    next_start: u64,
    /// Last successful result, replayed on an underrun.
    fallback: Option<EventSet>,
    voice: VoiceLeadingState,
    voiced_chord: Option<Chord>,
    voicing: Vec<i32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Drive {
    Realtime,
    Render,
    Following,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct Scheduler {
    config: EngineConfig,
    pulses_per_beat: u32,
    pulses_per_bar: u64,
    clock: PulseClock,
    strategy: TimingStrategy,
    sink: Box<dyn EventSink>,
    observer: Arc<dyn SchedulerObserver>,
    data: SharedData,
    stop_flag: Arc<AtomicBool>,
    seed: u64,
    seeds: SeqRng,
    form_seed: u64,

    patterns: Vec<PatternSlot>,
    tasks: Vec<ScheduledTask>,
    pool: Option<WorkerPool>,
    harmony: Option<HarmonyClock>,
    form: Option<FormClock>,
    conductor: Conductor,

    wakes: WakeQueue,
    queue: EmissionQueue,
    /// Sounding notes as `(channel, note)`, with how many NoteOns of each
    /// are still unmatched.
    active_notes: BTreeMap<(u8, u8), u32>,
    control: SchedulerControl,
    commands: Receiver<Command>,
    next_pulse: u64,
    ramp: Option<TempoRamp>,
    phase: Phase,
    drive: Drive,
}

impl Scheduler {
    /// Validate `config` and build an idle scheduler. Harmony configured in
    /// `config` is built here, so a bad style or key fails now.
    pub fn new(config: EngineConfig, sink: impl EventSink + 'static) -> Result<Self, ConfigError> {
        config.validate()?;
        let seed = config.resolve_seed();
        let mut seeds = SeqRng::new(seed);
        let harmony_seed = seeds.derive_seed();
        let form_seed = seeds.derive_seed();
        let (control, commands) = command_channel();

        let mut scheduler = Self {
            pulses_per_beat: config.pulses_per_beat,
            pulses_per_bar: config.pulses_per_bar(),
            clock: PulseClock::new(config.bpm, config.pulses_per_beat),
            strategy: config.timing.strategy(),
            sink: Box::new(sink),
            observer: Arc::new(NoopObserver),
            data: SharedData::new(),
            stop_flag: Arc::new(AtomicBool::new(false)),
            seed,
            seeds,
            form_seed,
            patterns: Vec::new(),
            tasks: Vec::new(),
            pool: None,
            harmony: None,
            form: None,
            conductor: Conductor::new(),
            wakes: WakeQueue::new(),
            queue: EmissionQueue::new(),
            active_notes: BTreeMap::new(),
            control,
            commands,
            next_pulse: 0,
            ramp: None,
            phase: Phase::Idle,
            drive: Drive::Realtime,
            config,
        };
        if let Some(harmony) = scheduler.config.harmony.clone() {
            let state = harmony.build_state(harmony_seed)?;
            scheduler.set_harmony(state, harmony.cycle_beats, harmony.lookahead_beats)?;
        }
        info!(seed, bpm = scheduler.config.bpm, "scheduler ready");
        Ok(scheduler)
    }

    fn ensure_idle(&self) -> Result<(), ConfigError> {
        if self.phase == Phase::Idle {
            Ok(())
        } else {
            Err(ConfigError::AlreadyStarted)
        }
    }

    // -- setup ---------------------------------------------------------------

    /// Register a pattern. Patterns rebuild in registration order when their
    /// deadlines coincide.
    pub fn add_pattern(&mut self, spec: PatternSpec, hook: RebuildHook) -> Result<PatternId, ConfigError> {
        self.ensure_idle()?;
        let timing = spec.validate(self.pulses_per_beat)?;
        if self.patterns.iter().any(|p| p.spec.name == spec.name) {
            return Err(ConfigError::DuplicatePattern(spec.name));
        }
        let id = PatternId(self.patterns.len());
        debug!(pattern = %spec.name, length = timing.length_pulses, "pattern added");
        self.patterns.push(PatternSlot {
            lookahead_pulses: timing.lookahead_pulses,
            timing,
            hook,
            seed: self.seeds.derive_seed(),
            next_cycle: 0,
            next_start: 0,
            fallback: None,
            voice: VoiceLeadingState::new(),
            voiced_chord: None,
            voicing: Vec::new(),
            spec,
        });
        Ok(id)
    }

    /// Use `state` for chords, changing every `cycle_beats`, decided
    /// `lookahead_beats` before each change. Replaces any harmony from the
    /// config.
    pub fn set_harmony(
        &mut self,
        state: HarmonicState,
        cycle_beats: f64,
        lookahead_beats: f64,
    ) -> Result<(), ConfigError> {
        self.ensure_idle()?;
        let cycle_pulses = if cycle_beats.is_finite() {
            beats_to_pulses(cycle_beats, self.pulses_per_beat)
        } else {
            0
        };
        if cycle_pulses == 0 {
            return Err(ConfigError::InvalidHarmonyCycle(cycle_beats));
        }
        if !(0.0..=cycle_beats).contains(&lookahead_beats) {
            return Err(ConfigError::InvalidLookahead {
                name: "harmony".into(),
                lookahead: lookahead_beats,
                length: cycle_beats,
            });
        }
        let lookahead_pulses = beats_to_pulses(lookahead_beats, self.pulses_per_beat).min(cycle_pulses);
        let timeline = Timeline::starting_with(state.current_chord());
        self.harmony = Some(HarmonyClock {
            state,
            cycle_pulses,
            lookahead_pulses,
            next_change: cycle_pulses,
            timeline,
        });
        Ok(())
    }

    pub fn set_form(&mut self, form: FormState) -> Result<(), ConfigError> {
        self.ensure_idle()?;
        let snapshot = FormSnapshot {
            section: form.current(),
            changed: true,
        };
        self.form = Some(FormClock {
            state: form,
            lookahead_pulses: 0,
            next_bar: self.pulses_per_bar,
            pending_jump: None,
            timeline: Timeline::starting_with(snapshot),
        });
        Ok(())
    }

    pub fn set_conductor(&mut self, conductor: Conductor) {
        self.conductor = conductor;
    }

    pub fn set_observer(&mut self, observer: Arc<dyn SchedulerObserver>) {
        self.observer = observer;
    }

    /// Register a background task run every `period_beats`.
    pub fn schedule(
        &mut self,
        name: &str,
        period_beats: f64,
        callback: TaskFn,
        options: ScheduleOptions,
    ) -> Result<TaskId, ConfigError> {
        self.ensure_idle()?;
        let period_pulses = if period_beats.is_finite() {
            beats_to_pulses(period_beats, self.pulses_per_beat)
        } else {
            0
        };
        if period_pulses == 0 {
            return Err(ConfigError::InvalidTaskPeriod {
                name: name.to_string(),
                beats: period_beats,
            });
        }
        let lookahead_pulses = beats_to_pulses(options.lookahead_beats.max(0.0), self.pulses_per_beat)
            .min(period_pulses);
        let id = TaskId(self.tasks.len());
        self.tasks.push(ScheduledTask {
            name: Arc::from(name),
            callback,
            options,
            period_pulses,
            lookahead_pulses,
            next_period_start: 0,
            cycle: 0,
        });
        Ok(id)
    }

    pub fn set_timing_strategy(&mut self, strategy: TimingStrategy) {
        self.strategy = strategy;
    }

    // -- accessors -----------------------------------------------------------

    /// Handle to the key-value context shared with tasks and rebuild hooks.
    pub fn data(&self) -> SharedData {
        self.data.clone()
    }

    /// Handle for changing tempo, timing strategy and form while the
    /// scheduler runs.
    pub fn control(&self) -> SchedulerControl {
        self.control.clone()
    }

    /// Setting this flag makes a running loop stop (with the full note-off
    /// flush) at the next pulse.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_flag)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Seed reserved for a graph-mode form, derived from the master seed.
    pub fn form_seed(&self) -> u64 {
        self.form_seed
    }

    /// The next pulse to be processed.
    pub fn pulse(&self) -> u64 {
        self.next_pulse
    }

    pub fn bpm(&self) -> f64 {
        self.clock.bpm()
    }

    pub fn pulses_per_beat(&self) -> u32 {
        self.pulses_per_beat
    }

    pub fn pulses_per_bar(&self) -> u64 {
        self.pulses_per_bar
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    pub fn timing_strategy(&self) -> TimingStrategy {
        self.strategy
    }

    /// The chord sounding at the next pulse.
    pub fn current_chord(&self) -> Option<Chord> {
        self.harmony.as_ref().map(|h| h.chord_at(self.next_pulse))
    }

    pub fn harmony_mut(&mut self) -> Option<&mut HarmonicState> {
        self.harmony.as_mut().map(|h| &mut h.state)
    }

    /// The form's state as of the furthest bar decided so far.
    pub fn form(&self) -> Option<&FormState> {
        self.form.as_ref().map(|f| &f.state)
    }

    pub fn section(&self) -> Option<SectionInfo> {
        self.form
            .as_ref()
            .and_then(|f| f.timeline.at(self.next_pulse))
            .and_then(|s| s.section.clone())
    }

    /// Notes currently sounding, as `(channel, note)`. A note struck again
    /// before its release is listed once.
    pub fn active_notes(&self) -> impl Iterator<Item = &(u8, u8)> {
        self.active_notes.keys()
    }

    // -- tempo ---------------------------------------------------------------

    /// Jump to a new tempo, cancelling any ramp. Ignored while following an
    /// external clock. Use `control().set_bpm` while running.
    pub fn set_bpm(&mut self, bpm: f64) -> Result<(), ConfigError> {
        check_bpm(bpm)?;
        if self.drive == Drive::Following && self.phase == Phase::Running {
            debug!(bpm, "tempo is set by the external clock; set_bpm ignored");
            return Ok(());
        }
        self.ramp = None;
        if self.phase == Phase::Running {
            self.clock.set_bpm_at_pulse(bpm, self.next_pulse);
        } else {
            self.clock.set_bpm(bpm, Instant::now());
        }
        info!(bpm, "tempo set");
        self.sink.tempo(self.next_pulse, bpm);
        self.observer.on_tempo(bpm);
        Ok(())
    }

    /// Move smoothly to `target` over `beats`, shaped by `easing`. Ignored
    /// while following an external clock.
    pub fn ramp_bpm(&mut self, target: f64, beats: f64, easing: Easing) -> Result<(), ConfigError> {
        check_bpm(target)?;
        check_ramp_beats(beats)?;
        let pulses = beats_to_pulses(beats, self.pulses_per_beat);
        if pulses == 0 {
            return Err(ConfigError::InvalidRamp(beats));
        }
        if self.drive == Drive::Following && self.phase == Phase::Running {
            debug!(target, "tempo is set by the external clock; ramp ignored");
            return Ok(());
        }
        info!(from = self.clock.bpm(), to = target, beats, ?easing, "tempo ramp");
        self.ramp = Some(TempoRamp::new(self.clock.bpm(), target, pulses, easing));
        Ok(())
    }

    // -- run -----------------------------------------------------------------

    /// Begin playback at `now`. Runs `wait_for_initial` tasks on this thread
    /// first, then queues the first wake-up of everything. Pulse 0 is
    /// processed by the first `advance`.
    pub fn start(&mut self, now: Instant) -> Result<(), ConfigError> {
        self.ensure_idle()?;
        self.pool = Some(WorkerPool::new(
            self.config.workers.threads,
            self.config.workers.queue_capacity,
        )?);

        // Patterns never look further ahead than harmony decides.
        let harmony_lookahead = self.harmony.as_ref().map(|h| h.lookahead_pulses);
        for slot in &mut self.patterns {
            slot.lookahead_pulses = cap_lookahead(slot.timing.lookahead_pulses, harmony_lookahead);
        }

        for id in 0..self.tasks.len() {
            let task = &mut self.tasks[id];
            if task.options.wait_for_initial {
                info!(task = %task.name, "running initial task invocation before start");
                let ctx = task.next_invocation(&self.data);
                run_task(&task.name, &task.callback, &ctx, &self.observer);
            } else if task.options.defer {
                task.next_period_start = task.period_pulses;
                task.cycle = 0;
            }
            let fire = task.fire_pulse();
            self.wakes.schedule(fire, Wake::Task(TaskId(id)));
        }

        if let Some(harmony) = &self.harmony {
            self.wakes.schedule(
                harmony.next_change - harmony.lookahead_pulses,
                Wake::Harmony,
            );
            let chord = harmony.state.current_chord();
            debug!(chord = %chord, "initial chord");
            self.observer.on_chord(chord);
        }

        if let Some(form) = &mut self.form {
            // Decide each bar's section early enough for the longest pattern
            // lookahead to see it, even when that spans several bars.
            let longest = self
                .patterns
                .iter()
                .map(|p| p.lookahead_pulses)
                .max()
                .unwrap_or(0);
            form.lookahead_pulses = longest.max(self.pulses_per_beat as u64);
            let bars_ahead = form.lookahead_pulses.div_ceil(self.pulses_per_bar) as usize;
            form.timeline.keep_ahead(bars_ahead);
            self.wakes.schedule(
                form.next_bar.saturating_sub(form.lookahead_pulses),
                Wake::Form,
            );
            let section = form.state.current();
            match &section {
                Some(s) => info!(section = %s.name, "form started"),
                None => info!("form is empty"),
            }
            self.observer.on_section(section.as_ref());
        }

        for id in 0..self.patterns.len() {
            self.wakes.schedule(0, Wake::Pattern(PatternId(id)));
        }

        self.clock.start(now);
        self.next_pulse = 0;
        self.phase = Phase::Running;
        info!(
            bpm = self.clock.bpm(),
            patterns = self.patterns.len(),
            tasks = self.tasks.len(),
            "playback started"
        );
        self.observer.on_start(self.clock.bpm());
        Ok(())
    }

    /// Process every pulse up to the clock's current pulse at `now` and
    /// return that pulse.
    pub fn advance(&mut self, now: Instant) -> u64 {
        let target = self.clock.advance(now);
        self.process_through(target);
        target
    }

    fn process_through(&mut self, target: u64) {
        while self.phase == Phase::Running && self.next_pulse <= target {
            let pulse = self.next_pulse;
            self.process_pulse(pulse);
            self.next_pulse = pulse + 1;
        }
    }

    /// Play against the wall clock until the stop flag is set or, if given,
    /// `max_pulses` pulses have been processed. Stops (with the note-off
    /// flush) before returning.
    pub fn run_realtime(&mut self, max_pulses: Option<u64>) -> Result<(), ConfigError> {
        self.drive = Drive::Realtime;
        if self.phase == Phase::Idle {
            self.start(Instant::now())?;
        }
        while self.phase == Phase::Running && !self.stop_flag.load(Ordering::Relaxed) {
            if max_pulses.is_some_and(|max| self.next_pulse >= max) {
                break;
            }
            if let Some(deadline) = self.clock.pulse_instant(self.next_pulse) {
                self.strategy.wait_until(deadline);
            }
            let target = self.clock.advance(Instant::now());
            let target = match max_pulses {
                Some(max) => target.min(max.saturating_sub(1)),
                None => target,
            };
            self.process_through(target);
        }
        self.stop();
        Ok(())
    }

    /// Play `bars` bars in simulated time as fast as possible, then stop.
    pub fn render(&mut self, bars: u64) -> Result<(), ConfigError> {
        self.drive = Drive::Render;
        if self.phase == Phase::Idle {
            self.start(Instant::now())?;
        }
        let end = bars * self.pulses_per_bar;
        while self.phase == Phase::Running
            && self.next_pulse < end
            && !self.stop_flag.load(Ordering::Relaxed)
        {
            let pulse = self.next_pulse;
            self.process_pulse(pulse);
            self.next_pulse = pulse + 1;
        }
        self.stop();
        Ok(())
    }

    /// Follow clock signals from `signals`: wait for Start (or Continue),
    /// advance on ticks, and stop on Stop, when the channel closes, or when
    /// the stop flag is set.
    pub fn run_following(&mut self, signals: Receiver<ClockSignal>) -> Result<(), ConfigError> {
        self.ensure_idle()?;
        self.drive = Drive::Following;
        let mut follower = ClockFollower::new(self.pulses_per_beat)?;
        follower.arm();
        info!("waiting for external clock start");
        let mut last_reported_bpm = None;
        loop {
            if self.stop_flag.load(Ordering::Relaxed) {
                break;
            }
            let signal = match signals.recv_timeout(FOLLOW_POLL) {
                Ok(signal) => signal,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("external clock channel closed");
                    break;
                }
            };
            match follower.handle(signal, Instant::now()) {
                // Start and Continue only arm playback; the first tick after
                // them plays the follower's pulse.
                Transition::Started | Transition::Resumed => {
                    if self.phase == Phase::Idle {
                        self.start(Instant::now())?;
                    }
                }
                Transition::Advanced(pulse) => {
                    self.process_through(pulse);
                    let bpm = follower.estimated_bpm().map(f64::round);
                    if bpm.is_some() && bpm != last_reported_bpm {
                        last_reported_bpm = bpm;
                        if let Some(bpm) = bpm {
                            debug!(bpm, "external clock tempo");
                            self.sink.tempo(pulse, bpm);
                            self.observer.on_tempo(bpm);
                        }
                    }
                }
                Transition::Stopped => {
                    info!("external clock stopped");
                    break;
                }
                Transition::Ignored => {}
            }
        }
        self.stop();
        Ok(())
    }

    /// End playback: tell background tasks to stop, discard queued events,
    /// release every sounding note and send all-notes-off on every channel in
    /// use. Never waits more than a short grace period for a task still
    /// running, and only after the flush. Idempotent.
    pub fn stop(&mut self) {
        if self.phase != Phase::Running {
            self.phase = Phase::Stopped;
            return;
        }
        self.phase = Phase::Stopped;
        if let Some(pool) = &mut self.pool {
            pool.request_stop();
        }
        let discarded = self.queue.drain().len();
        self.wakes.clear();
        self.ramp = None;

        let pulse = self.next_pulse;
        let mut channels: BTreeSet<u8> = self.patterns.iter().map(|p| p.spec.channel).collect();
        let sounding = std::mem::take(&mut self.active_notes);
        let mut released = 0u32;
        for (&(channel, note), &count) in &sounding {
            channels.insert(channel);
            for _ in 0..count {
                self.sink.emit(&ScheduledEvent {
                    pulse,
                    channel,
                    kind: EventKind::NoteOff { note, velocity: 0 },
                });
            }
            released += count;
        }
        for channel in channels {
            self.sink.emit(&ScheduledEvent {
                pulse,
                channel,
                kind: EventKind::ControlChange {
                    controller: ALL_NOTES_OFF,
                    value: 0,
                },
            });
        }
        info!(pulse, discarded, released, "playback stopped");
        if let Some(pool) = &mut self.pool {
            pool.shutdown(STOP_GRACE);
        }
        self.observer.on_stop();
    }

    // -- per pulse -----------------------------------------------------------

    fn process_pulse(&mut self, pulse: u64) {
        self.apply_commands(pulse);
        self.step_ramp(pulse);

        while let Some((_, wake)) = self.wakes.pop_if_ready(pulse) {
            match wake {
                Wake::Harmony => self.advance_harmony(),
                Wake::Form => self.advance_form(),
                Wake::Task(id) => self.fire_task(id),
                Wake::Pattern(id) => self.rebuild_pattern(id),
            }
        }

        self.announce(pulse);

        while let Some(event) = self.queue.pop_if_ready(pulse) {
            match event.kind {
                EventKind::NoteOn { note, velocity } if velocity > 0 => {
                    *self.active_notes.entry((event.channel, note)).or_insert(0) += 1;
                }
                EventKind::NoteOn { note, .. } | EventKind::NoteOff { note, .. } => {
                    let key = (event.channel, note);
                    if let Some(count) = self.active_notes.get_mut(&key) {
                        *count -= 1;
                        if *count == 0 {
                            self.active_notes.remove(&key);
                        }
                    }
                }
                _ => {}
            }
            self.sink.emit(&event);
        }
    }

    /// Apply everything sent through `SchedulerControl` since the last pulse.
    fn apply_commands(&mut self, pulse: u64) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::SetBpm(bpm) => {
                    if let Err(e) = self.set_bpm(bpm) {
                        warn!(error = %e, "set_bpm command ignored");
                    }
                }
                Command::RampBpm {
                    target,
                    beats,
                    easing,
                } => {
                    if let Err(e) = self.ramp_bpm(target, beats, easing) {
                        warn!(error = %e, "ramp command ignored");
                    }
                }
                Command::SetTimingStrategy(strategy) => {
                    debug!(?strategy, pulse, "timing strategy changed");
                    self.strategy = strategy;
                }
                Command::FormJump(name) => self.steer_form(&name, true),
                Command::FormQueue(name) => self.steer_form(&name, false),
            }
        }
    }

    fn steer_form(&mut self, name: &str, jump: bool) {
        let Some(form) = &mut self.form else {
            warn!(section = name, "no form to steer");
            return;
        };
        let outcome = if jump {
            form.state.check_section(name)
        } else {
            form.state.queue_next(name)
        };
        match outcome {
            Ok(()) if jump => {
                form.pending_jump = Some(name.to_string());
                info!(section = name, pulse = form.next_bar, "form jump");
            }
            Ok(()) => info!(section = name, "form section queued"),
            Err(e) => warn!(section = name, error = %e, "form command ignored"),
        }
    }

    fn step_ramp(&mut self, pulse: u64) {
        let Some(ramp) = &mut self.ramp else {
            return;
        };
        let (bpm, done) = ramp.step();
        self.clock.set_bpm_at_pulse(bpm, pulse);
        self.sink.tempo(pulse, bpm);
        if done {
            self.ramp = None;
            info!(bpm, "tempo ramp finished");
            self.observer.on_tempo(bpm);
        }
    }

    /// Observer notifications for this pulse. Pulse 0 was announced by
    /// `start`.
    fn announce(&mut self, pulse: u64) {
        if pulse > 0 {
            if let Some(harmony) = &self.harmony {
                if let Some(&chord) = harmony.timeline.starting_at(pulse) {
                    debug!(chord = %chord, pulse, "chord change");
                    self.observer.on_chord(chord);
                }
            }
        }
        if pulse % self.pulses_per_bar != 0 {
            return;
        }
        let bar = pulse / self.pulses_per_bar;
        self.observer.on_bar(bar);
        if pulse == 0 {
            return;
        }
        let Some(snapshot) = self.form.as_ref().and_then(|f| f.timeline.starting_at(pulse)) else {
            return;
        };
        if snapshot.changed {
            match &snapshot.section {
                Some(s) => info!(section = %s.name, bar, "section"),
                None => info!(bar, "form finished"),
            }
            self.observer.on_section(snapshot.section.as_ref());
        }
    }

    fn advance_harmony(&mut self) {
        let Some(harmony) = &mut self.harmony else {
            return;
        };
        let chord = harmony.state.advance();
        let takes_effect = harmony.next_change;
        debug!(chord = %chord, pulse = takes_effect, "next chord");
        harmony.timeline.push(takes_effect, chord);
        harmony.next_change += harmony.cycle_pulses;
        let wake = harmony.next_change - harmony.lookahead_pulses;
        self.wakes.schedule(wake, Wake::Harmony);
    }

    fn advance_form(&mut self) {
        let Some(form) = &mut self.form else {
            return;
        };
        let changed = match form.pending_jump.take() {
            Some(name) => match form.state.jump_to(&name) {
                Ok(()) => true,
                Err(e) => {
                    warn!(section = %name, error = %e, "form jump failed");
                    form.state.advance_bar()
                }
            },
            None => form.state.advance_bar(),
        };
        let takes_effect = form.next_bar;
        form.timeline.push(
            takes_effect,
            FormSnapshot {
                section: form.state.current(),
                changed,
            },
        );
        form.next_bar += self.pulses_per_bar;
        if !form.state.is_finished() {
            let wake = form.next_bar.saturating_sub(form.lookahead_pulses);
            self.wakes.schedule(wake, Wake::Form);
        }
    }

    fn fire_task(&mut self, id: TaskId) {
        let Some(task) = self.tasks.get_mut(id.0) else {
            return;
        };
        let ctx = task.next_invocation(&self.data);
        let name = Arc::clone(&task.name);
        let callback = Arc::clone(&task.callback);
        let observer = Arc::clone(&self.observer);
        let next = task.fire_pulse();
        if let Some(pool) = &self.pool {
            let job_name = Arc::clone(&name);
            pool.try_submit(
                &name,
                Box::new(move || run_task(&job_name, &callback, &ctx, &observer)),
            );
        }
        self.wakes.schedule(next, Wake::Task(id));
    }

    /// The furthest a pattern may look ahead so that the chord and section
    /// of its cycle are already decided.
    fn lookahead_limit(&self) -> Option<u64> {
        let harmony = self.harmony.as_ref().map(|h| h.lookahead_pulses);
        let form = self.form.as_ref().map(|f| f.lookahead_pulses);
        match (harmony, form) {
            (Some(h), Some(f)) => Some(h.min(f)),
            (h, f) => h.or(f),
        }
    }

    fn rebuild_pattern(&mut self, id: PatternId) {
        let limit = self.lookahead_limit();
        let Some(slot) = self.patterns.get_mut(id.0) else {
            return;
        };
        let cycle = slot.next_cycle;
        let start = slot.next_start;

        let chord = self.harmony.as_ref().map(|h| h.chord_at(start));
        let key = self.harmony.as_ref().map(|h| h.state.key());
        if let (Some(root), Some(chord)) = (slot.spec.voice_leading_root, chord) {
            if slot.voiced_chord != Some(chord) {
                let root_midi = chord.root_midi_near(root as i32);
                slot.voicing = slot.voice.next(chord.intervals(), root_midi);
                slot.voiced_chord = Some(chord);
            }
        }
        let section = self
            .form
            .as_ref()
            .and_then(|f| f.timeline.at(start))
            .and_then(|s| s.section.clone());
        let signals = self
            .conductor
            .sample_all(start as f64 / self.pulses_per_beat as f64);

        let ctx = RebuildContext {
            name: &slot.spec.name,
            channel: slot.spec.channel,
            cycle,
            start_pulse: start,
            bar: start / self.pulses_per_bar,
            pulses_per_beat: self.pulses_per_beat,
            length_pulses: slot.timing.length_pulses,
            chord,
            key,
            voicing: if slot.spec.voice_leading_root.is_some() && chord.is_some() {
                Some(slot.voicing.as_slice())
            } else {
                None
            },
            section: section.as_ref(),
            signals: &signals,
            data: &self.data,
            seed: SeqRng::mix_seed(slot.seed, cycle),
        };

        let began = Instant::now();
        let hook = &mut slot.hook;
        let outcome = match catch_unwind(AssertUnwindSafe(|| hook(&ctx))) {
            Ok(result) => result,
            Err(payload) => Err(RebuildError::Panicked(panic_message(payload.as_ref()))),
        };
        let elapsed = began.elapsed();

        let channel = slot.spec.channel;
        match outcome {
            Ok(fresh) => {
                let late = self.drive == Drive::Realtime
                    && slot.lookahead_pulses > 0
                    && elapsed > self.clock.pulse_duration() * slot.lookahead_pulses as u32;
                let to_play = match (late, slot.fallback.take()) {
                    (true, Some(previous)) => {
                        warn!(
                            pattern = %slot.spec.name,
                            cycle,
                            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                            "rebuild overran its lookahead; replaying previous cycle"
                        );
                        self.observer.on_underrun(&slot.spec.name, cycle, elapsed);
                        previous
                    }
                    _ => fresh.clone(),
                };
                for event in to_play.events() {
                    self.queue.schedule(ScheduledEvent {
                        pulse: start + event.offset,
                        channel,
                        kind: event.kind.clone(),
                    });
                }
                debug!(pattern = %slot.spec.name, cycle, events = fresh.len(), "rebuilt");
                if fresh.has_timing_change() {
                    retime(slot, &fresh, self.pulses_per_beat, limit);
                }
                slot.fallback = Some(fresh);
                self.observer.on_rebuild(&slot.spec.name, cycle);
            }
            Err(e) => {
                error!(pattern = %slot.spec.name, cycle, error = %e, "rebuild failed; cycle is silent");
                slot.fallback = None;
                self.observer.on_rebuild_error(&slot.spec.name, cycle, &e);
            }
        }

        slot.next_cycle += 1;
        slot.next_start = start + slot.timing.length_pulses;
        let wake = slot.next_start - slot.lookahead_pulses;
        self.wakes.schedule(wake, Wake::Pattern(id));
    }
}

fn cap_lookahead(lookahead: u64, limit: Option<u64>) -> u64 {
    match limit {
        Some(limit) => lookahead.min(limit),
        None => lookahead,
    }
}

/// Apply a length or lookahead change a rebuild asked for. It takes effect
/// from the cycle just built: that cycle's length decides when the next one
/// starts. An invalid change is logged and ignored.
fn retime(slot: &mut PatternSlot, set: &EventSet, pulses_per_beat: u32, limit: Option<u64>) {
    let mut spec = slot.spec.clone();
    if let Some(length) = set.requested_length() {
        spec.length_beats = length;
        spec.lookahead_beats = spec.lookahead_beats.min(length);
    }
    if let Some(lookahead) = set.requested_lookahead() {
        spec.lookahead_beats = lookahead;
    }
    match spec.validate(pulses_per_beat) {
        Ok(timing) => {
            info!(
                pattern = %spec.name,
                length = timing.length_pulses,
                lookahead = timing.lookahead_pulses,
                "pattern timing changed"
            );
            slot.lookahead_pulses = cap_lookahead(timing.lookahead_pulses, limit);
            slot.timing = timing;
            slot.spec = spec;
        }
        Err(e) => warn!(pattern = %slot.spec.name, error = %e, "timing change ignored"),
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
