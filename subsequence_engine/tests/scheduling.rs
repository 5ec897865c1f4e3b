// End-to-end scheduling tests.
//
// Everything here drives a `Scheduler` through its public API, mostly in
// render mode (simulated time, so results are exact), and inspects the event
// stream a `CollectingSink` received. External clock following is driven
// through a crossbeam channel, live changes through `SchedulerControl`.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use midly::{MetaMessage, Smf, TrackEventKind};
use subsequence_engine::event::ALL_NOTES_OFF;
use subsequence_engine::{
    ClockSignal, CollectingSink, Easing, EngineConfig, EventKind, FormSection, FormState,
    HarmonyConfig, MidiRecorder, PatternSpec, RebuildContext, RebuildError, RebuildHook,
    ScheduleOptions, ScheduledEvent, Scheduler, SchedulerObserver, TaskContext, TaskError, TaskFn,
    TimingStrategy,
};
use subsequence_harmony::Chord;

fn config(seed: u64) -> EngineConfig {
    EngineConfig {
        seed: Some(seed),
        ..EngineConfig::default()
    }
}

fn with_harmony(seed: u64) -> EngineConfig {
    EngineConfig {
        harmony: Some(HarmonyConfig::default()),
        ..config(seed)
    }
}

/// One short note at the start of every cycle.
fn downbeat(pitch: u8) -> RebuildHook {
    Box::new(move |ctx: &RebuildContext<'_>| {
        let mut set = ctx.events();
        set.note(0.0, pitch, 100, 0.5);
        Ok(set)
    })
}

/// `(pulse, note)` of every NoteOn on `channel`.
fn struck(events: &[ScheduledEvent], channel: u8) -> Vec<(u64, u8)> {
    events
        .iter()
        .filter(|e| e.channel == channel)
        .filter_map(|e| match e.kind {
            EventKind::NoteOn { note, velocity } if velocity > 0 => Some((e.pulse, note)),
            _ => None,
        })
        .collect()
}

fn note_ons(events: &[ScheduledEvent], channel: u8) -> Vec<u64> {
    events
        .iter()
        .filter(|e| e.channel == channel)
        .filter(|e| matches!(e.kind, EventKind::NoteOn { velocity, .. } if velocity > 0))
        .map(|e| e.pulse)
        .collect()
}

/// Section names seen by each rebuild, in cycle order.
fn section_watcher(seen: &Arc<Mutex<Vec<Option<String>>>>) -> RebuildHook {
    let seen = Arc::clone(seen);
    Box::new(move |ctx: &RebuildContext<'_>| {
        seen.lock().unwrap().push(ctx.section.map(|s| s.name.clone()));
        Ok(ctx.events())
    })
}

fn names(seen: &Arc<Mutex<Vec<Option<String>>>>) -> Vec<String> {
    seen.lock()
        .unwrap()
        .iter()
        .map(|name| name.clone().unwrap_or_else(|| "-".to_string()))
        .collect()
}

#[derive(Default)]
struct Recorder {
    chords: Mutex<Vec<Chord>>,
    errors: Mutex<Vec<(String, u64)>>,
    underruns: Mutex<Vec<(String, u64)>>,
    tempos: Mutex<Vec<f64>>,
    stopped: Mutex<bool>,
}

impl SchedulerObserver for Recorder {
    fn on_chord(&self, chord: Chord) {
        self.chords.lock().unwrap().push(chord);
    }
    fn on_tempo(&self, bpm: f64) {
        self.tempos.lock().unwrap().push(bpm);
    }
    fn on_rebuild_error(&self, pattern: &str, cycle: u64, _error: &RebuildError) {
        self.errors.lock().unwrap().push((pattern.to_string(), cycle));
    }
    fn on_underrun(&self, pattern: &str, cycle: u64, _elapsed: Duration) {
        self.underruns.lock().unwrap().push((pattern.to_string(), cycle));
    }
    fn on_stop(&self) {
        *self.stopped.lock().unwrap() = true;
    }
}

#[test]
fn polyrhythm_realigns_every_twelve_beats() {
    let sink = CollectingSink::new();
    let mut s = Scheduler::new(config(1), sink.clone()).unwrap();
    s.add_pattern(PatternSpec::new("four", 0, 4.0), downbeat(36)).unwrap();
    s.add_pattern(PatternSpec::new("three", 1, 3.0), downbeat(48)).unwrap();
    s.render(4).unwrap();

    let events = sink.events();
    let four = note_ons(&events, 0);
    let three = note_ons(&events, 1);
    assert_eq!(four, vec![0, 96, 192, 288]);
    assert_eq!(three, vec![0, 72, 144, 216, 288, 360]);

    let four: BTreeSet<u64> = four.into_iter().collect();
    let shared: Vec<u64> = three.into_iter().filter(|p| four.contains(p)).collect();
    assert_eq!(shared, vec![0, 288]);
}

#[test]
fn events_arrive_in_pulse_order_with_note_offs_first() {
    let sink = CollectingSink::new();
    let mut s = Scheduler::new(config(1), sink.clone()).unwrap();
    // Back-to-back notes of the same pitch: each off shares a pulse with the
    // next on.
    s.add_pattern(
        PatternSpec::new("legato", 0, 1.0),
        Box::new(|ctx: &RebuildContext<'_>| {
            let mut set = ctx.events();
            set.note(0.0, 60, 100, 1.0);
            Ok(set)
        }),
    )
    .unwrap();
    s.render(1).unwrap();

    let events = sink.events();
    assert!(events.windows(2).all(|w| w[0].pulse <= w[1].pulse));
    let at_24: Vec<&EventKind> = events.iter().filter(|e| e.pulse == 24).map(|e| &e.kind).collect();
    assert!(matches!(at_24[0], EventKind::NoteOff { note: 60, .. }));
    assert!(matches!(at_24[1], EventKind::NoteOn { note: 60, .. }));
}

#[test]
fn stop_releases_sounding_notes_and_sends_all_notes_off() {
    let sink = CollectingSink::new();
    let observer = Arc::new(Recorder::default());
    let mut s = Scheduler::new(config(1), sink.clone()).unwrap();
    s.set_observer(observer.clone());
    s.add_pattern(
        PatternSpec::new("drone", 2, 4.0),
        Box::new(|ctx: &RebuildContext<'_>| {
            let mut set = ctx.events();
            set.note(0.0, 60, 100, 8.0);
            Ok(set)
        }),
    )
    .unwrap();
    s.render(1).unwrap();

    let events = sink.events();
    let tail = &events[events.len() - 2..];
    assert_eq!(
        tail[0],
        ScheduledEvent {
            pulse: 96,
            channel: 2,
            kind: EventKind::NoteOff {
                note: 60,
                velocity: 0
            },
        }
    );
    assert_eq!(
        tail[1].kind,
        EventKind::ControlChange {
            controller: ALL_NOTES_OFF,
            value: 0
        }
    );
    assert_eq!(s.active_notes().count(), 0);
    assert!(*observer.stopped.lock().unwrap());

    // A second stop is a no-op.
    s.stop();
    assert_eq!(sink.events().len(), events.len());
}

#[test]
fn failed_rebuild_silences_only_its_own_cycle() {
    let sink = CollectingSink::new();
    let observer = Arc::new(Recorder::default());
    let mut s = Scheduler::new(config(1), sink.clone()).unwrap();
    s.set_observer(observer.clone());
    s.add_pattern(
        PatternSpec::new("flaky", 0, 4.0),
        Box::new(|ctx: &RebuildContext<'_>| {
            match ctx.cycle {
                1 => return Err(RebuildError::msg("no data yet")),
                3 => panic!("bad index"),
                _ => {}
            }
            let mut set = ctx.events();
            set.note(0.0, 60, 100, 0.5);
            // Rings across the next cycle boundary.
            set.note(3.5, 64, 100, 1.0);
            Ok(set)
        }),
    )
    .unwrap();
    s.render(5).unwrap();

    let events = sink.events();
    assert_eq!(note_ons(&events, 0), vec![0, 84, 192, 276, 384, 468]);
    // The tail of cycle 0 still ends inside the failed cycle 1.
    assert!(events.iter().any(|e| e.pulse == 108
        && matches!(e.kind, EventKind::NoteOff { note: 64, .. })));
    assert_eq!(
        *observer.errors.lock().unwrap(),
        vec![("flaky".to_string(), 1), ("flaky".to_string(), 3)]
    );
}

#[test]
fn fixed_seed_renders_identically() {
    fn render(seed: u64) -> (Vec<ScheduledEvent>, Vec<Chord>) {
        let sink = CollectingSink::new();
        let observer = Arc::new(Recorder::default());
        let mut s = Scheduler::new(with_harmony(seed), sink.clone()).unwrap();
        s.set_observer(observer.clone());
        s.add_pattern(
            PatternSpec::new("melody", 0, 4.0),
            Box::new(|ctx: &RebuildContext<'_>| {
                let mut rng = ctx.rng();
                let notes = ctx.chord_notes(60).unwrap_or_default();
                let mut set = ctx.events();
                for step in 0..8 {
                    if rng.random_bool(0.6) && !notes.is_empty() {
                        let pitch = notes[rng.range_usize(0, notes.len())];
                        set.note(step as f64 * 0.5, pitch, 90, 0.25);
                    }
                }
                Ok(set)
            }),
        )
        .unwrap();
        s.render(16).unwrap();
        let chords = observer.chords.lock().unwrap().clone();
        (sink.events(), chords)
    }

    let (events_a, chords_a) = render(42);
    let (events_b, chords_b) = render(42);
    assert!(!events_a.is_empty());
    assert_eq!(events_a, events_b);
    assert_eq!(chords_a, chords_b);
    assert_eq!(chords_a.len(), 16);
}

#[test]
fn rebuilds_see_the_chord_of_the_cycle_they_build() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let observer = Arc::new(Recorder::default());
    let mut s = Scheduler::new(with_harmony(9), CollectingSink::new()).unwrap();
    s.set_observer(observer.clone());
    let sink_seen = Arc::clone(&seen);
    s.add_pattern(
        PatternSpec::new("watch", 0, 4.0),
        Box::new(move |ctx: &RebuildContext<'_>| {
            if let Some(chord) = ctx.chord {
                sink_seen.lock().unwrap().push(chord);
            }
            Ok(ctx.events())
        }),
    )
    .unwrap();
    s.render(4).unwrap();

    let built = seen.lock().unwrap().clone();
    let sounded = observer.chords.lock().unwrap().clone();
    assert_eq!(sounded.len(), 4);
    // The last rebuild prepared a cycle that never started.
    assert_eq!(built.len(), 5);
    assert_eq!(&built[..4], &sounded[..]);
    assert_eq!(built[0], Chord::major(0));
}

#[test]
fn initial_task_data_is_visible_to_the_first_cycle() {
    let sink = CollectingSink::new();
    let mut s = Scheduler::new(config(1), sink.clone()).unwrap();
    let fetch: TaskFn = Arc::new(|ctx: &TaskContext| {
        ctx.data.set("velocity", 77);
        Ok::<(), TaskError>(())
    });
    s.schedule(
        "fetch",
        4.0,
        fetch,
        ScheduleOptions {
            wait_for_initial: true,
            ..ScheduleOptions::default()
        },
    )
    .unwrap();
    s.add_pattern(
        PatternSpec::new("reader", 0, 4.0),
        Box::new(|ctx: &RebuildContext<'_>| {
            let mut set = ctx.events();
            if let Some(velocity) = ctx.data.get_f64("velocity") {
                set.note(0.0, 60, velocity as u8, 0.5);
            }
            Ok(set)
        }),
    )
    .unwrap();
    s.render(1).unwrap();

    let first = sink
        .events()
        .into_iter()
        .find(|e| matches!(e.kind, EventKind::NoteOn { .. }))
        .unwrap();
    assert_eq!(first.pulse, 0);
    assert_eq!(
        first.kind,
        EventKind::NoteOn {
            note: 60,
            velocity: 77
        }
    );
}

#[test]
fn follows_an_external_clock() {
    let sink = CollectingSink::new();
    let mut s = Scheduler::new(config(1), sink.clone()).unwrap();
    s.add_pattern(
        PatternSpec::new("pulse", 0, 4.0),
        Box::new(|ctx: &RebuildContext<'_>| {
            let mut set = ctx.events();
            set.note(0.0, 60, 100, 0.5);
            set.note(2.0, 62, 100, 0.5);
            Ok(set)
        }),
    )
    .unwrap();

    let (tx, rx) = crossbeam_channel::unbounded();
    // Ticks before Start are ignored.
    tx.send(ClockSignal::Tick).unwrap();
    tx.send(ClockSignal::Start).unwrap();
    // The first tick after Start plays pulse 0, so the second bar's downbeat
    // (pulse 96) comes on tick 97.
    for _ in 0..97 {
        tx.send(ClockSignal::Tick).unwrap();
    }
    tx.send(ClockSignal::Stop).unwrap();
    s.run_following(rx).unwrap();

    let events = sink.events();
    assert_eq!(note_ons(&events, 0), vec![0, 48, 96]);
    // The note started at pulse 96 is released by the stop flush.
    assert!(events.iter().any(|e| e.pulse == 97
        && e.kind
            == EventKind::NoteOff {
                note: 60,
                velocity: 0
            }));
    assert!(!s.is_running());
}

#[test]
fn following_ends_when_the_clock_source_goes_away() {
    let sink = CollectingSink::new();
    let mut s = Scheduler::new(config(1), sink.clone()).unwrap();
    s.add_pattern(PatternSpec::new("p", 0, 4.0), downbeat(60)).unwrap();
    let (tx, rx) = crossbeam_channel::unbounded();
    tx.send(ClockSignal::Start).unwrap();
    tx.send(ClockSignal::Tick).unwrap();
    drop(tx);
    s.run_following(rx).unwrap();
    assert_eq!(note_ons(&sink.events(), 0), vec![0]);
}

#[test]
fn start_alone_plays_nothing_until_the_first_tick() {
    let play = |ticks: usize| {
        let sink = CollectingSink::new();
        let mut s = Scheduler::new(config(1), sink.clone()).unwrap();
        s.add_pattern(PatternSpec::new("p", 0, 1.0), downbeat(60)).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(ClockSignal::Start).unwrap();
        for _ in 0..ticks {
            tx.send(ClockSignal::Tick).unwrap();
        }
        tx.send(ClockSignal::Stop).unwrap();
        s.run_following(rx).unwrap();
        note_ons(&sink.events(), 0)
    };
    assert_eq!(play(0), Vec::<u64>::new());
    assert_eq!(play(1), vec![0]);
    // Ticks 1..=24 play pulses 0..=23: the second beat needs a 25th.
    assert_eq!(play(24), vec![0]);
    assert_eq!(play(25), vec![0, 24]);
}

#[test]
fn realtime_run_stops_after_the_requested_pulses() {
    let sink = CollectingSink::new();
    let mut cfg = config(1);
    // 240 BPM at 24 PPQN: about 10 ms per pulse.
    cfg.bpm = 240.0;
    let mut s = Scheduler::new(cfg, sink.clone()).unwrap();
    s.add_pattern(PatternSpec::new("p", 0, 1.0), downbeat(60)).unwrap();
    s.run_realtime(Some(25)).unwrap();
    assert_eq!(note_ons(&sink.events(), 0), vec![0, 24]);
    assert!(!s.is_running());
}

#[test]
fn stop_flag_ends_a_render() {
    let sink = CollectingSink::new();
    let mut s = Scheduler::new(config(1), sink.clone()).unwrap();
    let stop = s.stop_handle();
    s.add_pattern(
        PatternSpec::new("p", 0, 4.0),
        Box::new(move |ctx: &RebuildContext<'_>| {
            if ctx.cycle == 2 {
                stop.store(true, std::sync::atomic::Ordering::SeqCst);
            }
            let mut set = ctx.events();
            set.note(0.0, 60, 100, 0.5);
            Ok(set)
        }),
    )
    .unwrap();
    s.render(100).unwrap();
    // Cycle 2 was built (at pulse 168) but the render stopped before it began.
    assert_eq!(note_ons(&sink.events(), 0), vec![0, 96]);
}

#[test]
fn stop_does_not_wait_for_a_running_task() {
    let sink = CollectingSink::new();
    let mut s = Scheduler::new(config(1), sink.clone()).unwrap();
    let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(1);
    let slow: TaskFn = Arc::new(move |_ctx: &TaskContext| {
        let _ = started_tx.try_send(());
        std::thread::sleep(Duration::from_secs(3));
        Ok::<(), TaskError>(())
    });
    s.schedule("slow", 4.0, slow, ScheduleOptions::default()).unwrap();
    s.add_pattern(
        PatternSpec::new("drone", 0, 4.0),
        Box::new(|ctx: &RebuildContext<'_>| {
            let mut set = ctx.events();
            set.note(0.0, 60, 100, 8.0);
            Ok(set)
        }),
    )
    .unwrap();

    let now = Instant::now();
    s.start(now).unwrap();
    s.advance(now);
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let began = Instant::now();
    s.stop();
    let took = began.elapsed();
    assert!(took < Duration::from_millis(1000), "stop took {took:?}");

    let events = sink.events();
    assert!(events.iter().any(|e| e.kind
        == EventKind::NoteOff {
            note: 60,
            velocity: 0
        }));
    assert!(events.iter().any(|e| e.kind
        == EventKind::ControlChange {
            controller: ALL_NOTES_OFF,
            value: 0
        }));
}

#[test]
fn overlapping_notes_of_one_pitch_are_each_released() {
    let sink = CollectingSink::new();
    let mut s = Scheduler::new(config(1), sink.clone()).unwrap();
    s.add_pattern(
        PatternSpec::new("stack", 0, 4.0),
        Box::new(|ctx: &RebuildContext<'_>| {
            let mut set = ctx.events();
            set.note(0.0, 60, 100, 8.0);
            // Struck again while the first is still sounding, released early.
            set.note(1.0, 60, 100, 1.0);
            set.note(2.0, 60, 100, 8.0);
            Ok(set)
        }),
    )
    .unwrap();
    s.render(1).unwrap();

    let flushed = sink
        .events()
        .iter()
        .filter(|e| {
            e.pulse == 96
                && e.kind
                    == EventKind::NoteOff {
                        note: 60,
                        velocity: 0,
                    }
        })
        .count();
    assert_eq!(flushed, 2);
    assert_eq!(s.active_notes().count(), 0);
}

#[test]
fn long_lookahead_sees_the_section_of_its_cycle() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut s = Scheduler::new(config(1), CollectingSink::new()).unwrap();
    s.set_form(
        FormState::sequence(
            &[("intro", 1), ("verse", 1), ("chorus", 1), ("verse", 1), ("intro", 1)],
            false,
        )
        .unwrap(),
    )
    .unwrap();
    // Two bars long, built a bar and a half ahead: each rebuild runs before
    // the bar its cycle starts in has begun.
    s.add_pattern(
        PatternSpec::new("long", 0, 8.0).with_lookahead(6.0),
        section_watcher(&seen),
    )
    .unwrap();
    s.render(4).unwrap();
    assert_eq!(names(&seen), vec!["intro", "chorus", "intro"]);
}

#[test]
fn control_sets_tempo_while_running() {
    let observer = Arc::new(Recorder::default());
    let mut s = Scheduler::new(config(1), CollectingSink::new()).unwrap();
    s.set_observer(observer.clone());
    let control = s.control();
    s.add_pattern(
        PatternSpec::new("p", 0, 4.0),
        Box::new(move |ctx: &RebuildContext<'_>| {
            if ctx.cycle == 1 {
                control.set_bpm(90.0).unwrap();
            }
            Ok(ctx.events())
        }),
    )
    .unwrap();
    s.render(3).unwrap();
    assert_eq!(s.bpm(), 90.0);
    assert_eq!(*observer.tempos.lock().unwrap(), vec![90.0]);
}

#[test]
fn control_ramps_tempo_while_running() {
    let observer = Arc::new(Recorder::default());
    let mut s = Scheduler::new(config(1), CollectingSink::new()).unwrap();
    s.set_observer(observer.clone());
    let control = s.control();
    s.add_pattern(
        PatternSpec::new("p", 0, 4.0),
        Box::new(move |ctx: &RebuildContext<'_>| {
            if ctx.cycle == 0 {
                control.ramp_bpm(150.0, 4.0, Easing::Linear).unwrap();
            }
            Ok(ctx.events())
        }),
    )
    .unwrap();
    s.render(1).unwrap();
    // Applied at pulse 1, so one pulse of the ramp is still to go.
    assert!(s.bpm() > 149.0 && s.bpm() < 150.0, "{}", s.bpm());
    s.stop();

    let mut s = Scheduler::new(config(1), CollectingSink::new()).unwrap();
    let control = s.control();
    s.add_pattern(
        PatternSpec::new("p", 0, 4.0),
        Box::new(move |ctx: &RebuildContext<'_>| {
            if ctx.cycle == 0 {
                control.ramp_bpm(150.0, 4.0, Easing::Linear).unwrap();
            }
            Ok(ctx.events())
        }),
    )
    .unwrap();
    s.render(2).unwrap();
    assert_eq!(s.bpm(), 150.0);
}

#[test]
fn control_switches_timing_strategy_while_running() {
    let mut cfg = config(1);
    cfg.bpm = 240.0;
    let mut s = Scheduler::new(cfg, CollectingSink::new()).unwrap();
    assert_ne!(s.timing_strategy(), TimingStrategy::Sleep);
    let control = s.control();
    s.add_pattern(
        PatternSpec::new("p", 0, 1.0),
        Box::new(move |ctx: &RebuildContext<'_>| {
            control.set_timing_strategy(TimingStrategy::Sleep);
            Ok(ctx.events())
        }),
    )
    .unwrap();
    s.run_realtime(Some(12)).unwrap();
    assert_eq!(s.timing_strategy(), TimingStrategy::Sleep);
}

fn graph_form(sections: &[FormSection], start: &str) -> FormState {
    FormState::graph(sections, Some(start), 7).unwrap()
}

#[test]
fn control_jumps_the_form_at_the_next_bar() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let observer = Arc::new(Recorder::default());
    let mut s = Scheduler::new(config(1), CollectingSink::new()).unwrap();
    s.set_observer(observer.clone());
    s.set_form(graph_form(
        &[
            FormSection::new("verse", 4, &[("verse", 1)]),
            FormSection::new("chorus", 2, &[("verse", 1)]),
        ],
        "verse",
    ))
    .unwrap();
    let control = s.control();
    let mut watch = section_watcher(&seen);
    s.add_pattern(
        PatternSpec::new("p", 0, 4.0),
        Box::new(move |ctx: &RebuildContext<'_>| {
            if ctx.cycle == 0 {
                control.form_jump("chorus");
                // Unknown names are ignored.
                control.form_jump("bridge");
            }
            watch(ctx)
        }),
    )
    .unwrap();
    s.render(4).unwrap();
    assert_eq!(names(&seen), vec!["verse", "chorus", "chorus", "verse", "verse"]);
    let section = s.form().and_then(|f| f.current()).unwrap();
    assert_eq!(section.name, "verse");
}

#[test]
fn control_queues_the_next_section() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut s = Scheduler::new(config(1), CollectingSink::new()).unwrap();
    s.set_form(graph_form(
        &[
            FormSection::new("intro", 1, &[("verse", 1)]),
            FormSection::new("verse", 1, &[("verse", 1)]),
            FormSection::new("chorus", 1, &[("verse", 1)]),
        ],
        "intro",
    ))
    .unwrap();
    let control = s.control();
    let mut watch = section_watcher(&seen);
    s.add_pattern(
        PatternSpec::new("p", 0, 4.0),
        Box::new(move |ctx: &RebuildContext<'_>| {
            if ctx.cycle == 0 {
                control.form_queue("chorus");
            }
            watch(ctx)
        }),
    )
    .unwrap();
    s.render(3).unwrap();
    assert_eq!(names(&seen), vec!["intro", "chorus", "verse", "verse"]);
}

#[test]
fn recorded_file_follows_a_tempo_ramp() {
    let recorder = MidiRecorder::new(125.0, 24);
    let mut s = Scheduler::new(config(1), recorder.clone()).unwrap();
    s.add_pattern(PatternSpec::new("p", 0, 4.0), downbeat(60)).unwrap();
    s.ramp_bpm(180.0, 4.0, Easing::Linear).unwrap();
    s.render(2).unwrap();

    let bytes = recorder.to_bytes().unwrap();
    let smf = Smf::parse(&bytes).unwrap();
    let tempos: Vec<u32> = smf.tracks[0]
        .iter()
        .filter_map(|e| match e.kind {
            TrackEventKind::Meta(MetaMessage::Tempo(t)) => Some(t.as_int()),
            _ => None,
        })
        .collect();
    assert!(tempos.len() > 10, "{tempos:?}");
    assert_eq!(tempos.first(), Some(&480_000));
    assert_eq!(tempos.last(), Some(&333_333));
    assert!(tempos.windows(2).all(|w| w[1] < w[0]));
}

#[test]
fn set_length_changes_later_cycle_boundaries() {
    let lengths = Arc::new(Mutex::new(Vec::new()));
    let sink = CollectingSink::new();
    let mut s = Scheduler::new(config(1), sink.clone()).unwrap();
    let seen = Arc::clone(&lengths);
    s.add_pattern(
        PatternSpec::new("shrinking", 0, 4.0),
        Box::new(move |ctx: &RebuildContext<'_>| {
            seen.lock().unwrap().push(ctx.length_pulses);
            let mut set = ctx.events();
            set.note(0.0, 60, 100, 0.5);
            if ctx.cycle == 1 {
                set.set_length(3.0);
            }
            Ok(set)
        }),
    )
    .unwrap();
    s.render(3).unwrap();
    // Cycle 1 asked for three beats: it ends at 168 instead of 192.
    assert_eq!(note_ons(&sink.events(), 0), vec![0, 96, 168, 240]);
    assert_eq!(*lengths.lock().unwrap(), vec![96, 96, 72, 72]);
}

#[test]
fn late_rebuild_replays_the_previous_cycle_until_an_error_clears_it() {
    let sink = CollectingSink::new();
    let observer = Arc::new(Recorder::default());
    let mut cfg = config(1);
    // 240 BPM at 24 PPQN: about 10 ms per pulse, so a quarter-beat lookahead
    // is about 63 ms.
    cfg.bpm = 240.0;
    let mut s = Scheduler::new(cfg, sink.clone()).unwrap();
    s.set_observer(observer.clone());
    s.add_pattern(
        PatternSpec::new("slow", 0, 1.0).with_lookahead(0.25),
        Box::new(|ctx: &RebuildContext<'_>| {
            let mut set = ctx.events();
            let pitch = match ctx.cycle {
                1 => {
                    std::thread::sleep(Duration::from_millis(200));
                    62
                }
                2 => return Err(RebuildError::msg("source offline")),
                3 => {
                    std::thread::sleep(Duration::from_millis(200));
                    64
                }
                _ => 60,
            };
            set.note(0.0, pitch, 100, 0.25);
            Ok(set)
        }),
    )
    .unwrap();
    s.run_realtime(Some(96)).unwrap();

    // Cycle 1 overran: cycle 0 was played again in its place. Cycle 2 failed
    // and played nothing, so when cycle 3 overran there was nothing to replay
    // and its own late result went out.
    assert_eq!(struck(&sink.events(), 0), vec![(0, 60), (24, 60), (72, 64)]);
    assert_eq!(
        *observer.underruns.lock().unwrap(),
        vec![("slow".to_string(), 1)]
    );
    assert_eq!(
        *observer.errors.lock().unwrap(),
        vec![("slow".to_string(), 2)]
    );
}
