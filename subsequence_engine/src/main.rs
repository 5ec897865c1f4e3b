// CLI entry point for the subsequence demo composition.
//
// Three patterns over a generated chord progression:
// - drums: 4 beats on channel 10 (index 9), kick/snare/hats with a swung
//   ghost hit chosen from the cycle's own generator;
// - bass: 3 beats on channel 2, so it realigns with the drums every 12
//   beats; follows the chord root;
// - pad: one bar on channel 1, the chord voice-led from its previous
//   voicing, velocity shaped by a conductor LFO.
//
// A looping intro/verse/chorus form gates the hats and the pad.
//
// With `--render out.mid` the piece is played in simulated time into a MIDI
// file. Otherwise it plays in real time and every note is logged. When the
// config sets `external_clock`, real-time playback follows clock signals
// read one per line from stdin (`start`, `tick`, `stop`, `continue`).
//
// Usage:
//   subsequence [OPTIONS]
//     --bpm <BPM>          Tempo (default: 125)
//     --bars <N>           Bars to play (default: 16)
//     --seed <N>           Master seed (default: derived from the clock)
//     --style <NAME>       Harmony style (default: functional_major)
//     --key <NOTE>         Key, e.g. C, F#, Bb (default: C)
//     --config <PATH>      JSON engine config; flags override it
//     --render <PATH>      Write a MIDI file instead of playing in real time
//     --no-spin            Sleep only; do not spin-wait for pulse deadlines

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::Receiver;
use subsequence_engine::conductor::LfoShape;
use subsequence_engine::{
    ClockSignal, ConfigError, EngineConfig, FormState, MidiRecorder, PatternSpec, RebuildContext, RebuildError,
    Scheduler, TracingSink,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const KICK: u8 = 36;
const SNARE: u8 = 38;
const CLOSED_HAT: u8 = 42;

#[derive(Debug, Default)]
struct Options {
    bpm: Option<f64>,
    bars: u64,
    seed: Option<u64>,
    style: Option<String>,
    key: Option<String>,
    config: Option<PathBuf>,
    render: Option<PathBuf>,
    no_spin: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let options = parse_args();
    if let Err(e) = run(options) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(options: Options) -> Result<(), Box<dyn std::error::Error>> {
    let config = build_config(&options)?;
    let ppb = config.pulses_per_beat;
    let follow_clock = config.external_clock;

    match &options.render {
        Some(path) => {
            let recorder = MidiRecorder::new(config.bpm, ppb);
            let mut scheduler = Scheduler::new(config, recorder.clone())?;
            compose(&mut scheduler)?;
            install_interrupt_handler(scheduler.stop_handle());
            scheduler.render(options.bars)?;
            recorder.write(path)?;
            info!(path = %path.display(), events = recorder.len(), "rendered");
        }
        None => {
            let mut scheduler = Scheduler::new(config, TracingSink::new(ppb))?;
            compose(&mut scheduler)?;
            install_interrupt_handler(scheduler.stop_handle());
            if follow_clock {
                scheduler.run_following(stdin_clock())?;
            } else {
                let pulses = options.bars * scheduler.pulses_per_bar();
                scheduler.run_realtime(Some(pulses))?;
            }
        }
    }
    Ok(())
}

fn build_config(options: &Options) -> Result<EngineConfig, ConfigError> {
    let config = match &options.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    apply_options(config, options)
}

/// Layer command-line flags over a loaded config. Harmony is always on in
/// the demo: a config without a harmony section gets the defaults.
fn apply_options(mut config: EngineConfig, options: &Options) -> Result<EngineConfig, ConfigError> {
    if let Some(bpm) = options.bpm {
        config.bpm = bpm;
    }
    if options.seed.is_some() {
        config.seed = options.seed;
    }
    if options.no_spin {
        config.timing.spin_wait = false;
    }
    let mut harmony = config.harmony.take().unwrap_or_default();
    if let Some(style) = &options.style {
        harmony.style = style.clone();
    }
    if let Some(key) = &options.key {
        harmony.key = key.clone();
    }
    config.harmony = Some(harmony);
    config.validate()?;
    Ok(config)
}

/// Register the demo's form, conductor signals and patterns.
fn compose(scheduler: &mut Scheduler) -> Result<(), ConfigError> {
    scheduler.set_form(FormState::sequence(
        &[("intro", 4), ("verse", 8), ("chorus", 4)],
        true,
    )?)?;
    let mut conductor = subsequence_engine::Conductor::new();
    conductor.lfo("swell", LfoShape::Sine, 16.0, 50.0, 90.0);
    scheduler.set_conductor(conductor);

    scheduler.add_pattern(
        PatternSpec::new("drums", 9, 4.0),
        Box::new(|ctx: &RebuildContext<'_>| {
            let mut set = ctx.events();
            set.hit_steps(KICK, &[0, 8], 16, 110);
            set.hit_steps(SNARE, &[4, 12], 16, 96);
            let intro = ctx.section.is_some_and(|s| s.name == "intro");
            if !intro {
                set.hit_steps(CLOSED_HAT, &[0, 2, 4, 6, 8, 10, 12, 14], 16, 70);
            }
            let mut rng = ctx.rng();
            if rng.random_bool(0.4) {
                let ghost = [3, 7, 11, 15][rng.range_usize(0, 4)];
                set.hit_steps(SNARE, &[ghost], 16, 40);
            }
            Ok(set)
        }),
    )?;

    scheduler.add_pattern(
        PatternSpec::new("bass", 1, 3.0),
        Box::new(|ctx: &RebuildContext<'_>| {
            let notes = ctx
                .chord_notes(36)
                .ok_or_else(|| RebuildError::msg("bass needs harmony"))?;
            let mut set = ctx.events();
            let Some(&root) = notes.first() else {
                return Ok(set);
            };
            set.note(0.0, root, 100, 0.9);
            set.note(1.5, root.saturating_add(12), 80, 0.4);
            if let Some(&fifth) = notes.get(2) {
                set.note(2.0, fifth, 85, 0.9);
            }
            Ok(set)
        }),
    )?;

    scheduler.add_pattern(
        PatternSpec::new("pad", 0, 4.0).with_voice_leading(60),
        Box::new(|ctx: &RebuildContext<'_>| {
            let mut set = ctx.events();
            if ctx.section.is_some_and(|s| s.name == "intro" && s.is_first_bar()) {
                return Ok(set);
            }
            let velocity = ctx.signal("swell").unwrap_or(70.0).round().clamp(1.0, 127.0) as u8;
            if let Some(notes) = ctx.voiced_notes() {
                set.chord(0.0, &notes, velocity, 3.75);
            }
            Ok(set)
        }),
    )?;
    Ok(())
}

/// Clock signals parsed from stdin lines. Unknown lines are skipped; the
/// channel closes at end of input.
fn stdin_clock() -> Receiver<ClockSignal> {
    let (tx, rx) = crossbeam_channel::unbounded();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let signal = match line.trim() {
                "tick" => ClockSignal::Tick,
                "start" => ClockSignal::Start,
                "stop" => ClockSignal::Stop,
                "continue" => ClockSignal::Continue,
                other => {
                    warn!(line = other, "unrecognised clock line");
                    continue;
                }
            };
            if tx.send(signal).is_err() {
                break;
            }
        }
    });
    rx
}

// ---------------------------------------------------------------------------
// Interrupt handling
// ---------------------------------------------------------------------------

/// Make Ctrl+C stop playback through the scheduler, so sounding notes are
/// released, instead of killing the process.
fn install_interrupt_handler(stop: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(stop_on_interrupt(stop)) {
        warn!(error = %e, "could not install Ctrl+C handler; interrupting will not release notes");
    }
}

fn stop_on_interrupt(stop: Arc<AtomicBool>) -> impl FnMut() + Send + 'static {
    move || stop.store(true, Ordering::SeqCst)
}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// Parse command-line arguments with plain `std::env::args()` matching.
fn parse_args() -> Options {
    let mut options = Options {
        bars: 16,
        ..Options::default()
    };
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--bpm" => {
                i += 1;
                options.bpm = Some(parsed(&args, i, "--bpm requires a number"));
            }
            "--bars" => {
                i += 1;
                options.bars = parsed(&args, i, "--bars requires a whole number");
            }
            "--seed" => {
                i += 1;
                options.seed = Some(parsed(&args, i, "--seed requires a whole number"));
            }
            "--style" => {
                i += 1;
                options.style = Some(parsed(&args, i, "--style requires a name"));
            }
            "--key" => {
                i += 1;
                options.key = Some(parsed(&args, i, "--key requires a note name"));
            }
            "--config" => {
                i += 1;
                options.config = Some(parsed(&args, i, "--config requires a path"));
            }
            "--render" => {
                i += 1;
                options.render = Some(parsed(&args, i, "--render requires a path"));
            }
            "--no-spin" => options.no_spin = true,
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    options
}

fn parsed<T: std::str::FromStr>(args: &[String], i: usize, complaint: &str) -> T {
    args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
        eprintln!("{complaint}");
        std::process::exit(1);
    })
}

fn print_usage() {
    println!("Usage: subsequence [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --bpm <BPM>          Tempo (default: 125)");
    println!("  --bars <N>           Bars to play (default: 16)");
    println!("  --seed <N>           Master seed (default: derived from the clock)");
    println!("  --style <NAME>       Harmony style (default: functional_major)");
    println!("  --key <NOTE>         Key, e.g. C, F#, Bb (default: C)");
    println!("  --config <PATH>      JSON engine config; flags override it");
    println!("  --render <PATH>      Write a MIDI file instead of playing in real time");
    println!("  --no-spin            Sleep only; do not spin-wait for pulse deadlines");
    println!("  --help, -h           Show this help");
}
