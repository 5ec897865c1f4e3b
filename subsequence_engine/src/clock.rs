// Pulse clock and realtime wait strategies.
//
// `PulseClock` maps wall-clock instants to absolute pulse numbers. The pulse
// is always computed from the elapsed time since an anchor instant, never by
// summing per-pulse durations, so floating-point error cannot accumulate over
// a long session. A tempo change moves the anchor to the exact instant of the
// current pulse boundary and continues from there at the new rate.
//
// `TimingStrategy` decides how the realtime loop waits for the next pulse:
// plain `thread::sleep` (OS-scheduler-bound, often ~1 ms late), or sleeping
// to within a small margin of the deadline and then spinning on `Instant`.
//
// `TempoRamp` interpolates BPM across a number of pulses with an easing
// curve; the scheduler steps it once per pulse.
//
// See also: `scheduler.rs` (`run_realtime`), `config.rs` (`TimingConfig`).

use std::time::{Duration, Instant};

use crate::easing::Easing;

/// Beats to whole pulses, rounded to nearest.
pub fn beats_to_pulses(beats: f64, pulses_per_beat: u32) -> u64 {
    let pulses = (beats * pulses_per_beat as f64).round();
    if pulses.is_finite() && pulses > 0.0 {
        pulses as u64
    } else {
        0
    }
}

/// Seconds per pulse at `bpm`.
pub fn pulse_seconds(bpm: f64, pulses_per_beat: u32) -> f64 {
    60.0 / (bpm * pulses_per_beat as f64)
}

// ---------------------------------------------------------------------------
// PulseClock
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct PulseClock {
    pulses_per_beat: u32,
    bpm: f64,
    /// Instant of `anchor_pulse`. `None` until `start`.
    anchor: Option<Instant>,
    anchor_pulse: u64,
    /// Highest pulse returned by `advance`.
    last_pulse: u64,
}

impl PulseClock {
    /// `bpm` and `pulses_per_beat` are assumed validated by `EngineConfig`.
    pub fn new(bpm: f64, pulses_per_beat: u32) -> Self {
        Self {
            pulses_per_beat,
            bpm,
            anchor: None,
            anchor_pulse: 0,
            last_pulse: 0,
        }
    }

    pub fn start(&mut self, now: Instant) {
        self.anchor = Some(now);
        self.anchor_pulse = 0;
        self.last_pulse = 0;
    }

    pub fn is_started(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn pulses_per_beat(&self) -> u32 {
        self.pulses_per_beat
    }

    pub fn pulse_duration(&self) -> Duration {
        Duration::from_secs_f64(pulse_seconds(self.bpm, self.pulses_per_beat))
    }

    fn elapsed_pulses(&self, now: Instant) -> f64 {
        match self.anchor {
            Some(anchor) => {
                now.saturating_duration_since(anchor).as_secs_f64()
                    / pulse_seconds(self.bpm, self.pulses_per_beat)
            }
            None => 0.0,
        }
    }

    /// The pulse nearest to `now`. Not clamped; see `advance`.
    pub fn pulse_at(&self, now: Instant) -> u64 {
        self.anchor_pulse + self.elapsed_pulses(now).round() as u64
    }

    /// The current pulse, never lower than any value previously returned.
    pub fn advance(&mut self, now: Instant) -> u64 {
        self.last_pulse = self.last_pulse.max(self.pulse_at(now));
        self.last_pulse
    }

    /// The instant `pulse` is due. Pulses before the anchor map to the anchor.
    pub fn pulse_instant(&self, pulse: u64) -> Option<Instant> {
        let anchor = self.anchor?;
        let ahead = pulse.saturating_sub(self.anchor_pulse) as f64;
        Some(anchor + Duration::from_secs_f64(ahead * pulse_seconds(self.bpm, self.pulses_per_beat)))
    }

    /// Change tempo from `pulse` onwards, anchoring at that pulse's deadline
    /// under the old tempo. Used for per-pulse ramp steps.
    pub fn set_bpm_at_pulse(&mut self, bpm: f64, pulse: u64) {
        if let Some(instant) = self.pulse_instant(pulse) {
            self.anchor = Some(instant);
            self.anchor_pulse = pulse.max(self.anchor_pulse);
        }
        self.bpm = bpm;
    }

    /// Change tempo. The anchor moves to the boundary of the last pulse that
    /// has started by `now`, so pulses already elapsed keep their timing and
    /// the next one is one new-tempo pulse after that boundary.
    pub fn set_bpm(&mut self, bpm: f64, now: Instant) {
        if let Some(anchor) = self.anchor {
            let boundary = self.anchor_pulse + self.elapsed_pulses(now).floor() as u64;
            let boundary_instant = self.pulse_instant(boundary).unwrap_or(anchor);
            self.anchor = Some(boundary_instant);
            self.anchor_pulse = boundary;
        }
        self.bpm = bpm;
    }
}

// ---------------------------------------------------------------------------
// Timing strategies
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimingStrategy {
    /// `thread::sleep` until the deadline.
    Sleep,
    /// Sleep until `margin` before the deadline, then spin.
    SleepThenSpin { margin: Duration },
}

impl Default for TimingStrategy {
    fn default() -> Self {
        TimingStrategy::SleepThenSpin {
            margin: Duration::from_millis(1),
        }
    }
}

impl TimingStrategy {
    /// Block the current thread until `deadline`. Returns immediately if it
    /// has passed.
    pub fn wait_until(self, deadline: Instant) {
        match self {
            TimingStrategy::Sleep => {
                let now = Instant::now();
                if deadline > now {
                    std::thread::sleep(deadline - now);
                }
            }
            TimingStrategy::SleepThenSpin { margin } => {
                let now = Instant::now();
                if let Some(coarse) = deadline.checked_sub(margin) {
                    if coarse > now {
                        std::thread::sleep(coarse - now);
                    }
                }
                while Instant::now() < deadline {
                    std::hint::spin_loop();
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tempo ramps
// ---------------------------------------------------------------------------

/// A BPM transition in progress.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TempoRamp {
    pub start_bpm: f64,
    pub target_bpm: f64,
    pub total_pulses: u64,
    pub elapsed_pulses: u64,
    pub easing: Easing,
}

impl TempoRamp {
    pub fn new(start_bpm: f64, target_bpm: f64, total_pulses: u64, easing: Easing) -> Self {
        Self {
            start_bpm,
            target_bpm,
            total_pulses,
            elapsed_pulses: 0,
            easing,
        }
    }

    /// Advance one pulse. Returns the BPM to apply and whether the ramp is
    /// finished (in which case the BPM is exactly the target).
    pub fn step(&mut self) -> (f64, bool) {
        self.elapsed_pulses += 1;
        if self.elapsed_pulses >= self.total_pulses {
            return (self.target_bpm, true);
        }
        let progress = self.elapsed_pulses as f64 / self.total_pulses as f64;
        (
            self.easing.lerp(self.start_bpm, self.target_bpm, progress),
            false,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn beats_round_to_pulses() {
        assert_eq!(beats_to_pulses(4.0, 24), 96);
        assert_eq!(beats_to_pulses(1.0 / 3.0, 24), 8);
        assert_eq!(beats_to_pulses(0.01, 24), 0);
        assert_eq!(beats_to_pulses(-1.0, 24), 0);
        assert_eq!(beats_to_pulses(f64::NAN, 24), 0);
    }

    #[test]
    fn pulses_follow_elapsed_time() {
        // 125 BPM at 24 PPQN: 20 ms per pulse.
        let mut clock = PulseClock::new(125.0, 24);
        let t0 = Instant::now();
        clock.start(t0);
        assert_eq!(clock.pulse_duration(), ms(20));
        assert_eq!(clock.advance(t0), 0);
        assert_eq!(clock.advance(t0 + ms(200)), 10);
        assert_eq!(clock.advance(t0 + ms(60_000)), 3000);
    }

    #[test]
    fn advance_never_goes_backwards() {
        let mut clock = PulseClock::new(120.0, 24);
        let t0 = Instant::now();
        clock.start(t0);
        assert_eq!(clock.advance(t0 + ms(1000)), 48);
        assert_eq!(clock.advance(t0 + ms(500)), 48);
    }

    #[test]
    fn long_sessions_do_not_drift() {
        let mut clock = PulseClock::new(125.0, 24);
        let t0 = Instant::now();
        clock.start(t0);
        // Ten hours in: exactly 10 * 3600 / 0.02 pulses.
        assert_eq!(clock.advance(t0 + Duration::from_secs(36_000)), 1_800_000);
    }

    #[test]
    fn tempo_change_reanchors_at_pulse_boundary() {
        let mut clock = PulseClock::new(125.0, 24);
        let t0 = Instant::now();
        clock.start(t0);
        // 205 ms is 5 ms into pulse 10.
        clock.set_bpm(62.5, t0 + ms(205));
        // Pulse 10 kept its old timing; pulses are now 40 ms apart.
        assert_eq!(clock.pulse_instant(10), Some(t0 + ms(200)));
        assert_eq!(clock.pulse_instant(11), Some(t0 + ms(240)));
        assert_eq!(clock.advance(t0 + ms(400)), 15);
    }

    #[test]
    fn ramp_steps_reanchor_on_the_pulse_itself() {
        let mut clock = PulseClock::new(125.0, 24);
        let t0 = Instant::now();
        clock.start(t0);
        clock.set_bpm_at_pulse(62.5, 10);
        assert_eq!(clock.pulse_instant(10), Some(t0 + ms(200)));
        assert_eq!(clock.pulse_instant(12), Some(t0 + ms(280)));
    }

    #[test]
    fn pulse_instant_needs_a_started_clock() {
        let clock = PulseClock::new(120.0, 24);
        assert!(clock.pulse_instant(5).is_none());
    }

    #[test]
    fn wait_until_past_deadline_returns_immediately() {
        let past = Instant::now();
        let before = Instant::now();
        TimingStrategy::default().wait_until(past);
        TimingStrategy::Sleep.wait_until(past);
        assert!(before.elapsed() < ms(50));
    }

    #[test]
    fn spin_wait_reaches_deadline() {
        let deadline = Instant::now() + ms(5);
        TimingStrategy::default().wait_until(deadline);
        assert!(Instant::now() >= deadline);
    }

    #[test]
    fn ramp_ends_exactly_on_target() {
        let mut ramp = TempoRamp::new(100.0, 140.0, 4, Easing::Linear);
        assert_eq!(ramp.step(), (110.0, false));
        assert_eq!(ramp.step(), (120.0, false));
        assert_eq!(ramp.step(), (130.0, false));
        assert_eq!(ramp.step(), (140.0, true));
    }
}
