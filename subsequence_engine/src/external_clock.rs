// Following an external clock (MIDI clock semantics: 24 ticks per beat).
//
// State machine:
//
//   Stopped --arm()--> AwaitingStart --Start/Continue--> Running --Stop--> Stopped
//
// Start resets the pulse count to 0; Continue resumes from the current count.
// Neither plays anything by itself: the first tick after them plays the pulse
// the count stands at, then moves the count on by `pulses_per_beat / 24`.
// So after Start, tick 1 plays pulse 0 and tick 25 plays the second beat.
// Ticks are only counted while running. Signals that make no sense in the current state are ignored with a
// warning, except ticks, which a clock source sends continuously whether or
// not it is playing.
//
// The local BPM setting is meaningless while following. For display and for
// observers, the follower estimates tempo from the spacing of recent ticks.

use std::collections::VecDeque;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ConfigError;

/// Ticks per beat in the incoming clock.
pub const TICKS_PER_BEAT: u32 = 24;

/// Tick timestamps kept for tempo estimation: one beat of intervals.
const ESTIMATE_WINDOW: usize = TICKS_PER_BEAT as usize + 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClockSignal {
    Tick,
    Start,
    Stop,
    Continue,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FollowState {
    Stopped,
    AwaitingStart,
    Running,
}

/// What a signal did to the follower.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Nothing changed.
    Ignored,
    /// Began running from pulse 0.
    Started,
    /// Began running from the retained pulse count.
    Resumed,
    Stopped,
    /// A tick played this pulse.
    Advanced(u64),
}

#[derive(Clone, Debug)]
pub struct ClockFollower {
    state: FollowState,
    pulse: u64,
    pulses_per_tick: u64,
    pulses_per_beat: u32,
    tick_times: VecDeque<Instant>,
    estimated_bpm: Option<f64>,
}

impl ClockFollower {
    pub fn new(pulses_per_beat: u32) -> Result<Self, ConfigError> {
        if pulses_per_beat == 0 || pulses_per_beat % TICKS_PER_BEAT != 0 {
            return Err(ConfigError::ExternalClockResolution(pulses_per_beat));
        }
        Ok(Self {
            state: FollowState::Stopped,
            pulse: 0,
            pulses_per_tick: (pulses_per_beat / TICKS_PER_BEAT) as u64,
            pulses_per_beat,
            tick_times: VecDeque::with_capacity(ESTIMATE_WINDOW),
            estimated_bpm: None,
        })
    }

    pub fn state(&self) -> FollowState {
        self.state
    }

    /// The pulse the next tick plays.
    pub fn pulse(&self) -> u64 {
        self.pulse
    }

    pub fn pulses_per_beat(&self) -> u32 {
        self.pulses_per_beat
    }

    /// Tempo implied by the last beat's worth of ticks, once that many have
    /// arrived since the clock started.
    pub fn estimated_bpm(&self) -> Option<f64> {
        self.estimated_bpm
    }

    /// Wait for a Start or Continue.
    pub fn arm(&mut self) {
        if self.state == FollowState::Stopped {
            self.state = FollowState::AwaitingStart;
            debug!("external clock armed; waiting for start");
        }
    }

    pub fn handle(&mut self, signal: ClockSignal, now: Instant) -> Transition {
        match (self.state, signal) {
            (FollowState::Running, ClockSignal::Tick) => {
                let pulse = self.pulse;
                self.pulse += self.pulses_per_tick;
                self.record_tick(now);
                Transition::Advanced(pulse)
            }
            (_, ClockSignal::Tick) => Transition::Ignored,
            (FollowState::AwaitingStart, ClockSignal::Start) => {
                self.pulse = 0;
                self.tick_times.clear();
                self.state = FollowState::Running;
                Transition::Started
            }
            (FollowState::AwaitingStart, ClockSignal::Continue) => {
                self.tick_times.clear();
                self.state = FollowState::Running;
                Transition::Resumed
            }
            (FollowState::Running, ClockSignal::Stop) => {
                self.state = FollowState::Stopped;
                Transition::Stopped
            }
            (state, signal) => {
                warn!(?state, ?signal, "external clock signal ignored");
                Transition::Ignored
            }
        }
    }

    fn record_tick(&mut self, now: Instant) {
        if self.tick_times.len() == ESTIMATE_WINDOW {
            self.tick_times.pop_front();
        }
        self.tick_times.push_back(now);
        if self.tick_times.len() < ESTIMATE_WINDOW {
            return;
        }
        let (Some(first), Some(last)) = (self.tick_times.front(), self.tick_times.back()) else {
            return;
        };
        let span = last.saturating_duration_since(*first).as_secs_f64();
        if span > 0.0 {
            let tick_seconds = span / (ESTIMATE_WINDOW - 1) as f64;
            self.estimated_bpm = Some(60.0 / (tick_seconds * TICKS_PER_BEAT as f64));
        }
    }
}
