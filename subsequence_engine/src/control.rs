// Live control of a running scheduler.
//
// The run loops hold `&mut Scheduler` for as long as playback lasts, so
// anything that must change while it plays goes through a `SchedulerControl`
// instead: a cloneable handle over an unbounded crossbeam channel. The
// scheduler drains the channel at the top of every pulse and applies each
// command on its own thread, at that pulse.
//
// Values that can be checked without the scheduler (BPM, ramp length) are
// checked when the command is sent. Form steering is checked when it is
// applied; a bad section name is logged and ignored.
//
// Handles stay valid after the scheduler is gone; commands sent then are
// dropped.

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::debug;

use crate::clock::TimingStrategy;
use crate::easing::Easing;
use crate::error::ConfigError;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Command {
    SetBpm(f64),
    RampBpm {
        target: f64,
        beats: f64,
        easing: Easing,
    },
    SetTimingStrategy(TimingStrategy),
    /// Start `name` at the next undecided bar.
    FormJump(String),
    /// Make `name` follow the current section.
    FormQueue(String),
}

/// Send-side handle for steering a scheduler while it runs.
#[derive(Clone, Debug)]
pub struct SchedulerControl {
    sender: Sender<Command>,
}

pub(crate) fn command_channel() -> (SchedulerControl, Receiver<Command>) {
    let (sender, receiver) = unbounded();
    (SchedulerControl { sender }, receiver)
}

pub(crate) fn check_bpm(bpm: f64) -> Result<(), ConfigError> {
    if bpm.is_finite() && bpm > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidBpm(bpm))
    }
}

pub(crate) fn check_ramp_beats(beats: f64) -> Result<(), ConfigError> {
    if beats.is_finite() && beats > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidRamp(beats))
    }
}

impl SchedulerControl {
    fn send(&self, command: Command) {
        if self.sender.send(command).is_err() {
            debug!("scheduler is gone; control command dropped");
        }
    }

    /// Jump to `bpm` at the next pulse, cancelling any ramp.
    pub fn set_bpm(&self, bpm: f64) -> Result<(), ConfigError> {
        check_bpm(bpm)?;
        self.send(Command::SetBpm(bpm));
        Ok(())
    }

    /// Ramp to `target` over `beats`, starting at the next pulse.
    pub fn ramp_bpm(&self, target: f64, beats: f64, easing: Easing) -> Result<(), ConfigError> {
        check_bpm(target)?;
        check_ramp_beats(beats)?;
        self.send(Command::RampBpm {
            target,
            beats,
            easing,
        });
        Ok(())
    }

    /// Switch between plain sleeping and sleep-then-spin for later pulses.
    pub fn set_timing_strategy(&self, strategy: TimingStrategy) {
        self.send(Command::SetTimingStrategy(strategy));
    }

    /// Move a graph form to `name`, starting from its first bar at the next
    /// bar boundary not yet decided.
    pub fn form_jump(&self, name: &str) {
        self.send(Command::FormJump(name.to_string()));
    }

    /// Make `name` the section after the current one. Graph forms only.
    pub fn form_queue(&self, name: &str) {
        self.send(Command::FormQueue(name.to_string()));
    }
}
