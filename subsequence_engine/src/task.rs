// Periodic background tasks.
//
// A task is a callback run on the worker pool every `period` beats. Its only
// channel to the patterns is `SharedData`: a task fetches or computes
// something slow and writes it under a key, and rebuild hooks read the key.
//
// Firing follows the pattern rule: the invocation for the period starting at
// pulse P is submitted at `P - lookahead` so its result is likely in place
// when patterns build the cycle at P. The first period starts at pulse 0,
// so by default a task fires as soon as playback starts. `defer` skips that
// first firing. `wait_for_initial` instead runs the first invocation
// synchronously before playback, guaranteeing its data is visible to every
// pattern's cycle 0.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{TaskError, panic_message};
use crate::shared_data::SharedData;
use crate::sink::SchedulerObserver;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub usize);

/// What a task invocation receives.
#[derive(Clone, Debug)]
pub struct TaskContext {
    /// Invocation number, from 0.
    pub cycle: u64,
    /// Pulse the period being prepared starts at.
    pub pulse: u64,
    pub data: SharedData,
}

pub type TaskFn = Arc<dyn Fn(&TaskContext) -> Result<(), TaskError> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleOptions {
    /// Skip the firing for the period starting at pulse 0.
    pub defer: bool,
    /// Run the first invocation on the calling thread when playback starts.
    pub wait_for_initial: bool,
    /// How far ahead of each period the task fires. Clamped to the period.
    pub lookahead_beats: f64,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            defer: false,
            wait_for_initial: false,
            lookahead_beats: 1.0,
        }
    }
}

/// Scheduler-side state of a registered task.
pub(crate) struct ScheduledTask {
    pub name: Arc<str>,
    pub callback: TaskFn,
    pub options: ScheduleOptions,
    pub period_pulses: u64,
    pub lookahead_pulses: u64,
    /// Start pulse of the next period to fire for.
    pub next_period_start: u64,
    /// Invocations so far.
    pub cycle: u64,
}

impl ScheduledTask {
    pub fn fire_pulse(&self) -> u64 {
        self.next_period_start.saturating_sub(self.lookahead_pulses)
    }

    /// Context for the next invocation; moves the task on one period.
    pub fn next_invocation(&mut self, data: &SharedData) -> TaskContext {
        let ctx = TaskContext {
            cycle: self.cycle,
            pulse: self.next_period_start,
            data: data.clone(),
        };
        self.cycle += 1;
        self.next_period_start += self.period_pulses;
        ctx
    }
}

/// Run one invocation, converting errors and panics into a logged
/// `TaskError` reported to the observer.
pub(crate) fn run_task(
    name: &str,
    callback: &TaskFn,
    ctx: &TaskContext,
    observer: &Arc<dyn SchedulerObserver>,
) {
    let outcome = match catch_unwind(AssertUnwindSafe(|| callback(ctx))) {
        Ok(result) => result,
        Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
    };
    if let Err(error) = outcome {
        warn!(task = name, cycle = ctx.cycle, %error, "background task failed");
        observer.on_task_error(name, &error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Errors(Mutex<Vec<String>>);

    impl SchedulerObserver for Errors {
        fn on_task_error(&self, task: &str, error: &TaskError) {
            self.0.lock().unwrap().push(format!("{task}: {error}"));
        }
    }

    fn task(period: u64, lookahead: u64, start: u64) -> ScheduledTask {
        ScheduledTask {
            name: Arc::from("t"),
            callback: Arc::new(|_: &TaskContext| Ok::<(), TaskError>(())),
            options: ScheduleOptions::default(),
            period_pulses: period,
            lookahead_pulses: lookahead,
            next_period_start: start,
            cycle: 0,
        }
    }

    #[test]
    fn fires_one_lookahead_before_each_period() {
        let data = SharedData::new();
        let mut t = task(96, 24, 0);
        assert_eq!(t.fire_pulse(), 0);
        let ctx = t.next_invocation(&data);
        assert_eq!((ctx.cycle, ctx.pulse), (0, 0));
        assert_eq!(t.fire_pulse(), 72);
        t.next_invocation(&data);
        assert_eq!(t.fire_pulse(), 168);
    }

    #[test]
    fn errors_and_panics_reach_the_observer() {
        let errors = Arc::new(Errors::default());
        let observer: Arc<dyn SchedulerObserver> = errors.clone();
        let ctx = TaskContext {
            cycle: 0,
            pulse: 0,
            data: SharedData::new(),
        };
        let failing: TaskFn = Arc::new(|_: &TaskContext| Err(TaskError::msg("feed offline")));
        let panicking: TaskFn =
            Arc::new(|_: &TaskContext| -> Result<(), TaskError> { panic!("index out of range") });
        let fine: TaskFn = Arc::new(|ctx: &TaskContext| {
            ctx.data.set("ok", true);
            Ok::<(), TaskError>(())
        });
        run_task("fetch", &failing, &ctx, &observer);
        run_task("parse", &panicking, &ctx, &observer);
        run_task("fine", &fine, &ctx, &observer);
        let seen = errors.0.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                "fetch: feed offline".to_string(),
                "parse: task panicked: index out of range".to_string(),
            ]
        );
        assert_eq!(ctx.data.get("ok"), Some(serde_json::json!(true)));
    }
}
