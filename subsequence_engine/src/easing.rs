// Easing curves for tempo ramps and conductor ramps.
//
// Each curve maps progress in [0, 1] to eased progress in [0, 1] with both
// endpoints fixed. Inputs outside the range are clamped.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Easing {
    #[default]
    Linear,
    /// Quadratic: slow start.
    EaseIn,
    /// Quadratic: slow finish.
    EaseOut,
    /// Smoothstep.
    EaseInOut,
    /// Smootherstep: flatter ends than `EaseInOut`.
    SCurve,
    /// Cubic: holds near the start value, then moves late.
    Exponential,
    /// Inverse cubic: moves early, then settles.
    Logarithmic,
}

impl Easing {
    pub const ALL: [Easing; 7] = [
        Easing::Linear,
        Easing::EaseIn,
        Easing::EaseOut,
        Easing::EaseInOut,
        Easing::SCurve,
        Easing::Exponential,
        Easing::Logarithmic,
    ];

    pub fn apply(self, t: f64) -> f64 {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        match self {
            Easing::Linear => t,
            Easing::EaseIn => t * t,
            Easing::EaseOut => 1.0 - (1.0 - t) * (1.0 - t),
            Easing::EaseInOut => t * t * (3.0 - 2.0 * t),
            Easing::SCurve => t * t * t * (t * (t * 6.0 - 15.0) + 10.0),
            Easing::Exponential => t * t * t,
            Easing::Logarithmic => {
                let u = 1.0 - t;
                1.0 - u * u * u
            }
        }
    }

    /// Interpolate from `start` to `end` at progress `t`.
    pub fn lerp(self, start: f64, end: f64, t: f64) -> f64 {
        start + (end - start) * self.apply(t)
    }
}
