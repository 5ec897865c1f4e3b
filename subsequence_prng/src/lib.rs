// Seeded random source for every musical decision in subsequence.
//
// The generator is xoshiro256++ (Blackman & Vigna, 2019), with its 256-bit
// state expanded from one `u64` by SplitMix64. No other source of randomness
// is used anywhere in the workspace. Chord selection in
// `subsequence_harmony::harmonic_state` draws from a `SeqRng`, and so do form
// transitions in `subsequence_engine::form` and the per-cycle generators
// handed to pattern rebuild hooks through `RebuildContext::rng`.
//
// One master seed fans out into independent child streams via
// `derive_seed()`. The harmony, form and each pattern therefore get their own
// stream, and adding a pattern never perturbs the chord sequence.
//
// **Critical constraint: determinism.** A fixed seed and an identical call
// sequence must reproduce identical output on every platform. The core
// generator is integer-only; float helpers derive from its bits and nothing
// else.

use serde::{Deserialize, Serialize};

/// Xoshiro256++ generator used for chord draws, form transitions, and the
/// per-cycle streams exposed to pattern hooks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeqRng {
    s: [u64; 4],
}

impl SeqRng {
    /// Seed a generator. Equal seeds give equal streams.
    pub fn new(seed: u64) -> Self {
        let mut sm = seed;
        Self {
            s: [
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
            ],
        }
    }

    /// Combine a base seed with a stream index (cycle number, pattern index)
    /// into a new seed without advancing any generator. Used to hand each
    /// pattern cycle a reproducible generator of its own.
    pub fn mix_seed(base: u64, stream: u64) -> u64 {
        let mut sm = base ^ stream.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        splitmix64(&mut sm)
    }

    /// Next raw `u64`.
    pub fn next_u64(&mut self) -> u64 {
        let result = (self.s[0].wrapping_add(self.s[3]))
            .rotate_left(23)
            .wrapping_add(self.s[0]);

        let t = self.s[1] << 17;

        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];

        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);

        result
    }

    /// Upper 32 bits of the next `u64`.
    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    /// Uniform `f64` in [0, 1), built from the top 53 bits.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform `f64` in `[low, high)`. Returns `low` when the range is empty.
    pub fn uniform(&mut self, low: f64, high: f64) -> f64 {
        if high <= low {
            return low;
        }
        low + self.next_f64() * (high - low)
    }

    /// Uniform integer in `[low, high)`, rejection-sampled to avoid modulo
    /// bias.
    ///
    /// Panics if `low >= high`.
    pub fn range_u64(&mut self, low: u64, high: u64) -> u64 {
        assert!(low < high, "range_u64: low must be less than high");
        let range = high - low;
        if range.is_power_of_two() {
            return low + (self.next_u64() & (range - 1));
        }
        let threshold = range.wrapping_neg() % range;
        loop {
            let r = self.next_u64();
            if r >= threshold {
                return low + (r % range);
            }
        }
    }

    /// Uniform `usize` in `[low, high)`.
    ///
    /// Panics if `low >= high`.
    pub fn range_usize(&mut self, low: usize, high: usize) -> usize {
        self.range_u64(low as u64, high as u64) as usize
    }

    /// `true` with probability `p`. `p <= 0` never fires, `p >= 1` always does.
    pub fn random_bool(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    /// Pick an index with probability proportional to its weight.
    ///
    /// Negative, NaN and infinite weights count as zero. Returns `None` for an
    /// empty slice or when every weight is zero. Exactly one `u64` is consumed
    /// per successful draw, so the stream position depends only on how many
    /// draws were made, never on the weights.
    pub fn weighted_index(&mut self, weights: &[f64]) -> Option<usize> {
        let clean = |w: f64| if w.is_finite() && w > 0.0 { w } else { 0.0 };
        let total: f64 = weights.iter().copied().map(clean).sum();
        if total <= 0.0 {
            return None;
        }
        let target = self.next_f64() * total;
        let mut cumulative = 0.0;
        let mut last_positive = None;
        for (i, &w) in weights.iter().enumerate() {
            let w = clean(w);
            if w == 0.0 {
                continue;
            }
            last_positive = Some(i);
            cumulative += w;
            if target < cumulative {
                return Some(i);
            }
        }
        // Floating-point summation can leave `target` a hair above the final
        // cumulative value.
        last_positive
    }

    /// Draw a seed for an independent child generator.
    pub fn derive_seed(&mut self) -> u64 {
        let raw = self.next_u64();
        let mut sm = raw;
        splitmix64(&mut sm)
    }

    /// Convenience for `SeqRng::new(self.derive_seed())`.
    pub fn fork(&mut self) -> SeqRng {
        SeqRng::new(self.derive_seed())
    }
}

/// SplitMix64 step, used only to expand seeds.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
