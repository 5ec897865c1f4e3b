// Inversion choice by minimal total voice movement.
//
// Each consumer that wants smooth chord changes (a pad, a bass line) owns its
// own `VoiceLeadingState`, so independent parts voice-lead independently. The
// engine keeps one per pattern that asks for voice leading and updates it once
// per chord change.
//
// Inversions are cyclic rotations of the chord's interval stack: inversion k
// lifts the lowest k tones an octave. Pitch content never changes, only which
// tone is on the bottom.
//
// Candidates are compared with the previous voicing index by index. When the
// chord size changed, the candidate is stretched (repeating its tones an
// octave higher) or truncated to the previous voicing's length for the
// comparison only; the returned voicing always has the chord's own size.

/// Movement cost between two index-aligned voicings.
fn movement(candidate: &[i32], previous: &[i32]) -> i32 {
    let n = previous.len();
    if candidate.is_empty() || n == 0 {
        return 0;
    }
    let m = candidate.len();
    (0..n)
        .map(|i| {
            let octave = (i / m) as i32 * 12;
            let pitch = candidate[i % m] + octave;
            (pitch - previous[i]).abs()
        })
        .sum()
}

/// All inversions of `intervals` as MIDI pitches above `root_midi`.
///
/// Index 0 is root position.
pub fn inversions(intervals: &[u8], root_midi: i32) -> Vec<Vec<i32>> {
    let n = intervals.len();
    (0..n)
        .map(|k| {
            intervals[k..]
                .iter()
                .map(|&i| root_midi + i as i32)
                .chain(intervals[..k].iter().map(|&i| root_midi + i as i32 + 12))
                .collect()
        })
        .collect()
}

/// Index of the candidate with the least total movement from `previous`.
/// Ties go to the lowest index. Returns 0 for an empty candidate list.
pub fn select_inversion(candidates: &[Vec<i32>], previous: &[i32]) -> usize {
    let mut best = 0;
    let mut best_cost = i32::MAX;
    for (i, candidate) in candidates.iter().enumerate() {
        let cost = movement(candidate, previous);
        if cost < best_cost {
            best = i;
            best_cost = cost;
        }
    }
    best
}

/// Clamp a voicing into the MIDI note range.
pub fn to_midi(voicing: &[i32]) -> Vec<u8> {
    voicing.iter().map(|&p| p.clamp(0, 127) as u8).collect()
}

/// The last voicing handed out to one consumer.
#[derive(Debug, Clone, Default)]
pub struct VoiceLeadingState {
    last_voicing: Option<Vec<i32>>,
}

impl VoiceLeadingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_voicing(&self) -> Option<&[i32]> {
        self.last_voicing.as_deref()
    }

    /// Voice `intervals` with its root at `root_midi`, choosing the inversion
    /// closest to the previous voicing. The first call returns root position.
    pub fn next(&mut self, intervals: &[u8], root_midi: i32) -> Vec<i32> {
        let candidates = inversions(intervals, root_midi);
        let chosen = match &self.last_voicing {
            Some(previous) => {
                let i = select_inversion(&candidates, previous);
                candidates.into_iter().nth(i).unwrap_or_default()
            }
            None => candidates.into_iter().next().unwrap_or_default(),
        };
        self.last_voicing = Some(chosen.clone());
        chosen
    }

    /// Forget the previous voicing.
    pub fn reset(&mut self) {
        self.last_voicing = None;
    }
}
