// The built-in harmonic styles.
//
// Each style is a small `ChordGraph` impl: name the chords of the key, list
// the weighted edges between them, and describe the gravity sets. The edge
// tables are the musical content; the weights reuse the shared scale in
// `chord_graph.rs` (STRONG 6 .. WEAK 1) plus a few style-specific colour
// weights declared next to the style that uses them.
//
// Every style here is checked in all twelve keys by the tests in
// `chord_graph.rs`.

use crate::chord::{Chord, ChordQuality};
use crate::chord_graph::{
    ChordGraph, GravitySets, WEIGHT_COMMON, WEIGHT_DECEPTIVE, WEIGHT_MEDIUM, WEIGHT_STRONG,
    WEIGHT_WEAK, graph_from_edges,
};
use crate::error::HarmonyError;
use crate::mode::Mode;
use crate::weighted_graph::WeightedGraph;

use ChordQuality::{Augmented, Dominant7, Major, Minor, Sus2, Sus4};

type Built = Result<(WeightedGraph<Chord>, Chord), HarmonyError>;

fn at(key: u8, offset: u8, quality: ChordQuality) -> Chord {
    Chord::new(key + offset, quality)
}

// ---------------------------------------------------------------------------
// Functional major
// ---------------------------------------------------------------------------

/// Classical major-key functional harmony, optionally with V7.
#[derive(Debug, Clone, Copy)]
pub struct FunctionalMajor {
    pub dominant_7th: bool,
}

impl ChordGraph for FunctionalMajor {
    fn name(&self) -> &str {
        "functional_major"
    }

    fn build(&self, key: u8) -> Built {
        let [i, ii, iii, iv, v, vi, vii] = Mode::Ionian.diatonic_triads(key);
        let mut edges = vec![
            (i, iv, WEIGHT_COMMON),
            (i, v, WEIGHT_COMMON),
            (i, vi, WEIGHT_COMMON),
            (i, ii, WEIGHT_WEAK),
            (ii, v, WEIGHT_STRONG),
            (iii, vi, WEIGHT_COMMON),
            (iii, iv, WEIGHT_WEAK),
            (iv, v, WEIGHT_STRONG),
            (iv, ii, WEIGHT_COMMON),
            (v, i, WEIGHT_STRONG),
            (v, vi, WEIGHT_DECEPTIVE),
            (vi, ii, WEIGHT_COMMON),
            (vi, iv, WEIGHT_COMMON),
            (vi, v, WEIGHT_WEAK),
            (vii, i, WEIGHT_STRONG),
        ];
        if self.dominant_7th {
            let v7 = at(key, 7, Dominant7);
            edges.extend([
                (v, v7, WEIGHT_WEAK),
                (v7, i, WEIGHT_STRONG),
                (v7, vi, WEIGHT_DECEPTIVE),
            ]);
        }
        Ok((graph_from_edges(&edges)?, i))
    }

    fn gravity_sets(&self, key: u8) -> GravitySets {
        let v7 = at(key, 7, Dominant7);
        let mut diatonic = Mode::Ionian.diatonic_triads(key).to_vec();
        diatonic.push(v7);
        let functional = [at(key, 0, Major), at(key, 2, Minor), at(key, 7, Major), v7];
        GravitySets::from_chords(diatonic, functional)
    }
}

// ---------------------------------------------------------------------------
// Aeolian minor
// ---------------------------------------------------------------------------

const WEIGHT_PHRYGIAN: u32 = 5;
const WEIGHT_PLAGAL: u32 = 4;

/// Natural minor borrowing the harmonic-minor V and vii° for cadences and a
/// Phrygian bII for tension.
#[derive(Debug, Clone, Copy)]
pub struct AeolianMinor {
    pub dominant_7th: bool,
}

impl ChordGraph for AeolianMinor {
    fn name(&self) -> &str {
        "aeolian_minor"
    }

    fn build(&self, key: u8) -> Built {
        let [i, ii_dim, iii, iv, v_minor, vi, vii] = Mode::Aeolian.diatonic_triads(key);
        let v = at(key, 7, Major);
        let leading_dim = at(key, 11, ChordQuality::Diminished);
        let flat_two = at(key, 1, Major);
        let mut edges = vec![
            (i, iv, WEIGHT_PLAGAL),
            (i, vi, WEIGHT_COMMON),
            (i, vii, WEIGHT_COMMON),
            (i, flat_two, WEIGHT_WEAK),
            (i, v_minor, WEIGHT_COMMON),
            (v_minor, vi, WEIGHT_COMMON),
            (v_minor, iv, WEIGHT_COMMON),
            (v_minor, i, WEIGHT_WEAK),
            (iv, i, WEIGHT_PLAGAL),
            (iv, v, WEIGHT_MEDIUM),
            (iv, vi, WEIGHT_WEAK),
            (vi, vii, WEIGHT_MEDIUM),
            (vii, i, WEIGHT_MEDIUM),
            (vii, vi, WEIGHT_COMMON),
            (vi, v, WEIGHT_MEDIUM),
            (flat_two, i, WEIGHT_PHRYGIAN),
            (flat_two, v, WEIGHT_COMMON),
            (v, i, WEIGHT_STRONG),
            (v, vi, WEIGHT_DECEPTIVE),
            (ii_dim, v, WEIGHT_MEDIUM),
            (leading_dim, i, WEIGHT_STRONG),
            (iii, vi, WEIGHT_COMMON),
            (iii, iv, WEIGHT_WEAK),
        ];
        if self.dominant_7th {
            let v7 = at(key, 7, Dominant7);
            edges.extend([
                (v, v7, WEIGHT_WEAK),
                (v7, i, WEIGHT_STRONG),
                (v7, vi, WEIGHT_DECEPTIVE),
            ]);
        }
        Ok((graph_from_edges(&edges)?, i))
    }

    fn gravity_sets(&self, key: u8) -> GravitySets {
        let v = at(key, 7, Major);
        let flat_two = at(key, 1, Major);
        let v7 = at(key, 7, Dominant7);
        let mut diatonic = Mode::Aeolian.diatonic_triads(key).to_vec();
        diatonic.extend([v, flat_two, v7]);
        let functional = [at(key, 0, Minor), at(key, 5, Minor), v, flat_two, v7];
        GravitySets::from_chords(diatonic, functional)
    }
}

// ---------------------------------------------------------------------------
// Dorian minor
// ---------------------------------------------------------------------------

const WEIGHT_DORIAN: u32 = 5;

/// Modal minor centred on the i <-> IV sway; no harmonic-minor dominant.
#[derive(Debug, Clone, Copy)]
pub struct DorianMinor {
    pub dominant_7th: bool,
}

impl ChordGraph for DorianMinor {
    fn name(&self) -> &str {
        "dorian_minor"
    }

    fn build(&self, key: u8) -> Built {
        let [i, ii, iii, iv, v, vi_dim, vii] = Mode::Dorian.diatonic_triads(key);
        let mut edges = vec![
            (i, iv, WEIGHT_DORIAN),
            (iv, i, WEIGHT_DORIAN),
            (i, ii, WEIGHT_COMMON),
            (i, vii, WEIGHT_COMMON),
            (i, v, WEIGHT_WEAK),
            (i, iii, WEIGHT_WEAK),
            (ii, v, WEIGHT_MEDIUM),
            (ii, iv, WEIGHT_COMMON),
            (ii, i, WEIGHT_WEAK),
            (iii, iv, WEIGHT_COMMON),
            (iii, vii, WEIGHT_COMMON),
            (iii, i, WEIGHT_WEAK),
            (iv, v, WEIGHT_COMMON),
            (iv, vii, WEIGHT_WEAK),
            (v, i, WEIGHT_MEDIUM),
            (v, iv, WEIGHT_COMMON),
            (v, iii, WEIGHT_WEAK),
            (vii, i, WEIGHT_MEDIUM),
            (vii, iv, WEIGHT_COMMON),
            (vii, ii, WEIGHT_WEAK),
            (vi_dim, v, WEIGHT_MEDIUM),
            (vi_dim, i, WEIGHT_WEAK),
        ];
        if self.dominant_7th {
            let v7 = at(key, 7, Dominant7);
            edges.extend([(v, v7, WEIGHT_WEAK), (v7, i, WEIGHT_STRONG)]);
        }
        Ok((graph_from_edges(&edges)?, i))
    }

    fn gravity_sets(&self, key: u8) -> GravitySets {
        let functional = [
            at(key, 0, Minor),
            at(key, 5, Major),
            at(key, 7, Minor),
            at(key, 10, Major),
        ];
        GravitySets::from_chords(Mode::Dorian.diatonic_triads(key), functional)
    }
}

// ---------------------------------------------------------------------------
// Phrygian minor
// ---------------------------------------------------------------------------

/// Four minor chords (i, bii, iv, v) orbiting the half-step above the tonic.
#[derive(Debug, Clone, Copy)]
pub struct PhrygianMinor;

impl ChordGraph for PhrygianMinor {
    fn name(&self) -> &str {
        "phrygian_minor"
    }

    fn build(&self, key: u8) -> Built {
        let i = at(key, 0, Minor);
        let flat_two = at(key, 1, Minor);
        let iv = at(key, 5, Minor);
        let v = at(key, 7, Minor);
        let edges = [
            (i, flat_two, WEIGHT_MEDIUM),
            (i, iv, WEIGHT_MEDIUM),
            (i, v, WEIGHT_WEAK),
            (flat_two, i, WEIGHT_STRONG),
            (flat_two, v, WEIGHT_WEAK),
            (iv, i, WEIGHT_STRONG),
            (iv, v, WEIGHT_MEDIUM),
            (v, i, WEIGHT_MEDIUM),
            (v, flat_two, WEIGHT_WEAK),
        ];
        Ok((graph_from_edges(&edges)?, i))
    }

    fn gravity_sets(&self, key: u8) -> GravitySets {
        GravitySets::from_chords(
            [0, 1, 5, 7].map(|o| at(key, o, Minor)),
            [0, 1, 5].map(|o| at(key, o, Minor)),
        )
    }
}

// ---------------------------------------------------------------------------
// Lydian major
// ---------------------------------------------------------------------------

const WEIGHT_LYDIAN: u32 = 5;

/// Bright major built around the I <-> II sway of the raised 4th.
#[derive(Debug, Clone, Copy)]
pub struct LydianMajor {
    pub dominant_7th: bool,
}

impl ChordGraph for LydianMajor {
    fn name(&self) -> &str {
        "lydian_major"
    }

    fn build(&self, key: u8) -> Built {
        let [i, ii, iii, sharp_iv_dim, v, vi, vii] = Mode::Lydian.diatonic_triads(key);
        let mut edges = vec![
            (i, ii, WEIGHT_LYDIAN),
            (ii, i, WEIGHT_LYDIAN),
            (i, v, WEIGHT_COMMON),
            (i, vi, WEIGHT_COMMON),
            (i, iii, WEIGHT_WEAK),
            (ii, v, WEIGHT_COMMON),
            (ii, iii, WEIGHT_WEAK),
            (iii, vi, WEIGHT_COMMON),
            (iii, i, WEIGHT_WEAK),
            (v, i, WEIGHT_STRONG),
            (v, vi, WEIGHT_DECEPTIVE),
            (vi, ii, WEIGHT_COMMON),
            (vi, v, WEIGHT_COMMON),
            (vi, i, WEIGHT_WEAK),
            (vii, i, WEIGHT_STRONG),
            (vii, ii, WEIGHT_WEAK),
            (sharp_iv_dim, v, WEIGHT_MEDIUM),
            (sharp_iv_dim, i, WEIGHT_WEAK),
        ];
        if self.dominant_7th {
            let v7 = at(key, 7, Dominant7);
            edges.extend([
                (v, v7, WEIGHT_WEAK),
                (v7, i, WEIGHT_STRONG),
                (v7, vi, WEIGHT_DECEPTIVE),
            ]);
        }
        Ok((graph_from_edges(&edges)?, i))
    }

    fn gravity_sets(&self, key: u8) -> GravitySets {
        let v7 = at(key, 7, Dominant7);
        let mut diatonic = Mode::Lydian.diatonic_triads(key).to_vec();
        diatonic.push(v7);
        let functional = [at(key, 0, Major), at(key, 2, Major), at(key, 7, Major), v7];
        GravitySets::from_chords(diatonic, functional)
    }
}

// ---------------------------------------------------------------------------
// Mixolydian
// ---------------------------------------------------------------------------

const WEIGHT_MIXOLYDIAN: u32 = 5;

/// Major with a flat seventh; the I <-> bVII sway replaces the dominant.
#[derive(Debug, Clone, Copy)]
pub struct Mixolydian;

impl ChordGraph for Mixolydian {
    fn name(&self) -> &str {
        "mixolydian"
    }

    fn build(&self, key: u8) -> Built {
        let [i, ii, iii_dim, iv, v, vi, flat_vii] = Mode::Mixolydian.diatonic_triads(key);
        let edges = [
            (i, flat_vii, WEIGHT_MIXOLYDIAN),
            (flat_vii, i, WEIGHT_MIXOLYDIAN),
            (iv, i, WEIGHT_STRONG),
            (i, iv, WEIGHT_MEDIUM),
            (flat_vii, iv, WEIGHT_MEDIUM),
            (iv, flat_vii, WEIGHT_COMMON),
            (v, i, WEIGHT_MEDIUM),
            (i, v, WEIGHT_COMMON),
            (ii, v, WEIGHT_COMMON),
            (ii, iv, WEIGHT_COMMON),
            (i, ii, WEIGHT_WEAK),
            (vi, flat_vii, WEIGHT_COMMON),
            (vi, iv, WEIGHT_WEAK),
            (i, vi, WEIGHT_WEAK),
            (v, vi, WEIGHT_WEAK),
            (iii_dim, iv, WEIGHT_WEAK),
            (iii_dim, i, WEIGHT_WEAK),
            (ii, iii_dim, WEIGHT_WEAK),
        ];
        Ok((graph_from_edges(&edges)?, i))
    }

    fn gravity_sets(&self, key: u8) -> GravitySets {
        let functional = [at(key, 0, Major), at(key, 5, Major), at(key, 10, Major)];
        GravitySets::from_chords(Mode::Mixolydian.diatonic_triads(key), functional)
    }
}

// ---------------------------------------------------------------------------
// Suspended
// ---------------------------------------------------------------------------

const WEIGHT_COLOUR: u32 = 5;

/// Open sus2/sus4 colours on I, IV, V and bVII, resolving now and then to a
/// minor tonic. The tonic is Isus2.
#[derive(Debug, Clone, Copy)]
pub struct Suspended;

impl ChordGraph for Suspended {
    fn name(&self) -> &str {
        "suspended"
    }

    fn build(&self, key: u8) -> Built {
        let i2 = at(key, 0, Sus2);
        let i4 = at(key, 0, Sus4);
        let iv2 = at(key, 5, Sus2);
        let iv4 = at(key, 5, Sus4);
        let v2 = at(key, 7, Sus2);
        let v4 = at(key, 7, Sus4);
        let vii2 = at(key, 10, Sus2);
        let i_minor = at(key, 0, Minor);
        let edges = [
            (i2, i4, WEIGHT_COLOUR),
            (i4, i2, WEIGHT_COLOUR),
            (iv2, iv4, WEIGHT_COLOUR),
            (iv4, iv2, WEIGHT_COLOUR),
            (v2, v4, WEIGHT_COLOUR),
            (v4, v2, WEIGHT_COLOUR),
            (i2, iv2, WEIGHT_MEDIUM),
            (i4, iv4, WEIGHT_MEDIUM),
            (iv2, i2, WEIGHT_MEDIUM),
            (iv4, i4, WEIGHT_MEDIUM),
            (i2, v2, WEIGHT_COMMON),
            (i4, v4, WEIGHT_COMMON),
            (v2, i2, WEIGHT_MEDIUM),
            (v4, i4, WEIGHT_MEDIUM),
            (i2, vii2, WEIGHT_COMMON),
            (vii2, i2, WEIGHT_COMMON),
            (vii2, iv2, WEIGHT_WEAK),
            (iv2, vii2, WEIGHT_WEAK),
            (i4, i_minor, WEIGHT_WEAK),
            (v4, i_minor, WEIGHT_WEAK),
            (i_minor, i2, WEIGHT_MEDIUM),
            (i_minor, i4, WEIGHT_COMMON),
            (iv2, v4, WEIGHT_WEAK),
            (v2, iv4, WEIGHT_WEAK),
        ];
        Ok((graph_from_edges(&edges)?, i2))
    }

    fn gravity_sets(&self, key: u8) -> GravitySets {
        let mut diatonic: Vec<Chord> = [0, 5, 7, 10]
            .into_iter()
            .flat_map(|o| [at(key, o, Sus2), at(key, o, Sus4)])
            .collect();
        diatonic.push(at(key, 0, Minor));
        let functional = [at(key, 0, Sus2), at(key, 0, Sus4), at(key, 0, Minor)];
        GravitySets::from_chords(diatonic, functional)
    }
}

// ---------------------------------------------------------------------------
// Chromatic mediant
// ---------------------------------------------------------------------------

const WEIGHT_MEDIANT: u32 = 5;

/// Major chords a third away from the tonic (bIII, III, bVI, VI), with a
/// minor tonic and minor iv for shade.
#[derive(Debug, Clone, Copy)]
pub struct ChromaticMediant;

impl ChordGraph for ChromaticMediant {
    fn name(&self) -> &str {
        "chromatic_mediant"
    }

    fn build(&self, key: u8) -> Built {
        let i = at(key, 0, Major);
        let flat_iii = at(key, 3, Major);
        let iii = at(key, 4, Major);
        let flat_vi = at(key, 8, Major);
        let vi = at(key, 9, Major);
        let i_minor = at(key, 0, Minor);
        let iv_minor = at(key, 5, Minor);
        let edges = [
            (i, flat_iii, WEIGHT_MEDIANT),
            (i, iii, WEIGHT_MEDIANT),
            (i, flat_vi, WEIGHT_COMMON),
            (i, vi, WEIGHT_COMMON),
            (i, i_minor, WEIGHT_WEAK),
            (flat_iii, i, WEIGHT_MEDIANT),
            (flat_iii, flat_vi, WEIGHT_COMMON),
            (flat_iii, vi, WEIGHT_MEDIUM),
            (iii, i, WEIGHT_MEDIANT),
            (iii, flat_vi, WEIGHT_MEDIUM),
            (iii, vi, WEIGHT_COMMON),
            (iii, flat_iii, WEIGHT_WEAK),
            (flat_vi, i, WEIGHT_MEDIANT),
            (flat_vi, iii, WEIGHT_COMMON),
            (flat_vi, flat_iii, WEIGHT_COMMON),
            (flat_vi, iv_minor, WEIGHT_WEAK),
            (vi, i, WEIGHT_MEDIUM),
            (vi, iii, WEIGHT_COMMON),
            (vi, flat_iii, WEIGHT_COMMON),
            (vi, flat_vi, WEIGHT_WEAK),
            (i_minor, flat_iii, WEIGHT_MEDIANT),
            (i_minor, flat_vi, WEIGHT_COMMON),
            (i_minor, i, WEIGHT_MEDIUM),
            (iv_minor, i, WEIGHT_MEDIUM),
            (iv_minor, flat_vi, WEIGHT_COMMON),
            (iv_minor, flat_iii, WEIGHT_WEAK),
        ];
        Ok((graph_from_edges(&edges)?, i))
    }

    fn gravity_sets(&self, key: u8) -> GravitySets {
        let mut diatonic: Vec<Chord> = [0, 3, 4, 8, 9].map(|o| at(key, o, Major)).to_vec();
        diatonic.extend([at(key, 0, Minor), at(key, 5, Minor)]);
        let functional = [at(key, 0, Major), at(key, 3, Major), at(key, 8, Major)];
        GravitySets::from_chords(diatonic, functional)
    }
}

// ---------------------------------------------------------------------------
// Whole tone
// ---------------------------------------------------------------------------

const WEIGHT_STEP: u32 = 4;
const WEIGHT_THIRD: u32 = 3;
const WEIGHT_LEAP: u32 = 2;

/// Six augmented triads a whole tone apart, fully connected and weighted only
/// by distance. There is no functional hierarchy.
#[derive(Debug, Clone, Copy)]
pub struct WholeTone;

impl WholeTone {
    fn chords(key: u8) -> [Chord; 6] {
        std::array::from_fn(|i| at(key, 2 * i as u8, Augmented))
    }
}

impl ChordGraph for WholeTone {
    fn name(&self) -> &str {
        "whole_tone"
    }

    fn build(&self, key: u8) -> Built {
        let chords = Self::chords(key);
        let mut edges = Vec::with_capacity(30);
        for (i, &from) in chords.iter().enumerate() {
            for (j, &to) in chords.iter().enumerate() {
                if i == j {
                    continue;
                }
                let steps = i.abs_diff(j).min(6 - i.abs_diff(j));
                let weight = match steps {
                    1 => WEIGHT_STEP,
                    2 => WEIGHT_THIRD,
                    _ => WEIGHT_LEAP,
                };
                edges.push((from, to, weight));
            }
        }
        Ok((graph_from_edges(&edges)?, chords[0]))
    }

    fn gravity_sets(&self, key: u8) -> GravitySets {
        GravitySets::from_chords(Self::chords(key), [at(key, 0, Augmented)])
    }
}

// ---------------------------------------------------------------------------
// Diminished
// ---------------------------------------------------------------------------

const WEIGHT_SYMMETRY: u32 = 5;
const WEIGHT_ESCAPE: u32 = 4;
const WEIGHT_RESOLVE: u32 = 4;

/// Octatonic harmony: four diminished triads a minor third apart, each with
/// an escape to the dominant seventh a semitone above.
#[derive(Debug, Clone, Copy)]
pub struct Diminished;

impl Diminished {
    fn dims(key: u8) -> [Chord; 4] {
        [0, 3, 6, 9].map(|o| at(key, o, ChordQuality::Diminished))
    }

    fn doms(key: u8) -> [Chord; 4] {
        [1, 4, 7, 10].map(|o| at(key, o, Dominant7))
    }
}

impl ChordGraph for Diminished {
    fn name(&self) -> &str {
        "diminished"
    }

    fn build(&self, key: u8) -> Built {
        let dims = Self::dims(key);
        let doms = Self::doms(key);
        let mut edges = Vec::with_capacity(32);
        for (i, &from) in dims.iter().enumerate() {
            for (j, &to) in dims.iter().enumerate() {
                if i != j {
                    edges.push((from, to, WEIGHT_SYMMETRY));
                }
            }
        }
        for (&dim, &dom) in dims.iter().zip(&doms) {
            edges.push((dim, dom, WEIGHT_ESCAPE));
            edges.push((dom, dim, WEIGHT_RESOLVE));
        }
        for (i, &from) in doms.iter().enumerate() {
            for (j, &to) in doms.iter().enumerate() {
                if i != j {
                    edges.push((from, to, WEIGHT_COMMON));
                }
            }
        }
        Ok((graph_from_edges(&edges)?, dims[0]))
    }

    fn gravity_sets(&self, key: u8) -> GravitySets {
        let dims = Self::dims(key);
        let mut diatonic = dims.to_vec();
        diatonic.extend(Self::doms(key));
        GravitySets::from_chords(diatonic, dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn functional_major_in_c_has_expected_cadence() {
        let (graph, tonic) = FunctionalMajor { dominant_7th: true }.build(0).unwrap();
        assert_eq!(tonic, Chord::major(0));
        assert_eq!(graph.weight(&Chord::major(7), &Chord::major(0)), Some(WEIGHT_STRONG));
        assert_eq!(
            graph.weight(&Chord::new(7, Dominant7), &Chord::major(0)),
            Some(WEIGHT_STRONG)
        );
    }

    #[test]
    fn dominant_seventh_is_optional() {
        let (with, _) = FunctionalMajor { dominant_7th: true }.build(0).unwrap();
        let (without, _) = FunctionalMajor { dominant_7th: false }.build(0).unwrap();
        assert!(with.contains(&Chord::new(7, Dominant7)));
        assert!(!without.contains(&Chord::new(7, Dominant7)));
        assert_eq!(with.node_count(), without.node_count() + 1);
    }

    #[test]
    fn aeolian_borrows_major_dominant() {
        let (graph, tonic) = AeolianMinor { dominant_7th: false }.build(9).unwrap();
        assert_eq!(tonic, Chord::minor(9));
        assert_eq!(graph.weight(&Chord::major(4), &tonic), Some(WEIGHT_STRONG));
        assert_eq!(graph.weight(&Chord::major(10), &tonic), Some(WEIGHT_PHRYGIAN));
    }

    #[test]
    fn dorian_sways_between_i_and_major_iv() {
        let (graph, tonic) = DorianMinor { dominant_7th: false }.build(2).unwrap();
        assert_eq!(tonic, Chord::minor(2));
        assert_eq!(graph.weight(&tonic, &Chord::major(7)), Some(WEIGHT_DORIAN));
        assert_eq!(graph.weight(&Chord::major(7), &tonic), Some(WEIGHT_DORIAN));
    }

    #[test]
    fn whole_tone_is_complete_and_weighted_by_distance() {
        let (graph, tonic) = WholeTone.build(0).unwrap();
        assert_eq!(graph.node_count(), 6);
        assert_eq!(graph.edge_count(), 30);
        let aug = |r| Chord::new(r, Augmented);
        assert_eq!(graph.weight(&tonic, &aug(2)), Some(WEIGHT_STEP));
        assert_eq!(graph.weight(&tonic, &aug(4)), Some(WEIGHT_THIRD));
        assert_eq!(graph.weight(&tonic, &aug(6)), Some(WEIGHT_LEAP));
        assert_eq!(graph.weight(&tonic, &aug(10)), Some(WEIGHT_STEP));
    }

    #[test]
    fn diminished_pairs_each_dim_with_dominant_above() {
        let (graph, tonic) = Diminished.build(0).unwrap();
        assert_eq!(graph.node_count(), 8);
        assert_eq!(
            graph.weight(&tonic, &Chord::new(1, Dominant7)),
            Some(WEIGHT_ESCAPE)
        );
        assert_eq!(
            graph.weight(&Chord::new(1, Dominant7), &tonic),
            Some(WEIGHT_RESOLVE)
        );
    }

    #[test]
    fn suspended_tonic_is_sus2() {
        let (_, tonic) = Suspended.build(5).unwrap();
        assert_eq!(tonic, Chord::new(5, Sus2));
    }
}
