// Song form: named sections measured in bars.
//
// Two progressions are supported:
// - Sequence: a fixed list of `(name, bars)`, optionally looping. The form
//   ends (section becomes `None`) after the last section unless it loops.
// - Graph: sections joined by weighted transitions (`WeightedGraph<String>`).
//   The next section is drawn from the seeded generator as soon as a section
//   is entered, so patterns can see `next_section` for lead-ins. Sections with
//   no outgoing transitions are terminal: the form ends after them.
//
// The scheduler calls `advance_bar()` once per bar boundary, before any
// pattern rebuild on that pulse, and logs section changes.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use subsequence_harmony::WeightedGraph;
use subsequence_prng::SeqRng;

use crate::error::ConfigError;

/// A section in a graph-mode form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormSection {
    pub name: String,
    pub bars: u32,
    /// Weighted successors. Empty means terminal.
    #[serde(default)]
    pub next: Vec<(String, u32)>,
}

impl FormSection {
    pub fn new(name: impl Into<String>, bars: u32, next: &[(&str, u32)]) -> Self {
        Self {
            name: name.into(),
            bars,
            next: next.iter().map(|&(n, w)| (n.to_string(), w)).collect(),
        }
    }
}

/// Read-only snapshot of the current section.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionInfo {
    pub name: String,
    /// Bar within the section, from 0.
    pub bar: u32,
    /// Length of the section in bars.
    pub bars: u32,
    /// How many sections have been entered before this one.
    pub index: usize,
    /// The section that follows, if decided.
    pub next_section: Option<String>,
}

impl SectionInfo {
    /// Fraction of the section elapsed, in [0, 1).
    pub fn progress(&self) -> f64 {
        if self.bars == 0 {
            0.0
        } else {
            self.bar as f64 / self.bars as f64
        }
    }

    pub fn is_first_bar(&self) -> bool {
        self.bar == 0
    }

    pub fn is_last_bar(&self) -> bool {
        self.bar + 1 >= self.bars
    }
}

#[derive(Clone, Debug)]
enum Progression {
    Sequence {
        sections: Vec<(String, u32)>,
        looping: bool,
        position: usize,
    },
    Graph {
        graph: WeightedGraph<String>,
        bars: FxHashMap<String, u32>,
        terminal: FxHashSet<String>,
        rng: SeqRng,
    },
}

#[derive(Clone, Debug)]
pub struct FormState {
    progression: Progression,
    current: Option<(String, u32)>,
    bar_in_section: u32,
    section_index: usize,
    total_bars: u64,
    next_section: Option<String>,
}

impl FormState {
    /// A fixed list of sections played in order.
    pub fn sequence(sections: &[(&str, u32)], looping: bool) -> Result<Self, ConfigError> {
        if let Some((name, _)) = sections.iter().find(|(_, bars)| *bars == 0) {
            return Err(ConfigError::InvalidForm(format!(
                "section {name:?} must last at least one bar"
            )));
        }
        let sections: Vec<(String, u32)> =
            sections.iter().map(|&(n, b)| (n.to_string(), b)).collect();
        let current = sections.first().cloned();
        let mut form = Self {
            progression: Progression::Sequence {
                sections,
                looping,
                position: 0,
            },
            current,
            bar_in_section: 0,
            section_index: 0,
            total_bars: 0,
            next_section: None,
        };
        form.pick_next();
        Ok(form)
    }

    /// Sections joined by weighted transitions, starting at `start` (or the
    /// first section when `None`).
    pub fn graph(
        sections: &[FormSection],
        start: Option<&str>,
        seed: u64,
    ) -> Result<Self, ConfigError> {
        let mut graph = WeightedGraph::new();
        let mut bars = FxHashMap::default();
        let mut terminal = FxHashSet::default();
        for section in sections {
            if section.bars == 0 {
                return Err(ConfigError::InvalidForm(format!(
                    "section {:?} must last at least one bar",
                    section.name
                )));
            }
            if bars.insert(section.name.clone(), section.bars).is_some() {
                return Err(ConfigError::InvalidForm(format!(
                    "section {:?} is defined twice",
                    section.name
                )));
            }
        }
        for section in sections {
            let mut any_edge = false;
            for (target, weight) in &section.next {
                if !bars.contains_key(target) {
                    return Err(ConfigError::InvalidForm(format!(
                        "section {:?} leads to unknown section {target:?}",
                        section.name
                    )));
                }
                any_edge |= graph.add_transition(section.name.clone(), target.clone(), *weight);
            }
            if !any_edge {
                terminal.insert(section.name.clone());
            }
        }
        let start = match start {
            Some(name) => name.to_string(),
            None => sections
                .first()
                .map(|s| s.name.clone())
                .ok_or_else(|| ConfigError::InvalidForm("no sections".into()))?,
        };
        let Some(&start_bars) = bars.get(&start) else {
            return Err(ConfigError::InvalidForm(format!(
                "start section {start:?} is not defined"
            )));
        };
        let mut form = Self {
            progression: Progression::Graph {
                graph,
                bars,
                terminal,
                rng: SeqRng::new(seed),
            },
            current: Some((start, start_bars)),
            bar_in_section: 0,
            section_index: 0,
            total_bars: 0,
            next_section: None,
        };
        form.pick_next();
        Ok(form)
    }

    fn pick_next(&mut self) {
        let Some((current, _)) = &self.current else {
            self.next_section = None;
            return;
        };
        self.next_section = match &mut self.progression {
            Progression::Sequence {
                sections,
                looping,
                position,
            } => {
                let next = *position + 1;
                if next < sections.len() {
                    Some(sections[next].0.clone())
                } else if *looping {
                    sections.first().map(|s| s.0.clone())
                } else {
                    None
                }
            }
            Progression::Graph {
                graph,
                terminal,
                rng,
                ..
            } => {
                if terminal.contains(current) {
                    None
                } else {
                    let successors = graph.successors(current);
                    let weights: Vec<f64> = successors.iter().map(|&(_, w)| w as f64).collect();
                    rng.weighted_index(&weights)
                        .map(|i| successors[i].0.clone())
                }
            }
        };
    }

    /// Count one bar. Returns `true` when the section changed (including the
    /// form ending).
    pub fn advance_bar(&mut self) -> bool {
        let Some((_, bars)) = &self.current else {
            return false;
        };
        let bars = *bars;
        self.bar_in_section += 1;
        self.total_bars += 1;
        if self.bar_in_section < bars {
            return false;
        }

        let next = match (&mut self.progression, self.next_section.take()) {
            (Progression::Sequence { sections, position, .. }, Some(_)) => {
                *position = (*position + 1) % sections.len().max(1);
                sections.get(*position).cloned()
            }
            (Progression::Graph { bars, .. }, Some(name)) => {
                bars.get(&name).map(|&b| (name, b))
            }
            (_, None) => None,
        };
        self.current = next;
        self.bar_in_section = 0;
        if self.current.is_some() {
            self.section_index += 1;
        }
        self.pick_next();
        true
    }

    pub fn current(&self) -> Option<SectionInfo> {
        let (name, bars) = self.current.as_ref()?;
        Some(SectionInfo {
            name: name.clone(),
            bar: self.bar_in_section,
            bars: *bars,
            index: self.section_index,
            next_section: self.next_section.clone(),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.current.is_none()
    }

    pub fn total_bars(&self) -> u64 {
        self.total_bars
    }

    fn graph_bars(&self, name: &str) -> Result<u32, ConfigError> {
        match &self.progression {
            Progression::Graph { bars, .. } => bars.get(name).copied().ok_or_else(|| {
                ConfigError::InvalidForm(format!("section {name:?} is not defined"))
            }),
            Progression::Sequence { .. } => Err(ConfigError::InvalidForm(
                "only graph forms can be steered".into(),
            )),
        }
    }

    /// Whether `name` is a section this form can be steered to.
    pub fn check_section(&self, name: &str) -> Result<(), ConfigError> {
        self.graph_bars(name).map(|_| ())
    }

    /// Override the pre-decided next section. Takes effect at the end of the
    /// current section. Graph forms only.
    pub fn queue_next(&mut self, name: &str) -> Result<(), ConfigError> {
        self.graph_bars(name)?;
        self.next_section = Some(name.to_string());
        Ok(())
    }

    /// Move to `name` immediately, restarting it from bar 0. Graph forms only.
    pub fn jump_to(&mut self, name: &str) -> Result<(), ConfigError> {
        let bars = self.graph_bars(name)?;
        self.current = Some((name.to_string(), bars));
        self.bar_in_section = 0;
        self.section_index += 1;
        self.pick_next();
        Ok(())
    }
}
