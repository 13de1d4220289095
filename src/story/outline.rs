//! Structural outline: acts containing ordered units.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed position of a unit in the outline. Both components are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId {
    pub act: u32,
    pub position: u32,
}

impl UnitId {
    pub fn new(act: u32, position: u32) -> Self {
        Self { act, position }
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.act, self.position)
    }
}

/// One planned narrative unit (a scene).
///
/// Detailed enough that the generator makes no plot decisions of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitOutline {
    #[serde(default = "placeholder_id")]
    pub id: UnitId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub setting: String,
    #[serde(default)]
    pub characters_present: Vec<String>,
    #[serde(default)]
    pub pov_character: String,
    #[serde(default)]
    pub goal: String,
    /// e.g. "tension builds from curiosity to dread"
    #[serde(default)]
    pub emotional_arc: String,
    #[serde(default)]
    pub opening_hook: String,
    #[serde(default)]
    pub closing_image: String,
    #[serde(default)]
    pub key_dialogue_beats: Vec<String>,
    #[serde(default = "default_target_word_count")]
    pub target_word_count: u32,
    /// Rolling summary of the story so far, filled in right before drafting.
    #[serde(default)]
    pub prior_summary: String,
}

fn placeholder_id() -> UnitId {
    UnitId::new(1, 1)
}

fn default_target_word_count() -> u32 {
    1000
}

impl UnitOutline {
    pub fn new(title: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            id: placeholder_id(),
            title: title.into(),
            setting: String::new(),
            characters_present: Vec::new(),
            pov_character: String::new(),
            goal: goal.into(),
            emotional_arc: String::new(),
            opening_hook: String::new(),
            closing_image: String::new(),
            key_dialogue_beats: Vec::new(),
            target_word_count: default_target_word_count(),
            prior_summary: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActOutline {
    #[serde(default)]
    pub act_number: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub units: Vec<UnitOutline>,
}

impl ActOutline {
    pub fn new(title: impl Into<String>, units: Vec<UnitOutline>) -> Self {
        Self {
            act_number: 0,
            title: title.into(),
            summary: String::new(),
            units,
        }
    }
}

/// The complete outline. Its shape is fixed once outlining completes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    #[serde(default)]
    pub acts: Vec<ActOutline>,
}

impl Outline {
    pub fn new(acts: Vec<ActOutline>) -> Self {
        let mut outline = Self { acts };
        outline.assign_ids();
        outline
    }

    /// Renumber acts and units by their position.
    ///
    /// Numbering supplied by the outliner is not trusted; unit order is the
    /// order of the vectors.
    pub fn assign_ids(&mut self) {
        for (a, act) in self.acts.iter_mut().enumerate() {
            let act_number = a as u32 + 1;
            act.act_number = act_number;
            for (p, unit) in act.units.iter_mut().enumerate() {
                unit.id = UnitId::new(act_number, p as u32 + 1);
            }
        }
    }

    pub fn total_units(&self) -> usize {
        self.acts.iter().map(|a| a.units.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_units() == 0
    }

    /// Units in outline order.
    pub fn units(&self) -> impl Iterator<Item = &UnitOutline> {
        self.acts.iter().flat_map(|a| a.units.iter())
    }

    /// The unit at a flat index (outline order).
    pub fn unit(&self, index: usize) -> Option<&UnitOutline> {
        self.units().nth(index)
    }

    /// Fill the rolling-context field of one unit. The only permitted
    /// mutation after outlining.
    pub fn set_prior_summary(&mut self, index: usize, summary: &str) -> bool {
        match self.acts.iter_mut().flat_map(|a| a.units.iter_mut()).nth(index) {
            Some(unit) => {
                unit.prior_summary = summary.to_string();
                true
            }
            None => false,
        }
    }
}
