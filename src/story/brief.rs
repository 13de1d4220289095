//! The creative brief that drives every downstream stage.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Genre {
    Fantasy,
    SciFi,
    #[default]
    LiteraryFiction,
    Mystery,
    Thriller,
    Romance,
    Horror,
    HistoricalFiction,
}

/// Numeric tone axes, each in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToneProfile {
    /// 0 = casual, 1 = formal
    #[serde(default = "half")]
    pub formality: f32,
    /// 0 = lighthearted, 1 = dark
    #[serde(default = "half")]
    pub darkness: f32,
    /// 0 = serious, 1 = comic
    #[serde(default = "default_humor")]
    pub humor: f32,
    /// 0 = slow and contemplative, 1 = fast
    #[serde(default = "half")]
    pub pacing: f32,
    #[serde(default)]
    pub prose_style: String,
    #[serde(default)]
    pub reference_authors: Vec<String>,
}

fn half() -> f32 {
    0.5
}

fn default_humor() -> f32 {
    0.3
}

impl Default for ToneProfile {
    fn default() -> Self {
        Self {
            formality: half(),
            darkness: half(),
            humor: default_humor(),
            pacing: half(),
            prose_style: String::new(),
            reference_authors: Vec::new(),
        }
    }
}

/// Length and shape targets for the story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeParameters {
    #[serde(default = "default_target_word_count")]
    pub target_word_count: u32,
    #[serde(default = "default_num_acts")]
    pub num_acts: u32,
    #[serde(default = "default_units_per_act")]
    pub units_per_act: u32,
    #[serde(default = "default_target_unit_word_count")]
    pub target_unit_word_count: u32,
}

fn default_target_word_count() -> u32 {
    3000
}

fn default_num_acts() -> u32 {
    1
}

fn default_units_per_act() -> u32 {
    3
}

fn default_target_unit_word_count() -> u32 {
    1000
}

impl Default for ScopeParameters {
    fn default() -> Self {
        Self {
            target_word_count: default_target_word_count(),
            num_acts: default_num_acts(),
            units_per_act: default_units_per_act(),
            target_unit_word_count: default_target_unit_word_count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryBrief {
    pub title: String,
    pub premise: String,
    #[serde(default)]
    pub genre: Genre,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub setting_summary: String,
    #[serde(default)]
    pub tone: ToneProfile,
    #[serde(default)]
    pub scope: ScopeParameters,
    #[serde(default = "default_audience")]
    pub target_audience: String,
}

fn default_audience() -> String {
    "general adult".to_string()
}

impl StoryBrief {
    pub fn new(title: impl Into<String>, premise: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            premise: premise.into(),
            genre: Genre::default(),
            themes: Vec::new(),
            setting_summary: String::new(),
            tone: ToneProfile::default(),
            scope: ScopeParameters::default(),
            target_audience: default_audience(),
        }
    }

    /// Returns a description of the first schema problem, if any.
    ///
    /// A brief without a title or premise cannot drive outlining.
    pub fn schema_problem(&self) -> Option<String> {
        if self.title.trim().is_empty() {
            return Some("brief has an empty title".to_string());
        }
        if self.premise.trim().is_empty() {
            return Some("brief has an empty premise".to_string());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brief_defaults_from_minimal_json() {
        let brief: StoryBrief =
            serde_json::from_str(r#"{"title": "The Lighthouse", "premise": "A keeper stays."}"#)
                .unwrap();
        assert_eq!(brief.genre, Genre::LiteraryFiction);
        assert_eq!(brief.scope.units_per_act, 3);
        assert_eq!(brief.target_audience, "general adult");
        assert!((brief.tone.humor - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn test_schema_problem() {
        assert!(StoryBrief::new("T", "P").schema_problem().is_none());
        assert!(StoryBrief::new(" ", "P").schema_problem().is_some());
        assert!(StoryBrief::new("T", "").schema_problem().is_some());
    }

    #[test]
    fn test_genre_snake_case() {
        let g: Genre = serde_json::from_str("\"sci_fi\"").unwrap();
        assert_eq!(g, Genre::SciFi);
    }
}
