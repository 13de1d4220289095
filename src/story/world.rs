//! Setting and world rules.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub location_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub significance: String,
}

/// A constraint the story world must honor (magic system, technology, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldRule {
    pub rule_id: String,
    #[serde(default = "default_category")]
    pub category: String,
    pub statement: String,
    #[serde(default)]
    pub implications: Vec<String>,
}

fn default_category() -> String {
    "general".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldContext {
    #[serde(default)]
    pub setting_period: String,
    #[serde(default)]
    pub setting_description: String,
    #[serde(default)]
    pub locations: Vec<Location>,
    #[serde(default)]
    pub rules: Vec<WorldRule>,
    #[serde(default)]
    pub key_facts: Vec<String>,
}

impl WorldContext {
    pub fn location(&self, location_id: &str) -> Option<&Location> {
        self.locations.iter().find(|l| l.location_id == location_id)
    }
}
