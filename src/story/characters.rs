//! Cast and relationships.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacterRole {
    Protagonist,
    Antagonist,
    Mentor,
    Supporting,
    LoveInterest,
    ComicRelief,
    Confidant,
    Foil,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterProfile {
    pub character_id: String,
    pub name: String,
    pub role: CharacterRole,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub personality_traits: Vec<String>,
    #[serde(default)]
    pub motivation: String,
    #[serde(default)]
    pub internal_conflict: String,
    /// How this character speaks: dialect, vocabulary, cadence.
    #[serde(default)]
    pub voice_notes: String,
    #[serde(default)]
    pub speech_patterns: Vec<String>,
}

impl CharacterProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: CharacterRole) -> Self {
        Self {
            character_id: id.into(),
            name: name.into(),
            role,
            description: String::new(),
            personality_traits: Vec::new(),
            motivation: String::new(),
            internal_conflict: String::new(),
            voice_notes: String::new(),
            speech_patterns: Vec::new(),
        }
    }
}

/// Directed relationship between two characters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterRelationship {
    pub from_character_id: String,
    pub to_character_id: String,
    pub relationship_type: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterRoster {
    #[serde(default)]
    pub characters: Vec<CharacterProfile>,
    #[serde(default)]
    pub relationships: Vec<CharacterRelationship>,
}

impl CharacterRoster {
    pub fn get(&self, character_id: &str) -> Option<&CharacterProfile> {
        self.characters
            .iter()
            .find(|c| c.character_id == character_id)
    }

    pub fn by_role(&self, role: CharacterRole) -> Vec<&CharacterProfile> {
        self.characters.iter().filter(|c| c.role == role).collect()
    }

    /// Profiles for the given ids, skipping unknown ids.
    pub fn select<'a>(&'a self, ids: &[String]) -> Vec<&'a CharacterProfile> {
        ids.iter().filter_map(|id| self.get(id)).collect()
    }
}
