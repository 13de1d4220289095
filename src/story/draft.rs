//! Generated prose for one unit.

use serde::{Deserialize, Serialize};

use super::outline::{Outline, UnitId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub unit: UnitId,
    pub text: String,
    pub word_count: usize,
    /// Revision attempt that produced this text (0 = first draft).
    pub revision: u32,
}

impl Draft {
    pub fn new(unit: UnitId, text: impl Into<String>, revision: u32) -> Self {
        let text = text.into();
        let word_count = text.split_whitespace().count();
        Self {
            unit,
            text,
            word_count,
            revision,
        }
    }
}

/// Render accepted drafts as markdown, grouped under their act headings.
pub fn render_manuscript(title: &str, outline: Option<&Outline>, drafts: &[Draft]) -> String {
    let mut out = format!("# {}\n", title);
    let mut current_act = 0;
    for draft in drafts {
        if draft.unit.act != current_act {
            current_act = draft.unit.act;
            let act_title = outline
                .and_then(|o| o.acts.get(current_act as usize - 1))
                .map(|a| a.title.as_str())
                .filter(|t| !t.is_empty());
            match act_title {
                Some(t) => out.push_str(&format!("\n## Act {}: {}\n", current_act, t)),
                None => out.push_str(&format!("\n## Act {}\n", current_act)),
            }
        }
        out.push('\n');
        out.push_str(draft.text.trim());
        out.push('\n');
    }
    out
}
