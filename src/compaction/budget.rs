//! Rolling-summary size budget parsing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::DEFAULT_CONTEXT_BUDGET_CHARS;

/// Maximum size of the rolling summary, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextBudget(usize);

impl ContextBudget {
    /// Create a budget. Zero is rejected because no summary would fit.
    pub fn new(chars: usize) -> Result<Self> {
        if chars == 0 {
            anyhow::bail!("Context budget cannot be zero");
        }
        Ok(Self(chars))
    }

    pub fn chars(&self) -> usize {
        self.0
    }
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self(DEFAULT_CONTEXT_BUDGET_CHARS)
    }
}

impl std::fmt::Display for ContextBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} chars", self.0)
    }
}

impl std::str::FromStr for ContextBudget {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_context_budget(s)
    }
}

/// Parse a context budget string.
///
/// Accepts:
/// - Plain counts: "2000"
/// - Thousands suffix: "2k", "1.5k"
/// - Explicit unit: "2000 chars"
pub fn parse_context_budget(s: &str) -> Result<ContextBudget> {
    let s = s.trim();

    if s.is_empty() {
        anyhow::bail!("Context budget cannot be empty");
    }

    let s = s.strip_suffix("chars").map(str::trim_end).unwrap_or(s);

    let chars = if let Some(num_str) = s.strip_suffix(['k', 'K']) {
        let thousands: f64 = num_str
            .trim()
            .parse()
            .with_context(|| format!("Invalid context budget: {}", s))?;
        if !thousands.is_finite() || thousands <= 0.0 {
            anyhow::bail!("Context budget must be positive, got {}", s);
        }
        (thousands * 1000.0).round() as usize
    } else {
        s.parse::<usize>()
            .with_context(|| format!("Invalid context budget: {}", s))?
    };

    ContextBudget::new(chars)
}
