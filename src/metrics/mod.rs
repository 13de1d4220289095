//! Advisory text metrics.
//!
//! Cheap, deterministic signals handed to the reviewer as context. Nothing in
//! the pipeline gates on them: a scene that breaks a heuristic on purpose is
//! the reviewer's call.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::collaborators::MetricsProvider;
use crate::errors::CollaboratorError;
use crate::story::UnitOutline;

/// Allowed deviation from the target word count, as a fraction.
pub const WORD_COUNT_TOLERANCE: f64 = 0.25;
/// Sentence-length coefficient of variation below which prose reads monotonous.
pub const LENGTH_MONOTONY_CV: f64 = 0.30;
/// Share of sentences starting with the same word above which openers are flagged.
pub const OPENER_MONOTONY_RATIO: f64 = 0.30;
pub const MATTR_WINDOW: usize = 50;
pub const LOW_DIVERSITY_MATTR: f64 = 0.50;

// Sentence terminator followed by optional closing quotes/brackets.
static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[.!?…]+["'”’)\]]*(\s+|$)"#).unwrap());

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\p{L}\p{N}][\p{L}\p{N}'’-]*").unwrap());

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryMetrics {
    pub word_count: usize,
    pub target_word_count: u32,
    /// Signed fraction, e.g. 0.15 = 15% over target.
    pub word_count_deviation: f64,
    pub word_count_in_range: bool,

    pub sentence_count: usize,
    pub sentence_length_mean: f64,
    pub sentence_length_std: f64,
    pub sentence_length_cv: f64,
    pub length_monotony: bool,

    pub top_opener: Option<String>,
    pub top_opener_ratio: f64,
    pub opener_monotony: bool,

    /// Moving-average type-token ratio.
    pub mattr: f64,
    pub low_diversity: bool,
}

impl AdvisoryMetrics {
    /// Human-readable lines for flagged issues only.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if !self.word_count_in_range {
            lines.push(format!(
                "Word count {} vs target {} ({:+.0}%)",
                self.word_count,
                self.target_word_count,
                self.word_count_deviation * 100.0
            ));
        }
        if self.opener_monotony
            && let Some(opener) = &self.top_opener
        {
            lines.push(format!(
                "Sentence opener monotony: {:.0}% of sentences start with \"{}\"",
                self.top_opener_ratio * 100.0,
                opener
            ));
        }
        if self.length_monotony {
            lines.push(format!(
                "Sentence length CV {:.2}: low variety",
                self.sentence_length_cv
            ));
        }
        if self.low_diversity {
            lines.push(format!("Lexical diversity MATTR {:.2}: low variety", self.mattr));
        }
        lines
    }

    pub fn has_flags(&self) -> bool {
        !self.summary_lines().is_empty()
    }
}

/// Default metrics provider. Pure computation, never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextMetrics;

impl TextMetrics {
    pub fn analyze(text: &str, target_word_count: u32) -> AdvisoryMetrics {
        let words: Vec<String> = WORD
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .collect();
        let word_count = text.split_whitespace().count();

        let (word_count_deviation, word_count_in_range) = if target_word_count == 0 {
            (0.0, true)
        } else {
            let target = f64::from(target_word_count);
            let deviation = (word_count as f64 - target) / target;
            (deviation, deviation.abs() <= WORD_COUNT_TOLERANCE)
        };

        let sentences = split_sentences(text);
        let lengths: Vec<f64> = sentences
            .iter()
            .map(|s| WORD.find_iter(s).count() as f64)
            .collect();
        let mean = mean(&lengths);
        let std = std_dev(&lengths, mean);
        let cv = if mean > 0.0 { std / mean } else { 0.0 };
        // A single sentence has no variety to measure.
        let length_monotony = lengths.len() >= 3 && cv < LENGTH_MONOTONY_CV;

        let (top_opener, top_opener_ratio) = top_opener(&sentences);
        let opener_monotony = sentences.len() >= 3 && top_opener_ratio > OPENER_MONOTONY_RATIO;

        let mattr = mattr(&words, MATTR_WINDOW);
        let low_diversity = words.len() >= MATTR_WINDOW && mattr < LOW_DIVERSITY_MATTR;

        AdvisoryMetrics {
            word_count,
            target_word_count,
            word_count_deviation,
            word_count_in_range,
            sentence_count: sentences.len(),
            sentence_length_mean: mean,
            sentence_length_std: std,
            sentence_length_cv: cv,
            length_monotony,
            top_opener,
            top_opener_ratio,
            opener_monotony,
            mattr,
            low_diversity,
        }
    }
}

#[async_trait]
impl MetricsProvider for TextMetrics {
    async fn metrics(
        &self,
        text: &str,
        unit: &UnitOutline,
    ) -> Result<AdvisoryMetrics, CollaboratorError> {
        Ok(Self::analyze(text, unit.target_word_count))
    }
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(text) {
        let sentence = text[start..m.end()].trim();
        if WORD.is_match(sentence) {
            sentences.push(sentence);
        }
        start = m.end();
    }
    let rest = text[start..].trim();
    if WORD.is_match(rest) {
        sentences.push(rest);
    }
    sentences
}

fn top_opener(sentences: &[&str]) -> (Option<String>, f64) {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for sentence in sentences {
        if let Some(first) = WORD.find(sentence) {
            *counts.entry(first.as_str().to_lowercase()).or_default() += 1;
        }
    }
    // Ties break alphabetically so results are stable across runs.
    let top = counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)));
    match top {
        Some((word, count)) if !sentences.is_empty() => {
            (Some(word), count as f64 / sentences.len() as f64)
        }
        _ => (None, 0.0),
    }
}

fn mattr(words: &[String], window: usize) -> f64 {
    if words.is_empty() {
        return 0.0;
    }
    let window = window.min(words.len());
    let windows = words.len() - window + 1;
    let total: f64 = words
        .windows(window)
        .map(|w| w.iter().collect::<HashSet<_>>().len() as f64 / window as f64)
        .sum();
    total / windows as f64
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}
