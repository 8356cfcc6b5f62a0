//! Token-budgeted context assembly.
//!
//! Turns ranked sections into the context block placed in the prompt:
//!
//! ```text
//! DOCUMENT CONTEXT: 2 relevant section(s) selected
//!
//! === Chapter 3: Leave requests ===
//! Employees must submit leave requests two weeks in advance.
//!
//! ----------------------------------------
//!
//! === Chapter 4: Equipment ===
//! Laptops are issued on the first day.
//! ```
//!
//! Oversized contexts are compressed in increasing steps
//! ([`CompressionLevel`]) and then trimmed by dropping whole sections from the
//! least relevant end. Sections are never cut mid-body. Under-filled contexts
//! are padded with extra sections by importance or adjacency.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{Document, Section};
use crate::segment::{normalize, split_sentences, OBLIGATION_MARKERS};
use crate::tokens::estimate_tokens;

const DIVIDER: &str = "----------------------------------------";

static PARENTHETICAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\([^()\n]*\)").expect("parenthetical regex is valid"));

static EXAMPLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i),?\s*\b(?:e\.g\.|i\.e\.|for example|for instance|such as|por ejemplo|como por ejemplo)[^.;\n]*")
        .expect("example regex is valid")
});

static OBLIGATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b(?:{})\b", OBLIGATION_MARKERS.join("|")))
        .expect("obligation regex is valid")
});

static SPACES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]{2,}").expect("spaces regex is valid"));

/// How hard a context was squeezed to fit its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionLevel {
    #[default]
    None,
    /// Whitespace and blank lines collapsed.
    Light,
    /// Light, plus parenthetical and example asides removed.
    Medium,
    /// Medium, plus only obligation sentences and short sentences kept.
    Aggressive,
}

impl CompressionLevel {
    pub const ALL: [CompressionLevel; 4] = [
        CompressionLevel::None,
        CompressionLevel::Light,
        CompressionLevel::Medium,
        CompressionLevel::Aggressive,
    ];

    /// Apply this level to a section body.
    pub fn apply(self, body: &str, short_sentence_chars: usize) -> String {
        match self {
            CompressionLevel::None => body.to_string(),
            CompressionLevel::Light => light(body),
            CompressionLevel::Medium => medium(body),
            CompressionLevel::Aggressive => aggressive(body, short_sentence_chars),
        }
    }
}

impl std::fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompressionLevel::None => "none",
            CompressionLevel::Light => "light",
            CompressionLevel::Medium => "medium",
            CompressionLevel::Aggressive => "aggressive",
        };
        f.write_str(s)
    }
}

/// Which extra sections pad an under-filled context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionMode {
    /// Highest query-independent importance first.
    Importance,
    /// Neighbours (previous, then next) of already selected sections.
    #[default]
    Adjacent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssemblerConfig {
    /// Contexts using less than this fraction of the budget are expanded.
    pub min_utilization: f64,
    /// Expansion stops once this fraction of the budget is used.
    pub target_utilization: f64,
    pub expansion: ExpansionMode,
    /// Sentences shorter than this survive aggressive compression.
    pub short_sentence_chars: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            min_utilization: 0.3,
            target_utilization: 0.8,
            expansion: ExpansionMode::Adjacent,
            short_sentence_chars: 200,
        }
    }
}

/// The context block and an account of how it was built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssembledContext {
    pub text: String,
    /// Sections included, in the order they appear in `text`.
    pub section_ids: Vec<String>,
    pub token_estimate: usize,
    pub compression: CompressionLevel,
    /// Selected sections left out to meet the budget.
    pub dropped_ids: Vec<String>,
    /// Sections added by expansion.
    pub expanded_ids: Vec<String>,
    /// Set when even a single, fully compressed section exceeds the budget.
    pub over_budget: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ContextAssembler {
    config: AssemblerConfig,
}

impl ContextAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// Build a context from `selected` (most relevant first) within
    /// `budget_tokens`. `all_sections` is the full document, used for
    /// expansion.
    pub fn assemble<'a>(
        &self,
        all_sections: &'a [Section],
        selected: &[&'a Section],
        budget_tokens: usize,
    ) -> AssembledContext {
        let mut seen = HashSet::new();
        let mut chosen: Vec<&'a Section> = selected
            .iter()
            .copied()
            .filter(|s| seen.insert(s.id.as_str()))
            .collect();
        let mut dropped_ids = Vec::new();

        let mut fitted = self.least_compression(&chosen, budget_tokens);

        if fitted.is_none() {
            while chosen.len() > 1 && fitted.is_none() {
                if let Some(dropped) = chosen.pop() {
                    dropped_ids.push(dropped.id.clone());
                }
                fitted = self.least_compression(&chosen, budget_tokens);
            }
            debug!(dropped = dropped_ids.len(), budget = budget_tokens, "dropped sections to fit budget");
        }

        let (level, over_budget) = match fitted {
            Some(level) => (level, false),
            None => (CompressionLevel::Aggressive, true),
        };

        let mut expanded_ids = Vec::new();
        if level == CompressionLevel::None && dropped_ids.is_empty() && !chosen.is_empty() {
            let used = estimate_tokens(&self.render(&chosen, level));
            if (used as f64) < budget_tokens as f64 * self.config.min_utilization {
                expanded_ids = self.expand(all_sections, &mut chosen, budget_tokens);
            }
        }

        chosen.sort_by_key(|s| s.ordinal);
        let text = self.render(&chosen, level);
        AssembledContext {
            token_estimate: estimate_tokens(&text),
            text,
            section_ids: chosen.iter().map(|s| s.id.clone()).collect(),
            compression: level,
            dropped_ids,
            expanded_ids,
            over_budget,
        }
    }

    /// Context for a small document: its whole content under one heading.
    /// Compressed when oversized, never truncated.
    pub fn assemble_whole(&self, document: &Document, budget_tokens: usize) -> AssembledContext {
        let render = |level: CompressionLevel| {
            format!(
                "DOCUMENT CONTEXT: full document\n\n=== {} ===\n{}",
                document.name,
                level.apply(&document.content, self.config.short_sentence_chars)
            )
        };

        let mut chosen = (render(CompressionLevel::Aggressive), CompressionLevel::Aggressive, true);
        for level in CompressionLevel::ALL {
            let text = render(level);
            if estimate_tokens(&text) <= budget_tokens {
                chosen = (text, level, false);
                break;
            }
        }

        let (text, compression, over_budget) = chosen;
        AssembledContext {
            token_estimate: estimate_tokens(&text),
            text,
            section_ids: Vec::new(),
            compression,
            dropped_ids: Vec::new(),
            expanded_ids: Vec::new(),
            over_budget,
        }
    }

    /// Render sections in the given order at one compression level.
    pub fn render(&self, sections: &[&Section], level: CompressionLevel) -> String {
        let mut out = format!(
            "DOCUMENT CONTEXT: {} relevant section(s) selected\n",
            sections.len()
        );
        for (i, section) in sections.iter().enumerate() {
            if i > 0 {
                out.push('\n');
                out.push_str(DIVIDER);
                out.push('\n');
            }
            out.push_str(&format!(
                "\n=== {} ===\n{}\n",
                section.title,
                level.apply(section.body.trim(), self.config.short_sentence_chars)
            ));
        }
        out
    }

    fn least_compression(&self, sections: &[&Section], budget_tokens: usize) -> Option<CompressionLevel> {
        let mut ordered = sections.to_vec();
        ordered.sort_by_key(|s| s.ordinal);
        CompressionLevel::ALL
            .into_iter()
            .find(|&level| estimate_tokens(&self.render(&ordered, level)) <= budget_tokens)
    }

    fn expand<'a>(
        &self,
        all_sections: &'a [Section],
        chosen: &mut Vec<&'a Section>,
        budget_tokens: usize,
    ) -> Vec<String> {
        let target = (budget_tokens as f64 * self.config.target_utilization) as usize;
        let mut added = Vec::new();

        loop {
            let in_set: HashSet<&str> = chosen.iter().map(|s| s.id.as_str()).collect();
            let candidates = match self.config.expansion {
                ExpansionMode::Importance => importance_order(all_sections, &in_set),
                ExpansionMode::Adjacent => adjacent_order(all_sections, chosen, &in_set),
            };

            let mut grew = false;
            for candidate in candidates {
                let mut trial = chosen.clone();
                trial.push(candidate);
                trial.sort_by_key(|s| s.ordinal);
                if estimate_tokens(&self.render(&trial, CompressionLevel::None)) <= target {
                    chosen.push(candidate);
                    added.push(candidate.id.clone());
                    grew = true;
                    break;
                }
            }

            if !grew {
                break;
            }
            let used = estimate_tokens(&self.render(chosen, CompressionLevel::None));
            if used as f64 >= target as f64 {
                break;
            }
        }

        if !added.is_empty() {
            debug!(added = added.len(), mode = ?self.config.expansion, "expanded under-filled context");
        }
        added
    }
}

fn importance_order<'a>(all: &'a [Section], in_set: &HashSet<&str>) -> Vec<&'a Section> {
    let mut rest: Vec<&Section> = all.iter().filter(|s| !in_set.contains(s.id.as_str())).collect();
    rest.sort_by(|a, b| b.importance.total_cmp(&a.importance).then(a.ordinal.cmp(&b.ordinal)));
    rest
}

/// Neighbours of `chosen` in selection order, previous before next.
fn adjacent_order<'a>(all: &'a [Section], chosen: &[&Section], in_set: &HashSet<&str>) -> Vec<&'a Section> {
    let mut out: Vec<&Section> = Vec::new();
    for section in chosen {
        let neighbours = [
            section.ordinal.checked_sub(1),
            section.ordinal.checked_add(1),
        ];
        for ordinal in neighbours.into_iter().flatten() {
            if let Some(n) = all.iter().find(|s| s.ordinal == ordinal) {
                if !in_set.contains(n.id.as_str()) && !out.iter().any(|o| o.id == n.id) {
                    out.push(n);
                }
            }
        }
    }
    out
}

fn light(body: &str) -> String {
    normalize(body).replace("\n\n", "\n")
}

fn medium(body: &str) -> String {
    let text = light(body);
    let text = PARENTHETICAL_RE.replace_all(&text, "");
    let text = EXAMPLE_RE.replace_all(&text, "");
    SPACES_RE.replace_all(&text, " ").into_owned()
}

fn aggressive(body: &str, short_sentence_chars: usize) -> String {
    let text = medium(body);
    let kept: Vec<&str> = split_sentences(&text)
        .into_iter()
        .filter(|s| OBLIGATION_RE.is_match(s) || s.chars().count() < short_sentence_chars)
        .collect();
    kept.join(" ")
}
