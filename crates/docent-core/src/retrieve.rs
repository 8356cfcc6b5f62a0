//! Lexical relevance ranking.
//!
//! Scores the sections of a large document against a question without any
//! embedding model. Each section receives a keyword score built from four
//! signals and, independently, a concept score from a small domain lexicon.
//!
//! | Signal | Contribution |
//! |--------|--------------|
//! | Exact keyword match | 3 per occurrence |
//! | Partial match (keyword ≥ 4 chars inside a longer word) | 1 per occurrence |
//! | Density | `weighted matches / words × 100`, once |
//! | Proximity | `max(0, 10 − distance)` per keyword pair within a 10-word window |
//! | Concept expansion | `weight × 0.5` per related term present |
//!
//! In [`RankingMode::Keyword`] the two scores are summed. In
//! [`RankingMode::Hybrid`] each signal is ranked separately, converted to a
//! position-decayed weight `(N − rank) / N`, and blended
//! `0.7 × keyword + 0.3 × concept`.
//!
//! A ranking is never empty for a non-empty input: when nothing matches, or
//! the best score is under [`RetrieverConfig::min_relevance`], the first
//! sections in document order are returned instead.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::Section;

const EXACT_WEIGHT: f64 = 3.0;
const PARTIAL_WEIGHT: f64 = 1.0;
const PARTIAL_MIN_LEN: usize = 4;
const DENSITY_FACTOR: f64 = 100.0;
const PROXIMITY_WINDOW: usize = 10;
const CONCEPT_FACTOR: f64 = 0.5;
const HYBRID_KEYWORD_WEIGHT: f64 = 0.7;
const HYBRID_CONCEPT_WEIGHT: f64 = 0.3;

const STOP_WORDS: &[&str] = &[
    // English
    "a", "about", "above", "after", "again", "all", "also", "am", "an", "and", "any", "are", "as",
    "at", "be", "because", "been", "before", "being", "between", "both", "but", "by", "can",
    "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for", "from",
    "further", "had", "has", "have", "having", "he", "her", "here", "hers", "him", "his", "how",
    "i", "if", "in", "into", "is", "it", "its", "just", "me", "more", "most", "my", "no", "nor",
    "not", "now", "of", "off", "on", "once", "only", "or", "other", "our", "out", "over", "own",
    "please", "said", "same", "say", "says", "she", "should", "so", "some", "such", "tell",
    "than", "that", "the", "their", "them", "then", "there", "these", "they", "this", "those",
    "through", "to", "too", "under", "until", "up", "very", "was", "we", "were", "what", "when",
    "where", "which", "while", "who", "whom", "why", "will", "with", "would", "you", "your",
    // Spanish
    "al", "algo", "como", "con", "cual", "cuando", "de", "del", "desde", "donde", "dice", "el",
    "ella", "en", "entre", "es", "esa", "ese", "eso", "esta", "este", "esto", "fue", "ha", "hay",
    "la", "las", "le", "les", "lo", "los", "mas", "más", "me", "mi", "muy", "nos", "o", "para",
    "pero", "por", "que", "qué", "se", "ser", "si", "sin", "sobre", "son", "su", "sus", "también",
    "te", "tiene", "tu", "un", "una", "uno", "y", "ya", "yo",
];

/// Trigger stems mapped to weighted related stems. A trigger fires when a
/// query keyword starts with it; a related stem matches any section word
/// that starts with it.
const CONCEPTS: &[(&[&str], &[(&str, f64)])] = &[
    (
        &["disciplin", "sancion", "sanction"],
        &[("sanction", 3.0), ("sancion", 3.0), ("violation", 2.5), ("infrac", 2.5), ("misconduct", 2.5), ("falta", 2.0), ("warning", 1.5), ("amonest", 1.5), ("suspen", 2.0), ("penalt", 2.0)],
    ),
    (
        &["leave", "vacation", "holiday", "permiso", "licencia", "vacacion"],
        &[("leave", 3.0), ("absence", 2.5), ("ausencia", 2.5), ("vacation", 2.5), ("vacacion", 2.5), ("holiday", 2.0), ("permiso", 2.5), ("licencia", 2.5), ("request", 1.0), ("solicitud", 1.0)],
    ),
    (
        &["salary", "pay", "wage", "salario", "sueldo", "compensation"],
        &[("salary", 3.0), ("salario", 3.0), ("wage", 2.5), ("sueldo", 2.5), ("payroll", 2.5), ("nómina", 2.5), ("nomina", 2.5), ("bonus", 2.0), ("overtime", 2.0), ("compensation", 2.0)],
    ),
    (
        &["contract", "contrato", "agreement"],
        &[("contract", 3.0), ("contrato", 3.0), ("agreement", 2.5), ("clause", 2.0), ("cláusula", 2.0), ("clausula", 2.0), ("term", 1.0), ("signature", 1.5), ("firma", 1.5)],
    ),
    (
        &["terminat", "dismiss", "fired", "despido", "resign", "renuncia"],
        &[("terminat", 3.0), ("dismiss", 3.0), ("despido", 3.0), ("resign", 2.5), ("renuncia", 2.5), ("notice", 2.0), ("preaviso", 2.0), ("severance", 2.5), ("indemniz", 2.5)],
    ),
    (
        &["safety", "security", "seguridad", "accident", "accidente", "hazard"],
        &[("safety", 3.0), ("seguridad", 3.0), ("hazard", 2.5), ("riesgo", 2.5), ("risk", 2.0), ("accident", 2.5), ("accidente", 2.5), ("protective", 2.0), ("emergenc", 2.0), ("injur", 2.0)],
    ),
    (
        &["schedule", "hours", "horario", "shift", "jornada", "turno"],
        &[("schedule", 3.0), ("horario", 3.0), ("hours", 2.5), ("jornada", 2.5), ("shift", 2.5), ("turno", 2.5), ("overtime", 2.0), ("break", 1.5), ("descanso", 1.5)],
    ),
    (
        &["harass", "acoso", "discriminat", "bullying"],
        &[("harass", 3.0), ("acoso", 3.0), ("discriminat", 2.5), ("bullying", 2.5), ("hostil", 2.0), ("retaliat", 2.0), ("represalia", 2.0), ("dignity", 1.5), ("dignidad", 1.5)],
    ),
    (
        &["privacy", "privacidad", "confidential", "confidencial", "data"],
        &[("privacy", 3.0), ("privacidad", 3.0), ("confidential", 2.5), ("confidencial", 2.5), ("personal", 1.5), ("data", 1.5), ("datos", 1.5), ("disclos", 2.0)],
    ),
    (
        &["complain", "queja", "grievance", "reclamo", "denuncia"],
        &[("complain", 3.0), ("queja", 3.0), ("grievance", 3.0), ("reclamo", 2.5), ("denuncia", 2.5), ("report", 1.5), ("investigat", 2.0), ("appeal", 2.0), ("apelaci", 2.0)],
    ),
];

/// How keyword and concept signals are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingMode {
    /// Keyword score plus concept score.
    Keyword,
    /// Position-decayed blend of the separate keyword and concept rankings.
    #[default]
    Hybrid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrieverConfig {
    pub mode: RankingMode,
    /// Best raw score below which the ranking falls back to document order.
    pub min_relevance: f64,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            mode: RankingMode::Hybrid,
            min_relevance: 2.0,
        }
    }
}

/// A section annotated with its score for one query. Never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredSection<'a> {
    pub section: &'a Section,
    /// Ordering score. Meaning depends on the [`RankingMode`].
    pub score: f64,
    pub keyword_score: f64,
    pub concept_score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RelevanceRetriever {
    config: RetrieverConfig,
}

impl RelevanceRetriever {
    pub fn new(config: RetrieverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Rank `sections` for `query`, best first, at most `max_sections`.
    ///
    /// Returns at least one section whenever `sections` is non-empty and
    /// `max_sections >= 1`.
    pub fn rank<'a>(
        &self,
        sections: &'a [Section],
        query: &str,
        max_sections: usize,
    ) -> Vec<ScoredSection<'a>> {
        self.rank_excluding(sections, query, max_sections, &HashSet::new())
    }

    /// Like [`rank`](Self::rank) but never returns a section whose id is in
    /// `excluded`. Empty only when every section is excluded.
    pub fn rank_excluding<'a>(
        &self,
        sections: &'a [Section],
        query: &str,
        max_sections: usize,
        excluded: &HashSet<String>,
    ) -> Vec<ScoredSection<'a>> {
        let candidates: Vec<&Section> = sections
            .iter()
            .filter(|s| !excluded.contains(&s.id))
            .collect();
        if candidates.is_empty() || max_sections == 0 {
            return Vec::new();
        }

        let keywords = extract_keywords(query);
        let concepts = concept_terms(&keywords);

        let mut scored: Vec<ScoredSection<'a>> = candidates
            .iter()
            .map(|&section| {
                let words = tokenize(&format!("{}\n{}", section.title, section.body));
                ScoredSection {
                    section,
                    score: 0.0,
                    keyword_score: keyword_score(&words, &keywords),
                    concept_score: concept_score(&words, &concepts),
                }
            })
            .collect();

        let best_raw = scored
            .iter()
            .map(|s| s.keyword_score + s.concept_score)
            .fold(0.0_f64, f64::max);
        if best_raw <= 0.0 || best_raw < self.config.min_relevance {
            debug!(best = best_raw, "no section passes relevance floor; using document order");
            return candidates
                .into_iter()
                .take(max_sections)
                .map(|section| ScoredSection {
                    section,
                    score: 0.0,
                    keyword_score: 0.0,
                    concept_score: 0.0,
                })
                .collect();
        }

        match self.config.mode {
            RankingMode::Keyword => {
                for s in &mut scored {
                    s.score = s.keyword_score + s.concept_score;
                }
            }
            RankingMode::Hybrid => {
                let n = scored.len() as f64;
                let keyword_weights = position_weights(&scored, |s| s.keyword_score, n);
                let concept_weights = position_weights(&scored, |s| s.concept_score, n);
                for s in &mut scored {
                    let kw = keyword_weights.get(s.section.id.as_str()).copied().unwrap_or(0.0);
                    let cw = concept_weights.get(s.section.id.as_str()).copied().unwrap_or(0.0);
                    s.score = HYBRID_KEYWORD_WEIGHT * kw + HYBRID_CONCEPT_WEIGHT * cw;
                }
            }
        }

        sort_by_score(&mut scored);
        scored.truncate(max_sections);
        scored
    }
}

/// Lower-cased query words with stop words and single letters removed,
/// de-duplicated in query order. Numbers are kept.
///
/// ```rust
/// use docent_core::retrieve::extract_keywords;
///
/// assert_eq!(
///     extract_keywords("What does chapter 3 say about leave requests?"),
///     vec!["chapter", "3", "leave", "requests"],
/// );
/// ```
pub fn extract_keywords(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(query)
        .into_iter()
        .filter(|w| {
            let numeric = w.chars().all(|c| c.is_ascii_digit());
            (numeric || w.chars().count() > 1) && !STOP_WORDS.contains(&w.as_str())
        })
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// Related stems (with weights) triggered by `keywords`. A stem triggered
/// by several keywords keeps its highest weight.
fn concept_terms(keywords: &[String]) -> Vec<(&'static str, f64)> {
    let mut terms: HashMap<&'static str, f64> = HashMap::new();
    for (triggers, related) in CONCEPTS {
        let fired = keywords
            .iter()
            .any(|k| triggers.iter().any(|t| k.starts_with(t)));
        if !fired {
            continue;
        }
        for &(term, weight) in related.iter() {
            let entry = terms.entry(term).or_insert(0.0);
            *entry = entry.max(weight);
        }
    }
    let mut out: Vec<_> = terms.into_iter().collect();
    out.sort_by(|a, b| a.0.cmp(b.0));
    out
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

fn keyword_score(words: &[String], keywords: &[String]) -> f64 {
    if words.is_empty() || keywords.is_empty() {
        return 0.0;
    }

    let mut weighted = 0.0;
    let mut positions: Vec<Vec<usize>> = Vec::with_capacity(keywords.len());
    for keyword in keywords {
        let mut hits = Vec::new();
        for (i, word) in words.iter().enumerate() {
            if word == keyword {
                weighted += EXACT_WEIGHT;
                hits.push(i);
            } else if keyword.chars().count() >= PARTIAL_MIN_LEN && word.contains(keyword.as_str()) {
                weighted += PARTIAL_WEIGHT;
            }
        }
        positions.push(hits);
    }

    if weighted == 0.0 {
        return 0.0;
    }

    let density = weighted / words.len() as f64 * DENSITY_FACTOR;
    weighted + density + proximity_bonus(&positions)
}

/// Sum of `max(0, window − distance)` over every pair of occurrences of two
/// distinct keywords that lie within the window.
fn proximity_bonus(positions: &[Vec<usize>]) -> f64 {
    let mut bonus = 0.0;
    for i in 0..positions.len() {
        for j in (i + 1)..positions.len() {
            for &a in &positions[i] {
                for &b in &positions[j] {
                    let distance = a.abs_diff(b);
                    if distance <= PROXIMITY_WINDOW {
                        bonus += PROXIMITY_WINDOW.saturating_sub(distance) as f64;
                    }
                }
            }
        }
    }
    bonus
}

fn concept_score(words: &[String], concepts: &[(&str, f64)]) -> f64 {
    concepts
        .iter()
        .filter(|(term, _)| words.iter().any(|w| w.starts_with(term)))
        .map(|(_, weight)| weight * CONCEPT_FACTOR)
        .sum()
}

/// `(N − rank) / N` for every section with a positive signal, keyed by id.
fn position_weights<'a>(
    scored: &[ScoredSection<'a>],
    signal: impl Fn(&ScoredSection<'a>) -> f64,
    n: f64,
) -> HashMap<&'a str, f64> {
    let mut ranked: Vec<&ScoredSection<'a>> = scored.iter().filter(|s| signal(*s) > 0.0).collect();
    ranked.sort_by(|a, b| {
        signal(*b)
            .total_cmp(&signal(*a))
            .then(a.section.ordinal.cmp(&b.section.ordinal))
    });
    ranked
        .into_iter()
        .enumerate()
        .map(|(rank, s)| (s.section.id.as_str(), ((n - rank as f64) / n).max(0.0)))
        .collect()
}

fn sort_by_score(scored: &mut [ScoredSection<'_>]) {
    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(b.keyword_score.total_cmp(&a.keyword_score))
            .then(a.section.ordinal.cmp(&b.section.ordinal))
    });
}
