//! Wire contract between Docent and the language model.
//!
//! Two kinds of replies are interpreted:
//!
//! - **Answers** to questions, which may instead start with
//!   [`NEED_MORE_CHUNKS_PREFIX`] to ask for more context
//!   ([`parse_model_reply`]).
//! - **Structured replies** to internal prompts: section selection,
//!   model-assisted division, and query classification. Each has its own
//!   result type and is parsed in stages, stopping at the first that works:
//!
//! | Stage | Accepts |
//! |-------|---------|
//! | [`Recovery::Json`] | the reply is the JSON object |
//! | [`Recovery::Fenced`] | JSON inside a ```` ``` ```` / ```` ```json ```` fence |
//! | [`Recovery::Embedded`] | the first `{` … last `}` span of surrounding prose |
//! | [`Recovery::Integers`] | selection only: bare integers in the text |
//!
//! A reply that survives no stage yields a [`ParseError`] carrying the raw
//! text, so the caller can log it and take its own fallback.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::QueryAnalysis;

/// Literal prefix the model uses to ask for more context.
pub const NEED_MORE_CHUNKS_PREFIX: &str = "NEED_MORE_CHUNKS:";

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\n?(.*?)```").expect("fence regex is valid")
});

static INTEGER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,4}\b").expect("integer regex is valid"));

/// A structured reply that could not be understood.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("could not parse model reply: {reason}")]
pub struct ParseError {
    /// The reply as received.
    pub raw: String,
    pub reason: String,
}

impl ParseError {
    fn new(raw: &str, reason: impl Into<String>) -> Self {
        Self {
            raw: raw.to_string(),
            reason: reason.into(),
        }
    }
}

/// Which parsing stage produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recovery {
    Json,
    Fenced,
    Embedded,
    Integers,
}

/// An answer, or a request for more context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelReply {
    Answer(String),
    NeedMore { hint: String },
}

/// Interpret a reply to a question.
///
/// ```rust
/// use docent_core::protocol::{parse_model_reply, ModelReply};
///
/// assert_eq!(
///     parse_model_reply("NEED_MORE_CHUNKS: sick leave rules"),
///     ModelReply::NeedMore { hint: "sick leave rules".into() },
/// );
/// assert_eq!(parse_model_reply("Two weeks."), ModelReply::Answer("Two weeks.".into()));
/// ```
pub fn parse_model_reply(text: &str) -> ModelReply {
    let trimmed = text.trim_start();
    match trimmed.strip_prefix(NEED_MORE_CHUNKS_PREFIX) {
        Some(hint) => ModelReply::NeedMore {
            hint: hint.trim().to_string(),
        },
        None => ModelReply::Answer(text.trim().to_string()),
    }
}

/// Contents of the first code fence, or the trimmed text when unfenced.
pub fn strip_code_fences(text: &str) -> &str {
    match FENCE_RE.captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => text.trim(),
    }
}

/// Sections picked by the model, as 1-based indices into the list it was
/// shown.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionSelection {
    pub indices: Vec<usize>,
    pub justification: Option<String>,
    pub recovery: Recovery,
}

impl SectionSelection {
    /// The selection as 0-based positions.
    pub fn positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices.iter().map(|i| i - 1)
    }
}

#[derive(Deserialize)]
struct RawSelection {
    selected_sections: Vec<Value>,
    #[serde(default)]
    justification: Option<String>,
}

/// Parse `{"selected_sections":[...], "justification":"..."}`.
///
/// Entries may be numbers or strings containing a number (`"Section 3"`).
/// Out-of-range and duplicate indices are discarded; a selection left empty
/// is an error.
pub fn parse_section_selection(raw: &str, section_count: usize) -> Result<SectionSelection, ParseError> {
    let in_range = |mut indices: Vec<usize>| {
        let mut seen = std::collections::HashSet::new();
        indices.retain(|&i| i >= 1 && i <= section_count && seen.insert(i));
        indices
    };

    if let Ok((parsed, recovery)) = parse_json_object::<RawSelection>(raw) {
        let indices = in_range(parsed.selected_sections.iter().filter_map(index_from_value).collect());
        if !indices.is_empty() {
            return Ok(SectionSelection {
                indices,
                justification: parsed.justification.filter(|j| !j.trim().is_empty()),
                recovery,
            });
        }
    }

    let indices = in_range(
        INTEGER_RE
            .find_iter(raw)
            .filter_map(|m| m.as_str().parse().ok())
            .collect(),
    );
    if indices.is_empty() {
        return Err(ParseError::new(raw, "no usable section indices"));
    }
    Ok(SectionSelection {
        indices,
        justification: None,
        recovery: Recovery::Integers,
    })
}

fn index_from_value(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => INTEGER_RE.find(s).and_then(|m| m.as_str().parse().ok()),
        _ => None,
    }
}

/// One boundary proposed by the model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Division {
    pub title: String,
    /// Verbatim text at which the division starts.
    pub start_text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DivisionPlan {
    pub divisions: Vec<Division>,
    pub recovery: Recovery,
}

#[derive(Deserialize)]
struct RawDivisions {
    divisions: Vec<Division>,
}

/// Parse `{"divisions":[{"title":"...","start_text":"..."}]}`.
pub fn parse_division_plan(raw: &str) -> Result<DivisionPlan, ParseError> {
    let (parsed, recovery) = parse_json_object::<RawDivisions>(raw)?;
    let divisions: Vec<Division> = parsed
        .divisions
        .into_iter()
        .filter(|d| !d.start_text.trim().is_empty())
        .collect();
    if divisions.is_empty() {
        return Err(ParseError::new(raw, "no divisions with start text"));
    }
    Ok(DivisionPlan { divisions, recovery })
}

#[derive(Deserialize)]
struct RawClassification {
    needs_document: bool,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

fn default_confidence() -> f64 {
    0.8
}

/// Parse `{"needs_document":bool,"confidence":0..1,"reasoning":"..."}`.
/// Confidence is clamped to `[0, 1]`.
pub fn parse_classification(raw: &str) -> Result<QueryAnalysis, ParseError> {
    let (parsed, _) = parse_json_object::<RawClassification>(raw)?;
    let confidence = if parsed.confidence.is_finite() {
        parsed.confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };
    Ok(QueryAnalysis {
        needs_document: parsed.needs_document,
        confidence,
        reasoning: parsed.reasoning,
    })
}

/// Deserialize a JSON object from a reply, trying the raw text, then the
/// fenced block, then the outermost brace span.
fn parse_json_object<T: DeserializeOwned>(raw: &str) -> Result<(T, Recovery), ParseError> {
    let mut last_error = String::from("empty reply");

    let attempts = [
        (raw.trim(), Recovery::Json),
        (strip_code_fences(raw), Recovery::Fenced),
        (embedded_object(raw).unwrap_or(""), Recovery::Embedded),
    ];
    for (candidate, recovery) in attempts {
        if candidate.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(candidate) {
            Ok(value) => return Ok((value, recovery)),
            Err(e) => last_error = e.to_string(),
        }
    }
    Err(ParseError::new(raw, last_error))
}

fn embedded_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
