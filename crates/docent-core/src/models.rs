//! Core data models.
//!
//! These types flow through the whole pipeline: the segmenter produces
//! [`Document`]s and [`Section`]s, the cache stores them, the retriever and
//! assembler read them, and the cost monitor appends [`CostEntry`] records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::segment::DivisionStrategy;

/// Whether a document is used whole or through its sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Fits the small-document threshold; the whole body is the context.
    Small,
    /// Split into an ordered list of [`Section`]s.
    Large,
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentKind::Small => write!(f, "small"),
            DocumentKind::Large => write!(f, "large"),
        }
    }
}

/// A processed document. Immutable once created.
///
/// `content` is the *normalized* text; every [`Section`] offset indexes into
/// it. Identity for caching purposes is `content_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub name: String,
    /// SHA-256 (hex) over name and raw content; also the cache key.
    pub content_hash: String,
    /// Length of the raw input in bytes, before normalization.
    pub raw_length: usize,
    /// Estimated tokens of the normalized content.
    pub token_estimate: usize,
    pub kind: DocumentKind,
    pub created_at: DateTime<Utc>,
    pub content: String,
    /// Strategy that produced the sections (`None` for small documents).
    pub strategy: Option<DivisionStrategy>,
    /// Empty for [`DocumentKind::Small`].
    pub sections: Vec<Section>,
}

impl Document {
    pub fn is_large(&self) -> bool {
        self.kind == DocumentKind::Large
    }

    pub fn section(&self, id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == id)
    }

    /// Section ids in document order.
    pub fn section_ids(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.id.as_str())
    }
}

/// A contiguous slice of a [`Document`].
///
/// `body == document.content[start_offset..end_offset]`. Sections of one
/// document partition its content without gaps or overlaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub document_id: String,
    pub ordinal: usize,
    pub title: String,
    pub body: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub token_estimate: usize,
    pub summary: String,
    /// Query-independent weight used when padding an under-filled context.
    pub importance: f64,
}

/// Result of deciding whether a question needs the active document.
///
/// Derived per query and never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub needs_document: bool,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    pub reasoning: String,
}

/// The kind of model call a [`CostEntry`] accounts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Asking the model whether a question needs the document.
    Classification,
    /// Model-assisted document division.
    Segmentation,
    /// Model-driven section selection.
    Selection,
    /// First answer attempt for a question.
    Answer,
    /// Re-issued answer after a "need more context" reply.
    Escalation,
    /// Conversation that does not involve the document.
    General,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Operation::Classification => "classification",
            Operation::Segmentation => "segmentation",
            Operation::Selection => "selection",
            Operation::Answer => "answer",
            Operation::Escalation => "escalation",
            Operation::General => "general",
        };
        f.write_str(s)
    }
}

/// One line of the append-only cost ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub cost_usd: f64,
    pub description: String,
}
