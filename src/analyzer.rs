//! Fast, local query classification.
//!
//! Decides whether a question needs the attached document before any
//! model call is spent on it. Each regex family maps to a verdict and a
//! confidence; the orchestrator asks the model only when the confidence is
//! below its threshold.
//!
//! | Family | Verdict | Confidence |
//! |--------|---------|------------|
//! | empty input | no | 1.0 |
//! | greeting / thanks / farewell / small talk (short message) | no | 0.9 |
//! | explicit document reference | yes | 0.9 |
//! | quoted text | yes | 0.85 |
//! | plain question, document attached | yes | 0.6 |
//! | anything else | document attached? | 0.5 |

use std::sync::LazyLock;

use regex::Regex;

use docent_core::models::QueryAnalysis;

static GREETING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:hi|hello|hey|howdy|greetings|good\s+(?:morning|afternoon|evening)|hola|buen[oa]s(?:\s+(?:d[ií]as|tardes|noches))?|saludos)\b")
        .expect("greeting regex is valid")
});

static FAREWELL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:thanks|thank\s+you|thx|cheers|bye|goodbye|see\s+you|ok(?:ay)?|great|perfect|gracias|adi[oó]s|chao|hasta\s+luego|perfecto|vale)\b")
        .expect("farewell regex is valid")
});

static SMALL_TALK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:how\s+are\s+you|who\s+are\s+you|what\s+can\s+you\s+do|what(?:'s|\s+is)\s+your\s+name|qu[eé]\s+tal|c[oó]mo\s+est[aá]s|qui[eé]n\s+eres|qu[eé]\s+puedes\s+hacer)\b")
        .expect("small talk regex is valid")
});

static DOCUMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:document|doc|file|pdf|attachment|attached|text|article|section|chapter|clause|annex|appendix|paragraph|page|handbook|policy|contract|regulation|documento|archivo|adjunto|art[ií]culo|secci[oó]n|cap[ií]tulo|cl[aá]usula|anexo|p[aá]rrafo|p[aá]gina|reglamento|contrato|pol[ií]tica)s?\b")
        .expect("document regex is valid")
});

static QUOTED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""[^"]{3,}"|“[^”]{3,}”|«[^»]{3,}»"#).expect("quoted regex is valid")
});

static QUESTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\?\s*$|^\s*¿|^\s*(?:what|which|who|whom|when|where|why|how|is|are|can|could|does|do|should|must|may|qu[eé]|cu[aá]l|cu[aá]ndo|d[oó]nde|por\s+qu[eé]|c[oó]mo|qui[eé]n)\b")
        .expect("question regex is valid")
});

const SOCIAL_MAX_WORDS: usize = 8;

/// Classify `query` without calling the model.
pub fn classify_fast(query: &str, has_document: bool) -> QueryAnalysis {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return verdict(false, 1.0, "empty message");
    }

    let words = trimmed.split_whitespace().count();
    let social = GREETING_RE.is_match(trimmed)
        || FAREWELL_RE.is_match(trimmed)
        || SMALL_TALK_RE.is_match(trimmed);
    let references_document = DOCUMENT_RE.is_match(trimmed);

    if social && words <= SOCIAL_MAX_WORDS && !references_document {
        return verdict(false, 0.9, "greeting, thanks, or small talk");
    }
    if references_document {
        return verdict(true, 0.9, "explicitly refers to the document");
    }
    if QUOTED_RE.is_match(trimmed) {
        return verdict(true, 0.85, "quotes text to look up");
    }
    if QUESTION_RE.is_match(trimmed) && has_document {
        return verdict(true, 0.6, "question while a document is attached");
    }
    verdict(has_document, 0.5, "no strong signal")
}

fn verdict(needs_document: bool, confidence: f64, reasoning: &str) -> QueryAnalysis {
    QueryAnalysis {
        needs_document,
        confidence,
        reasoning: reasoning.to_string(),
    }
}
