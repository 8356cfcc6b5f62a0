//! Token estimation.
//!
//! Docent never runs a real tokenizer. Every budget in the pipeline is
//! expressed in *estimated* tokens using a fixed 4 characters ≈ 1 token
//! ratio, which is language-agnostic and cheap enough to evaluate on every
//! section of every document.

/// Approximate characters-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count of `text` (`ceil(chars / 4)`).
///
/// Counts Unicode scalar values rather than bytes so accented text is not
/// over-counted.
///
/// ```rust
/// use docent_core::tokens::estimate_tokens;
///
/// assert_eq!(estimate_tokens(""), 0);
/// assert_eq!(estimate_tokens("abcd"), 1);
/// assert_eq!(estimate_tokens("abcde"), 2);
/// ```
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Convert a token budget into an approximate character budget.
pub fn tokens_to_chars(tokens: usize) -> usize {
    tokens.saturating_mul(CHARS_PER_TOKEN)
}
