//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~0.3 tokens per character, which
//! matches BPE tokenizers on Portuguese prose closely enough for budgeting.
//! Counts characters, not bytes, so accented text is not over-charged.

/// Tokens per character, in tenths.
const TOKENS_PER_TEN_CHARS: usize = 3;

/// Estimate the token count for a string.
///
/// Heuristic: `ceil(chars × 0.3)`.
pub fn estimate_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    (chars * TOKENS_PER_TEN_CHARS).div_ceil(10)
}
