//! Token counting with the cl100k tokenizer.

use std::sync::OnceLock;
use tiktoken_rs::CoreBPE;

static TOKENIZER: OnceLock<Option<CoreBPE>> = OnceLock::new();

fn tokenizer() -> Option<&'static CoreBPE> {
    TOKENIZER
        .get_or_init(|| match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                tracing::warn!(error = %e, "tokenizer unavailable, falling back to estimates");
                None
            }
        })
        .as_ref()
}

/// Counts the tokens in `text`.
///
/// Falls back to a four-characters-per-token estimate if the tokenizer
/// tables cannot be loaded.
#[must_use]
pub fn count_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }

    let count = match tokenizer() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => estimate_tokens(text),
    };

    u32::try_from(count).unwrap_or(u32::MAX)
}

fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_has_no_tokens() {
        assert_eq!(count_tokens(""), 0);
    }

    #[test]
    fn short_text_has_some_tokens() {
        let count = count_tokens("Hello, world!");
        assert!(count > 0);
        assert!(count < 13);
    }

    #[test]
    fn longer_text_has_more_tokens() {
        assert!(count_tokens("one two three four five six") > count_tokens("one"));
    }

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("abcd"), 1);
    }
}
