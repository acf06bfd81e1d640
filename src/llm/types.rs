//! Shared value types for backend calls.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// Input/output token counts.
///
/// Counts are unsigned and accumulate with saturating addition, so a running
/// total can never go negative or wrap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt
    pub input: u32,
    /// Tokens produced by the model
    pub output: u32,
}

impl TokenUsage {
    /// Creates a usage record.
    #[must_use]
    pub fn new(input: u32, output: u32) -> Self {
        Self { input, output }
    }

    /// Returns true if no tokens were counted.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.input == 0 && self.output == 0
    }

    /// Returns input plus output.
    #[must_use]
    pub fn total(&self) -> u64 {
        u64::from(self.input) + u64::from(self.output)
    }
}

impl Add for TokenUsage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            input: self.input.saturating_add(rhs.input),
            output: self.output.saturating_add(rhs.output),
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Per-request knobs forwarded to the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderOptions {
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

/// Result of a single-shot backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// The generated text
    pub content: String,
    /// Usage as reported by the backend, if it reports any
    pub usage: Option<TokenUsage>,
}

impl Completion {
    /// Creates a completion without backend-reported usage.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_addition_saturates() {
        let mut usage = TokenUsage::new(u32::MAX - 1, 3);
        usage += TokenUsage::new(5, 4);

        assert_eq!(usage.input, u32::MAX);
        assert_eq!(usage.output, 7);
    }

    #[test]
    fn usage_total_does_not_overflow() {
        let usage = TokenUsage::new(u32::MAX, u32::MAX);
        assert_eq!(usage.total(), 2 * u64::from(u32::MAX));
    }

    #[test]
    fn default_usage_is_zero() {
        assert!(TokenUsage::default().is_zero());
        assert!(!TokenUsage::new(0, 1).is_zero());
    }

    #[test]
    fn options_skip_empty_fields() {
        let json = serde_json::to_value(ProviderOptions::default()).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }
}
