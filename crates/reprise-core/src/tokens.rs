use serde::{Deserialize, Serialize};

/// Token counts reported by a backend for one completed generation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    /// Total cost charged to the assistant turn this usage describes.
    pub fn total(&self) -> u64 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_sums_both_sides() {
        assert_eq!(TokenUsage::new(9, 12).total(), 21);
        assert_eq!(TokenUsage::default().total(), 0);
    }

    #[test]
    fn total_saturates() {
        assert_eq!(TokenUsage::new(u64::MAX, 1).total(), u64::MAX);
    }
}
