//! Mood symbol selection for model replies.
//!
//! An ordered list of keyword rules: the first rule with any keyword found in
//! the lowercased reply wins, otherwise the fallback symbol is used.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoodRule {
    pub symbol: &'static str,
    pub keywords: &'static [&'static str],
}

pub const FALLBACK_MOOD_SYMBOL: &str = "🪞";

pub const DEFAULT_MOOD_RULES: &[MoodRule] = &[
    MoodRule {
        symbol: "🌿",
        keywords: &["спокойствие", "покой", "уравновешенность"],
    },
    MoodRule {
        symbol: "🌞",
        keywords: &["вдохновение", "рост", "энергия"],
    },
    MoodRule {
        symbol: "🌧️",
        keywords: &["тревога", "неуверенность", "напряжение"],
    },
    MoodRule {
        symbol: "🌙",
        keywords: &["печаль", "усталость", "грусть"],
    },
];

#[derive(Debug, Clone)]
pub struct MoodRules {
    rules: Vec<MoodRule>,
    fallback: &'static str,
}

impl Default for MoodRules {
    fn default() -> Self {
        Self::new(DEFAULT_MOOD_RULES.to_vec(), FALLBACK_MOOD_SYMBOL)
    }
}

impl MoodRules {
    pub fn new(rules: Vec<MoodRule>, fallback: &'static str) -> Self {
        Self { rules, fallback }
    }

    pub fn symbol_for(&self, reply: &str) -> &'static str {
        let lowered = reply.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.keywords.iter().any(|word| lowered.contains(word)))
            .map(|rule| rule.symbol)
            .unwrap_or(self.fallback)
    }
}
