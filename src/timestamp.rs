use crate::config::{normalize_pattern, Config};
use regex::Regex;

/// Result of checking a body for the required timestamp marker. The two
/// checks are independent: a body can fail both at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampCheck {
    /// Marker appears somewhere in the body. Absence is reported for
    /// moderator review.
    pub present: bool,
    /// Marker appears within the first three non-empty lines. Failing
    /// this is advisory only, never blocks.
    pub early: bool,
}

pub struct TimestampChecker {
    pattern: Regex,
}

const EARLY_LINES: usize = 3;

impl TimestampChecker {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let pattern = Regex::new(&normalize_pattern(&config.timestamp_pattern))
            .map_err(|e| anyhow::anyhow!("Invalid timestamp pattern: {}", e))?;
        Ok(TimestampChecker { pattern })
    }

    pub fn check(&self, body: &str) -> TimestampCheck {
        let present = self.pattern.is_match(body);
        let early = body
            .lines()
            .filter(|line| !line.trim().is_empty())
            .take(EARLY_LINES)
            .any(|line| self.pattern.is_match(line));

        TimestampCheck { present, early }
    }
}
