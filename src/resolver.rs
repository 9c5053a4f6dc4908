use crate::config::{normalize_pattern, CategoryRule, Config, Family};
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;

/// Resolves extracted title fields to exactly one category rule.
///
/// All rule patterns are compiled case-insensitively at construction so a
/// bad pattern is a startup failure, not a per-submission one.
pub struct CategoryEngine {
    config: Config,
    compiled_patterns: HashMap<String, Regex>,
}

impl CategoryEngine {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let mut engine = CategoryEngine {
            config,
            compiled_patterns: HashMap::new(),
        };
        engine.compile_patterns()?;
        Ok(engine)
    }

    fn compile_patterns(&mut self) -> anyhow::Result<()> {
        let rules: Vec<CategoryRule> = self
            .config
            .personal
            .rules
            .iter()
            .chain(self.config.informational.rules.iter())
            .cloned()
            .collect();
        for rule in &rules {
            for pattern in rule.have.iter().chain(rule.want.iter()) {
                if !self.compiled_patterns.contains_key(pattern) {
                    let regex = RegexBuilder::new(&normalize_pattern(pattern))
                        .case_insensitive(true)
                        .build()
                        .map_err(|e| {
                            anyhow::anyhow!("Invalid pattern in rule '{}': {}", rule.name, e)
                        })?;
                    self.compiled_patterns.insert(pattern.clone(), regex);
                }
            }
        }
        Ok(())
    }

    fn pattern_matches(&self, pattern: &str, field: &str) -> bool {
        self.compiled_patterns
            .get(pattern)
            .map(|re| re.is_match(field))
            .unwrap_or(false)
    }

    /// Resolve a personal post from its have/want fields.
    ///
    /// Iteration does not stop at the first match: a later rule matching
    /// either field overwrites an earlier resolution. Last match wins. This
    /// is a documented contract of the rule-set ordering; changing it would
    /// silently change moderation outcomes.
    pub fn resolve_personal(&self, have: &str, want: &str) -> &CategoryRule {
        let mut resolved: Option<&CategoryRule> = None;

        for rule in &self.config.personal.rules {
            if let Some(pattern) = &rule.want {
                if self.pattern_matches(pattern, want) {
                    log::debug!("Rule '{}' matched want field", rule.name);
                    resolved = Some(rule);
                }
            }
            if let Some(pattern) = &rule.have {
                if self.pattern_matches(pattern, have) {
                    log::debug!("Rule '{}' matched have field", rule.name);
                    resolved = Some(rule);
                }
            }
        }

        resolved.unwrap_or_else(|| self.default_rule())
    }

    /// Resolve an informational post from its tag. First matching rule
    /// wins; an unknown tag is a classification failure.
    pub fn resolve_informational(&self, tag: &str) -> Option<&CategoryRule> {
        self.config
            .informational
            .rules
            .iter()
            .find(|rule| rule.tag.as_deref() == Some(tag))
    }

    pub fn rule_family(&self, rule: &CategoryRule) -> Family {
        if rule.tag.is_some() {
            Family::Informational
        } else {
            Family::Personal
        }
    }

    fn default_rule(&self) -> &CategoryRule {
        // Existence is enforced by Config::validate
        self.config
            .personal
            .rules
            .iter()
            .find(|r| r.name == self.config.default_category)
            .expect("default category missing from validated config")
    }
}
