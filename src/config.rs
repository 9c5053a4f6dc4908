use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Partition of the category taxonomy. Each family has its own rule list,
/// repost thresholds and persisted per-author state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Personal,
    Informational,
}

impl Family {
    /// Key used to partition persisted per-author state.
    pub fn prefix(&self) -> &'static str {
        match self {
            Family::Personal => "personal",
            Family::Informational => "informational",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// One classification rule. Personal rules match a pattern against the
/// extracted have or want field (never both); informational rules match a
/// tag token by equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRule {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub have: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub want: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Class marker applied to the author's flair on acceptance.
    pub class: String,
    #[serde(default)]
    pub timestamp_check: bool,
    #[serde(default)]
    pub repost_check: bool,
    #[serde(default)]
    pub reply: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_flair: Option<String>,
}

/// Per-family rule list and repost thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyConfig {
    /// Rules in declaration order. Order is a contract: personal resolution
    /// is last-match-wins, informational is first-match-wins.
    pub rules: Vec<CategoryRule>,
    /// Repost window in hours. Submissions by the same author closer
    /// together than this are flagged.
    pub upper_hour: i64,
    /// Grace window in minutes. A repost inside this window is tolerated if
    /// the prior submission was already removed.
    pub lower_min: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Loose trade-post title pattern. Must capture exactly three groups:
    /// location, have, want.
    pub trade_title_pattern: String,
    /// Optional stricter gate applied after the loose pattern matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict_title_pattern: Option<String>,
    /// Informational title pattern. Must capture exactly one group: the tag.
    pub info_title_pattern: String,
    /// Marker that must appear in the body of timestamp-checked categories.
    pub timestamp_pattern: String,
    /// Personal category used when no personal rule matches.
    pub default_category: String,
    /// Path to the per-author repost state database.
    pub user_db_path: String,
    pub personal: FamilyConfig,
    pub informational: FamilyConfig,
    /// Primary location code to the secondary codes it contains.
    pub locations: HashMap<String, Vec<String>>,
}

/// Patterns arrive from storage with doubled backslashes. Collapse them
/// before handing the pattern to the regex compiler.
pub fn normalize_pattern(pattern: &str) -> String {
    pattern.replace("\\\\", "\\")
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        let content = serde_yaml::to_string(self)?;
        Ok(content)
    }

    pub fn family(&self, family: Family) -> &FamilyConfig {
        match family {
            Family::Personal => &self.personal,
            Family::Informational => &self.informational,
        }
    }

    /// Eager validation. Any failure here is fatal at load time; nothing in
    /// the checker tolerates a half-valid rule set.
    pub fn validate(&self) -> anyhow::Result<()> {
        let trade = regex::Regex::new(&normalize_pattern(&self.trade_title_pattern))
            .map_err(|e| anyhow::anyhow!("Invalid trade title pattern: {}", e))?;
        if trade.captures_len() != 4 {
            anyhow::bail!(
                "Trade title pattern must capture exactly 3 groups (location, have, want), got {}",
                trade.captures_len() - 1
            );
        }
        if let Some(strict) = &self.strict_title_pattern {
            regex::Regex::new(&normalize_pattern(strict))
                .map_err(|e| anyhow::anyhow!("Invalid strict title pattern: {}", e))?;
        }
        let info = regex::Regex::new(&normalize_pattern(&self.info_title_pattern))
            .map_err(|e| anyhow::anyhow!("Invalid info title pattern: {}", e))?;
        if info.captures_len() != 2 {
            anyhow::bail!(
                "Info title pattern must capture exactly 1 group (tag), got {}",
                info.captures_len() - 1
            );
        }
        regex::Regex::new(&normalize_pattern(&self.timestamp_pattern))
            .map_err(|e| anyhow::anyhow!("Invalid timestamp pattern: {}", e))?;

        for rule in &self.personal.rules {
            if rule.have.is_some() && rule.want.is_some() {
                anyhow::bail!(
                    "Personal rule '{}' defines both 'have' and 'want'; rules are exclusive per field",
                    rule.name
                );
            }
            if rule.tag.is_some() {
                anyhow::bail!("Personal rule '{}' must not define 'tag'", rule.name);
            }
            for pattern in rule.have.iter().chain(rule.want.iter()) {
                regex::Regex::new(&normalize_pattern(pattern)).map_err(|e| {
                    anyhow::anyhow!("Invalid pattern in rule '{}': {}", rule.name, e)
                })?;
            }
        }
        for rule in &self.informational.rules {
            if rule.tag.is_none() {
                anyhow::bail!("Informational rule '{}' must define 'tag'", rule.name);
            }
            if rule.have.is_some() || rule.want.is_some() {
                anyhow::bail!(
                    "Informational rule '{}' must not define 'have' or 'want'",
                    rule.name
                );
            }
        }

        if !self
            .personal
            .rules
            .iter()
            .any(|r| r.name == self.default_category)
        {
            anyhow::bail!(
                "Default category '{}' is not defined in the personal family",
                self.default_category
            );
        }

        for family in [&self.personal, &self.informational] {
            if family.upper_hour < 0 || family.lower_min < 0 {
                anyhow::bail!("Repost thresholds must be non-negative");
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut locations = HashMap::new();
        locations.insert(
            "US".to_string(),
            vec![
                "CA", "NY", "TX", "WA", "FL", "IL", "PA", "OH", "MI", "GA", "NC", "VA", "MA",
                "NJ", "AZ", "CO", "MN", "OR", "WI",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        );
        locations.insert(
            "CA".to_string(),
            vec!["ON", "QC", "BC", "AB", "MB", "SK", "NS", "NB"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        locations.insert(
            "EU".to_string(),
            vec!["UK", "DE", "FR", "NL", "SE", "ES", "IT", "PL", "FI", "DK"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        locations.insert(
            "OTHER".to_string(),
            vec!["AU", "NZ", "JP", "SG", "BR", "MX", "IN", "ZA"]
                .into_iter()
                .map(String::from)
                .collect(),
        );

        Config {
            trade_title_pattern: r"^\[([A-Z]{2}(?:-[A-Z0-9]{1,3})?)\]\s*\[H\](.*)\[W\](.*)$"
                .to_string(),
            strict_title_pattern: None,
            info_title_pattern: r"^\[([A-Z]+)\]".to_string(),
            timestamp_pattern: r"(?i)timestamp".to_string(),
            default_category: "trading".to_string(),
            user_db_path: "/var/lib/swapmod/users.db".to_string(),
            personal: FamilyConfig {
                rules: vec![
                    CategoryRule {
                        name: "trading".to_string(),
                        have: None,
                        want: None,
                        tag: None,
                        class: "trade".to_string(),
                        timestamp_check: true,
                        repost_check: true,
                        reply: true,
                        required_flair: None,
                    },
                    CategoryRule {
                        name: "selling".to_string(),
                        have: None,
                        want: Some(r"paypal|cash|\$|money|venmo".to_string()),
                        tag: None,
                        class: "sell".to_string(),
                        timestamp_check: true,
                        repost_check: true,
                        reply: true,
                        required_flair: None,
                    },
                    CategoryRule {
                        name: "buying".to_string(),
                        have: Some(r"paypal|cash|\$|money|venmo".to_string()),
                        want: None,
                        tag: None,
                        class: "buy".to_string(),
                        timestamp_check: false,
                        repost_check: true,
                        reply: true,
                        required_flair: None,
                    },
                ],
                upper_hour: 24,
                lower_min: 10,
            },
            informational: FamilyConfig {
                rules: vec![
                    CategoryRule {
                        name: "meta".to_string(),
                        have: None,
                        want: None,
                        tag: Some("META".to_string()),
                        class: "meta".to_string(),
                        timestamp_check: false,
                        repost_check: false,
                        reply: false,
                        required_flair: None,
                    },
                    CategoryRule {
                        name: "giveaway".to_string(),
                        have: None,
                        want: None,
                        tag: Some("GIVEAWAY".to_string()),
                        class: "giveaway".to_string(),
                        timestamp_check: true,
                        repost_check: true,
                        reply: false,
                        required_flair: None,
                    },
                    CategoryRule {
                        name: "store".to_string(),
                        have: None,
                        want: None,
                        tag: Some("STORE".to_string()),
                        class: "store".to_string(),
                        timestamp_check: false,
                        repost_check: true,
                        reply: false,
                        required_flair: Some("verified-store".to_string()),
                    },
                ],
                upper_hour: 72,
                lower_min: 30,
            },
            locations,
        }
    }
}
