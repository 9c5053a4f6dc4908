use crate::config::{normalize_pattern, Config};
use regex::Regex;

/// Outcome of title classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TitleClass {
    Personal {
        location: String,
        have: String,
        want: String,
    },
    Informational {
        tag: String,
    },
    Unclassified,
}

pub struct TitleClassifier {
    trade_re: Regex,
    strict_re: Option<Regex>,
    info_re: Regex,
}

/// Fold a decorated title down to plain ASCII so pattern matching is not
/// broken by accents or decorative Unicode. Accented Latin letters map to
/// their base letter; everything else non-ASCII is dropped.
pub fn canonicalize_title(title: &str) -> String {
    title
        .chars()
        .filter_map(|c| {
            if c.is_ascii() {
                return Some(c);
            }
            match c {
                'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' => Some('a'),
                'Á' | 'À' | 'Â' | 'Ä' | 'Ã' | 'Å' => Some('A'),
                'é' | 'è' | 'ê' | 'ë' => Some('e'),
                'É' | 'È' | 'Ê' | 'Ë' => Some('E'),
                'í' | 'ì' | 'î' | 'ï' => Some('i'),
                'Í' | 'Ì' | 'Î' | 'Ï' => Some('I'),
                'ó' | 'ò' | 'ô' | 'ö' | 'õ' => Some('o'),
                'Ó' | 'Ò' | 'Ô' | 'Ö' | 'Õ' => Some('O'),
                'ú' | 'ù' | 'û' | 'ü' => Some('u'),
                'Ú' | 'Ù' | 'Û' | 'Ü' => Some('U'),
                'ñ' => Some('n'),
                'Ñ' => Some('N'),
                'ç' => Some('c'),
                'Ç' => Some('C'),
                'ý' | 'ÿ' => Some('y'),
                _ => None,
            }
        })
        .collect()
}

impl TitleClassifier {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let trade_re = Regex::new(&normalize_pattern(&config.trade_title_pattern))
            .map_err(|e| anyhow::anyhow!("Invalid trade title pattern: {}", e))?;
        let strict_re = match &config.strict_title_pattern {
            Some(pattern) => Some(
                Regex::new(&normalize_pattern(pattern))
                    .map_err(|e| anyhow::anyhow!("Invalid strict title pattern: {}", e))?,
            ),
            None => None,
        };
        let info_re = Regex::new(&normalize_pattern(&config.info_title_pattern))
            .map_err(|e| anyhow::anyhow!("Invalid info title pattern: {}", e))?;
        Ok(TitleClassifier {
            trade_re,
            strict_re,
            info_re,
        })
    }

    /// Classify a raw title. The strict gate, when configured, runs after
    /// the loose trade pattern matched but before field extraction, so
    /// moderators can tighten enforcement without touching the extraction
    /// regex.
    pub fn classify(&self, title: &str) -> TitleClass {
        let title = canonicalize_title(title);

        if let Some(caps) = self.trade_re.captures(&title) {
            if let Some(strict) = &self.strict_re {
                if !strict.is_match(&title) {
                    log::debug!("Title passed loose pattern but failed strict gate: {title}");
                    return TitleClass::Unclassified;
                }
            }
            return TitleClass::Personal {
                location: caps[1].trim().to_string(),
                have: caps[2].trim().to_string(),
                want: caps[3].trim().to_string(),
            };
        }

        if let Some(caps) = self.info_re.captures(&title) {
            return TitleClass::Informational {
                tag: caps[1].trim().to_string(),
            };
        }

        TitleClass::Unclassified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn classifier() -> TitleClassifier {
        TitleClassifier::new(&Config::default()).unwrap()
    }

    #[test]
    fn test_personal_title_extraction() {
        let class = classifier().classify("[US-NY] [H] Paypal [W] headphones");
        assert_eq!(
            class,
            TitleClass::Personal {
                location: "US-NY".to_string(),
                have: "Paypal".to_string(),
                want: "headphones".to_string(),
            }
        );
    }

    #[test]
    fn test_informational_title_extraction() {
        let class = classifier().classify("[META] State of the forum");
        assert_eq!(
            class,
            TitleClass::Informational {
                tag: "META".to_string()
            }
        );
    }

    #[test]
    fn test_unparseable_title() {
        assert_eq!(classifier().classify("selling some stuff"), TitleClass::Unclassified);
    }

    #[test]
    fn test_decorative_unicode_does_not_break_matching() {
        // Zero-width space after the location bracket, accented have field
        let class = classifier().classify("[US-CA]\u{200b} [H] Café gift card [W] SSD");
        assert_eq!(
            class,
            TitleClass::Personal {
                location: "US-CA".to_string(),
                have: "Cafe gift card".to_string(),
                want: "SSD".to_string(),
            }
        );
    }

    #[test]
    fn test_strict_gate_rejects_before_extraction() {
        let mut config = Config::default();
        // Require a full secondary code in the location
        config.strict_title_pattern =
            Some(r"^\[[A-Z]{2}-[A-Z0-9]{1,3}\]\s*\[H\].*\[W\].*$".to_string());
        let classifier = TitleClassifier::new(&config).unwrap();

        assert_eq!(
            classifier.classify("[US] [H] Paypal [W] headphones"),
            TitleClass::Unclassified
        );
        assert!(matches!(
            classifier.classify("[US-NY] [H] Paypal [W] headphones"),
            TitleClass::Personal { .. }
        ));
    }

    #[test]
    fn test_canonicalize_strips_non_ascii() {
        assert_eq!(canonicalize_title("héllo 🎉 wörld"), "hello world");
        assert_eq!(canonicalize_title("plain"), "plain");
    }
}
