//! Pattern-based PII detection and redaction.
//!
//! Only high-confidence structured identifiers are covered: email, phone,
//! SSN, credit card and IPv4. Categories are always applied in the fixed
//! order of [`PiiCategory::ALL`]; a later category may scan text that
//! already contains redaction tokens, which never match any pattern.

use std::collections::BTreeSet;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use comply_stats::{Component, StatsHandle};

/// Replacement for every redacted match.
pub const REDACTION_TOKEN: &str = "[REDACTED]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiCategory {
    Email,
    Phone,
    Ssn,
    CreditCard,
    IpAddress,
}

impl PiiCategory {
    /// Masking order.
    pub const ALL: [PiiCategory; 5] = [
        Self::Email,
        Self::Phone,
        Self::Ssn,
        Self::CreditCard,
        Self::IpAddress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Ssn => "ssn",
            Self::CreditCard => "credit_card",
            Self::IpAddress => "ip_address",
        }
    }

    fn pattern(&self) -> &'static str {
        match self {
            Self::Email => r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
            // (555) 123-4567, 555-123-4567, 555.123.4567, +1 555 123 4567
            Self::Phone => r"(?:\+?1[-.\s]?)?(?:\(\d{3}\)|\b\d{3})[-.\s]?\d{3}[-.\s]?\d{4}\b",
            Self::Ssn => r"\b\d{3}-\d{2}-\d{4}\b",
            // 16 digits, optionally grouped by 4 with spaces or dashes
            Self::CreditCard => r"\b(?:\d{4}[-\s]?){3}\d{4}\b",
            Self::IpAddress => {
                r"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\b"
            }
        }
    }
}

impl std::fmt::Display for PiiCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PiiCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "email" => Ok(Self::Email),
            "phone" => Ok(Self::Phone),
            "ssn" => Ok(Self::Ssn),
            "credit_card" | "creditcard" => Ok(Self::CreditCard),
            "ip_address" | "ipv4" | "ip" => Ok(Self::IpAddress),
            other => Err(format!("unknown PII category: {other}")),
        }
    }
}

/// Result of [`PiiDetector::scan_and_log`].
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PiiScan {
    pub has_pii: bool,
    pub pii_count: usize,
    pub types_found: BTreeSet<PiiCategory>,
}

/// Stateless detector over the fixed pattern set.
#[derive(Clone)]
pub struct PiiDetector {
    patterns: Vec<(PiiCategory, Regex)>,
    stats: Option<StatsHandle>,
}

impl Default for PiiDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PiiDetector {
    pub fn new() -> Self {
        // The patterns are constants covered by tests.
        let patterns = PiiCategory::ALL
            .iter()
            .map(|c| (*c, Regex::new(c.pattern()).expect("Invalid built-in PII pattern")))
            .collect();

        Self {
            patterns,
            stats: None,
        }
    }

    pub fn with_stats(mut self, stats: StatsHandle) -> Self {
        self.stats = Some(stats);
        self
    }

    /// True if any category matches. Stops at the first match.
    pub fn contains_pii(&self, text: &str) -> bool {
        self.contains_pii_in(text, &PiiCategory::ALL)
    }

    /// True if any of `categories` matches.
    pub fn contains_pii_in(&self, text: &str, categories: &[PiiCategory]) -> bool {
        self.record();
        self.selected(categories).any(|re| re.is_match(text))
    }

    /// Count matches per category and log a summary (never the text).
    pub fn scan_and_log(&self, text: &str) -> PiiScan {
        self.record();

        let mut scan = PiiScan::default();
        for (category, re) in &self.patterns {
            let count = re.find_iter(text).count();
            if count > 0 {
                scan.pii_count += count;
                scan.types_found.insert(*category);
            }
        }
        scan.has_pii = scan.pii_count > 0;

        if scan.has_pii {
            let types: Vec<&str> = scan.types_found.iter().map(|c| c.as_str()).collect();
            tracing::warn!(
                pii_count = scan.pii_count,
                types = ?types,
                "PII detected in text"
            );
        } else {
            tracing::debug!("No PII detected");
        }

        scan
    }

    fn selected<'a>(
        &'a self,
        categories: &'a [PiiCategory],
    ) -> impl Iterator<Item = &'a Regex> + 'a {
        self.patterns
            .iter()
            .filter(move |(c, _)| categories.contains(c))
            .map(|(_, re)| re)
    }

    fn record(&self) {
        if let Some(stats) = &self.stats {
            stats.record(Component::Pii, false);
        }
    }
}

/// Redacts PII by replacing every match with [`REDACTION_TOKEN`].
#[derive(Clone, Default)]
pub struct PiiMasker {
    detector: PiiDetector,
}

impl PiiMasker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detector(detector: PiiDetector) -> Self {
        Self { detector }
    }

    pub fn detector(&self) -> &PiiDetector {
        &self.detector
    }

    /// Redact every category.
    pub fn mask_text(&self, text: &str) -> String {
        self.mask_text_in(text, &PiiCategory::ALL)
    }

    /// Redact only `categories`, still in the fixed category order.
    pub fn mask_text_in(&self, text: &str, categories: &[PiiCategory]) -> String {
        self.detector.record();

        let mut masked = text.to_string();
        for re in self.detector.selected(categories) {
            if re.is_match(&masked) {
                masked = re.replace_all(&masked, REDACTION_TOKEN).into_owned();
            }
        }
        masked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<(PiiCategory, &'static str)> {
        vec![
            (PiiCategory::Email, "john.doe@example.com"),
            (PiiCategory::Email, "ops+alerts@sub.corp.io"),
            (PiiCategory::Phone, "555-123-4567"),
            (PiiCategory::Phone, "(555) 123-4567"),
            (PiiCategory::Phone, "+1 555 123 4567"),
            (PiiCategory::Ssn, "123-45-6789"),
            (PiiCategory::CreditCard, "4111 1111 1111 1111"),
            (PiiCategory::CreditCard, "4111-1111-1111-1111"),
            (PiiCategory::CreditCard, "4111111111111111"),
            (PiiCategory::IpAddress, "192.168.1.10"),
            (PiiCategory::IpAddress, "8.8.8.8"),
        ]
    }

    #[test]
    fn detects_each_category() {
        let detector = PiiDetector::new();
        for (category, token) in samples() {
            let text = format!("value: {token} end");
            assert!(
                detector.contains_pii_in(&text, &[category]),
                "{category} not detected in {text:?}"
            );
        }
    }

    #[test]
    fn masking_removes_every_category() {
        let masker = PiiMasker::new();
        for (category, token) in samples() {
            let text = format!("before {token} after");
            let masked = masker.mask_text(&text);
            assert!(!masked.contains(token), "{category}: {masked}");
            assert!(
                !masker.detector().contains_pii_in(&masked, &[category]),
                "{category} survived: {masked}"
            );
            assert!(masked.contains(REDACTION_TOKEN));
        }
    }

    #[test]
    fn email_example() {
        let masked = PiiMasker::new().mask_text("Contact me at john.doe@example.com for details");
        assert!(masked.contains("[REDACTED]"));
        assert!(!masked.contains("john.doe@example.com"));
        assert_eq!(masked, "Contact me at [REDACTED] for details");
    }

    #[test]
    fn restricted_masking_leaves_other_categories() {
        let masker = PiiMasker::new();
        let text = "mail a@b.com from 10.0.0.1";
        let masked = masker.mask_text_in(text, &[PiiCategory::Email]);
        assert_eq!(masked, "mail [REDACTED] from 10.0.0.1");
        assert_eq!(masker.mask_text_in(text, &[]), text);
    }

    #[test]
    fn redaction_token_matches_nothing() {
        let detector = PiiDetector::new();
        assert!(!detector.contains_pii(REDACTION_TOKEN));
    }

    #[test]
    fn clean_text_is_untouched() {
        let masker = PiiMasker::new();
        let text = "The build finished in 42 seconds with version 1.2.3";
        assert!(!masker.detector().contains_pii(text));
        assert_eq!(masker.mask_text(text), text);
    }

    #[test]
    fn scan_counts_and_types() {
        let detector = PiiDetector::new();
        let scan = detector.scan_and_log(
            "a@b.com, c@d.org, SSN 123-45-6789, host 172.16.0.4, nothing else",
        );
        assert!(scan.has_pii);
        assert_eq!(scan.pii_count, 4);
        assert_eq!(
            scan.types_found,
            BTreeSet::from([PiiCategory::Email, PiiCategory::Ssn, PiiCategory::IpAddress])
        );

        let clean = detector.scan_and_log("nothing to see");
        assert_eq!(clean, PiiScan::default());
    }

    #[test]
    fn category_names_round_trip() {
        for category in PiiCategory::ALL {
            assert_eq!(category.as_str().parse::<PiiCategory>().unwrap(), category);
        }
        assert!("passport".parse::<PiiCategory>().is_err());
    }
}
