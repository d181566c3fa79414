//! Section name patterns.
//!
//! Sections are registered under a literal name or a wildcard-suffixed name
//! like `"wifi*"`. The wildcard is parsed once at registration time into an
//! explicit variant, so dispatch never re-inspects pattern strings.
//!
//! Matching is plain string comparison without regex to keep the hot path
//! allocation-free and cheap on embedded targets.

/// Registration-time marker turning a section name into a prefix match.
pub const WILDCARD: char = '*';

/// A parsed section name pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionPattern {
    /// The full registered name must equal the submitted key.
    Exact(String),
    /// The submitted key must start with the text before the wildcard.
    Prefix(String),
}

impl SectionPattern {
    /// Parse a registered section name.
    ///
    /// Everything up to the first `*` becomes the prefix; a name without a
    /// wildcard matches exactly. `"*"` alone matches any key.
    pub fn parse(name: &str) -> Result<Self, PatternError> {
        if name.is_empty() {
            return Err(PatternError::EmptyPattern);
        }
        match name.find(WILDCARD) {
            Some(i) => Ok(SectionPattern::Prefix(name[..i].to_string())),
            None => Ok(SectionPattern::Exact(name.to_string())),
        }
    }

    /// Check whether a submitted key selects this section.
    pub fn matches(&self, key: &str) -> bool {
        match self {
            SectionPattern::Exact(name) => name == key,
            SectionPattern::Prefix(prefix) => key.starts_with(prefix.as_str()),
        }
    }
}

impl std::fmt::Display for SectionPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SectionPattern::Exact(name) => write!(f, "{}", name),
            SectionPattern::Prefix(prefix) => write!(f, "{}{}", prefix, WILDCARD),
        }
    }
}

/// Errors that can occur when parsing a section pattern.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PatternError {
    #[error("Empty pattern")]
    EmptyPattern,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_pattern() {
        let pattern = SectionPattern::parse("set_time").unwrap();
        assert_eq!(pattern, SectionPattern::Exact("set_time".to_string()));
        assert!(pattern.matches("set_time"));
        assert!(!pattern.matches("set_timezone"));
        assert!(!pattern.matches("set"));
    }

    #[test]
    fn test_prefix_pattern() {
        let pattern = SectionPattern::parse("wifi*").unwrap();
        assert_eq!(pattern, SectionPattern::Prefix("wifi".to_string()));
        assert!(pattern.matches("wifi"));
        assert!(pattern.matches("wifi_set"));
        assert!(pattern.matches("wifi_ap_pass"));
        assert!(!pattern.matches("wif"));
        assert!(!pattern.matches("eth0"));
    }

    #[test]
    fn test_full_wildcard() {
        let pattern = SectionPattern::parse("*").unwrap();
        assert!(pattern.matches("anything"));
        assert!(pattern.matches(""));
    }

    #[test]
    fn test_wildcard_mid_name_ignores_tail() {
        // Only the text before the marker is compared.
        let pattern = SectionPattern::parse("led*_mode").unwrap();
        assert_eq!(pattern, SectionPattern::Prefix("led".to_string()));
        assert!(pattern.matches("led42"));
    }

    #[test]
    fn test_empty_pattern_is_an_error() {
        assert!(matches!(
            SectionPattern::parse(""),
            Err(PatternError::EmptyPattern)
        ));
    }

    #[test]
    fn test_display_round_trip() {
        assert_eq!(SectionPattern::parse("wifi*").unwrap().to_string(), "wifi*");
        assert_eq!(
            SectionPattern::parse("settings").unwrap().to_string(),
            "settings"
        );
    }
}
