//! Topic names and wildcard patterns.
//!
//! Topics are dot-delimited segments. A pattern segment of exactly `*`
//! matches any single segment; all other segments match literally. Matching
//! is anchored at both ends and never crosses a segment boundary.

use std::fmt;

/// Maximum topic length in bytes.
pub const MAX_TOPIC_LENGTH: usize = 256;

/// Segment separator.
pub const SEPARATOR: char = '.';

/// Single-segment wildcard.
pub const WILDCARD: &str = "*";

/// Validate a topic or pattern.
///
/// # Errors
///
/// Returns an error message if the topic is invalid.
pub fn validate_topic(topic: &str) -> Result<(), &'static str> {
    if topic.is_empty() {
        return Err("Topic cannot be empty");
    }
    if topic.len() > MAX_TOPIC_LENGTH {
        return Err("Topic too long");
    }
    if topic.chars().any(char::is_control) {
        return Err("Topic contains control characters");
    }
    if topic.split(SEPARATOR).any(str::is_empty) {
        return Err("Topic contains an empty segment");
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Any,
}

/// A compiled subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl TopicPattern {
    /// Compile a pattern.
    ///
    /// # Errors
    ///
    /// Returns an error message if the pattern is not a valid topic.
    pub fn parse(pattern: &str) -> Result<Self, &'static str> {
        validate_topic(pattern)?;
        let segments = pattern
            .split(SEPARATOR)
            .map(|s| {
                if s == WILDCARD {
                    Segment::Any
                } else {
                    Segment::Literal(s.to_string())
                }
            })
            .collect();
        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    /// The pattern as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the pattern contains a wildcard segment.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.segments.iter().any(|s| *s == Segment::Any)
    }

    /// Test a published topic against the pattern.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        let mut parts = topic.split(SEPARATOR);
        for segment in &self.segments {
            match (segment, parts.next()) {
                (_, None) => return false,
                (_, Some("")) => return false,
                (Segment::Any, Some(_)) => {}
                (Segment::Literal(lit), Some(part)) => {
                    if lit != part {
                        return false;
                    }
                }
            }
        }
        parts.next().is_none()
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(p: &str) -> TopicPattern {
        TopicPattern::parse(p).unwrap()
    }

    #[test]
    fn test_wildcard_matches_one_segment() {
        let p = pattern("a.*.b");
        assert!(p.matches("a.x.b"));
        assert!(p.matches("a.y.b"));
        assert!(!p.matches("a.b"));
        assert!(!p.matches("a.x.y.b"));
        assert!(!p.matches("x.a.b"));
    }

    #[test]
    fn test_wildcard_is_anchored() {
        let p = pattern("test.*.test");
        assert!(p.matches("test.abc.test"));
        assert!(!p.matches("test.abc.def.test"));
        assert!(!p.matches("pre.test.abc.test"));
        assert!(!p.matches("test.abc.test.post"));
    }

    #[test]
    fn test_literal_pattern() {
        let p = pattern("orders.created");
        assert!(!p.is_wildcard());
        assert!(p.matches("orders.created"));
        assert!(!p.matches("orders.created.eu"));
        assert!(!p.matches("orders"));
    }

    #[test]
    fn test_partial_star_is_literal() {
        let p = pattern("a.b*");
        assert!(!p.is_wildcard());
        assert!(p.matches("a.b*"));
        assert!(!p.matches("a.bc"));
    }

    #[test]
    fn test_leading_and_trailing_wildcards() {
        assert!(pattern("*.log").matches("app.log"));
        assert!(pattern("app.*").matches("app.log"));
        assert!(!pattern("app.*").matches("app"));
        assert!(pattern("*").matches("solo"));
        assert!(!pattern("*").matches("two.parts"));
    }

    #[test]
    fn test_empty_segments_never_match() {
        assert!(!pattern("a.*").matches("a."));
        assert!(!pattern("*.b").matches(".b"));
    }

    #[test]
    fn test_topic_validation() {
        assert!(validate_topic("valid.topic").is_ok());
        assert!(validate_topic("").is_err());
        assert!(validate_topic("a..b").is_err());
        assert!(validate_topic(".a").is_err());
        assert!(validate_topic("bad\ntopic").is_err());

        let long_topic = "a".repeat(MAX_TOPIC_LENGTH + 1);
        assert!(validate_topic(&long_topic).is_err());
    }
}
