//! Subject patterns.
//!
//! Subjects are dot-separated tokens (`channels.insertNewChannel`). In a
//! pattern, `*` matches exactly one token and a trailing `>` matches one or
//! more tokens.

use crate::error::{RelayError, Result};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Literal(String),
    Single,
    Tail,
}

/// A parsed subscription pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubjectPattern {
    raw: String,
    tokens: Vec<Token>,
}

impl SubjectPattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(RelayError::InvalidConfig("empty subject pattern".into()));
        }

        let parts: Vec<&str> = pattern.split('.').collect();
        let mut tokens = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let token = match *part {
                "" => {
                    return Err(RelayError::InvalidConfig(format!(
                        "empty token in subject pattern {pattern:?}"
                    )))
                }
                "*" => Token::Single,
                ">" if i + 1 == parts.len() => Token::Tail,
                ">" => {
                    return Err(RelayError::InvalidConfig(format!(
                        "'>' must be the last token in {pattern:?}"
                    )))
                }
                literal => Token::Literal(literal.to_string()),
            };
            tokens.push(token);
        }

        Ok(Self {
            raw: pattern.to_string(),
            tokens,
        })
    }

    pub fn matches(&self, subject: &str) -> bool {
        let mut parts = subject.split('.');
        for token in &self.tokens {
            match token {
                Token::Tail => return parts.next().is_some(),
                Token::Single => {
                    if parts.next().map_or(true, str::is_empty) {
                        return false;
                    }
                }
                Token::Literal(lit) => {
                    if parts.next() != Some(lit.as_str()) {
                        return false;
                    }
                }
            }
        }
        parts.next().is_none()
    }

    /// Whether every subject in `subjects` is matched.
    pub fn covers<S: AsRef<str>>(&self, subjects: &[S]) -> bool {
        subjects.iter().all(|s| self.matches(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for SubjectPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_match() {
        let p = SubjectPattern::parse("channels.insertNewChannel").unwrap();
        assert!(p.matches("channels.insertNewChannel"));
        assert!(!p.matches("channels.insertUpdateChannel"));
        assert!(!p.matches("channels"));
        assert!(!p.matches("channels.insertNewChannel.extra"));
    }

    #[test]
    fn test_single_wildcard() {
        let p = SubjectPattern::parse("channels.*").unwrap();
        assert!(p.matches("channels.insertNewChannel"));
        assert!(p.matches("channels.insertUpdateChannel"));
        assert!(!p.matches("channels"));
        assert!(!p.matches("channels.a.b"));
        assert!(!p.matches("other.insertNewChannel"));
    }

    #[test]
    fn test_tail_wildcard() {
        let p = SubjectPattern::parse("channels.>").unwrap();
        assert!(p.matches("channels.a"));
        assert!(p.matches("channels.a.b"));
        assert!(!p.matches("channels"));
    }

    #[test]
    fn test_covers() {
        let subjects = ["channels.insertNewChannel", "channels.insertUpdateChannel"];
        assert!(SubjectPattern::parse("channels.*").unwrap().covers(&subjects));
        assert!(!SubjectPattern::parse("channels.insertNewChannel").unwrap().covers(&subjects));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(SubjectPattern::parse("").is_err());
        assert!(SubjectPattern::parse("channels..x").is_err());
        assert!(SubjectPattern::parse("channels.>.x").is_err());
    }
}
