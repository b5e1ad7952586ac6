//! MQTT topic names and subscription filters.
//!
//! A [`Topic`] is a concrete publish destination such as `site/line-3/temp`.
//! A [`TopicFilter`] is a subscription pattern that may use the two MQTT
//! wildcards:
//! - `+` matches exactly one level
//! - `#` matches zero or more trailing levels and must be the last level
//!
//! Filters starting with a wildcard never match topics starting with `$`.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

/// Maximum encoded length of a topic or filter in MQTT 3.1.1.
pub const MAX_TOPIC_LEN: usize = 65_535;

/// Level separator.
pub const SEPARATOR: char = '/';

/// A concrete topic name, valid as a publish destination.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Topic(String);

impl Topic {
    /// Parse a topic name.
    ///
    /// # Errors
    ///
    /// Returns error if the name is empty, too long, or contains a wildcard
    /// or NUL character.
    pub fn parse(value: impl Into<String>) -> Result<Self, TopicError> {
        let value = value.into();
        check_common(&value)?;
        if value.contains(['+', '#']) {
            return Err(TopicError::Wildcard(value));
        }
        Ok(Self(value))
    }

    /// Append one or more levels below this topic.
    ///
    /// # Errors
    ///
    /// Returns error if the resulting name is not a valid topic.
    pub fn join(&self, suffix: &str) -> Result<Self, TopicError> {
        Self::parse(format!("{}{SEPARATOR}{suffix}", self.0))
    }

    /// Borrow the topic as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Topic {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Topic {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A subscription filter, possibly containing wildcards.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopicFilter(String);

impl TopicFilter {
    /// Parse a subscription filter.
    ///
    /// # Errors
    ///
    /// Returns error if a wildcard does not occupy a whole level, or `#` is
    /// not the last level.
    pub fn parse(value: impl Into<String>) -> Result<Self, TopicError> {
        let value = value.into();
        check_common(&value)?;

        let mut levels = value.split(SEPARATOR).peekable();
        while let Some(level) = levels.next() {
            if level.contains('#') && (level != "#" || levels.peek().is_some()) {
                return Err(TopicError::InvalidFilter {
                    filter: value.clone(),
                    reason: "'#' must be the whole last level",
                });
            }
            if level.contains('+') && level != "+" {
                return Err(TopicError::InvalidFilter {
                    filter: value.clone(),
                    reason: "'+' must be a whole level",
                });
            }
        }

        Ok(Self(value))
    }

    /// Filter matching exactly one topic.
    #[must_use]
    pub fn exact(topic: &Topic) -> Self {
        Self(topic.0.clone())
    }

    /// Filter matching every topic strictly below `topic`, and `topic` itself.
    #[must_use]
    pub fn subtree(topic: &Topic) -> Self {
        Self(format!("{}{SEPARATOR}#", topic.0))
    }

    /// Borrow the filter as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether a concrete topic name matches this filter.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        if topic.starts_with('$') && self.0.starts_with(['+', '#']) {
            return false;
        }

        let mut filter_levels = self.0.split(SEPARATOR);
        let mut topic_levels = topic.split(SEPARATOR);
        loop {
            match (filter_levels.next(), topic_levels.next()) {
                (Some("#"), _) | (None, None) => return true,
                (Some("+"), Some(_)) => {}
                (Some(expected), Some(actual)) if expected == actual => {}
                _ => return false,
            }
        }
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TopicFilter {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<&Topic> for TopicFilter {
    fn from(topic: &Topic) -> Self {
        Self::exact(topic)
    }
}

fn check_common(value: &str) -> Result<(), TopicError> {
    if value.is_empty() {
        return Err(TopicError::Empty);
    }
    if value.len() > MAX_TOPIC_LEN {
        return Err(TopicError::TooLong(value.len()));
    }
    if value.contains('\0') {
        return Err(TopicError::NulCharacter(value.to_string()));
    }
    Ok(())
}

/// Errors for topic and filter validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    /// Empty name
    #[error("topic must not be empty")]
    Empty,
    /// Longer than the protocol allows
    #[error("topic is {0} bytes, limit is 65535")]
    TooLong(usize),
    /// Contains a NUL character
    #[error("topic contains NUL: {0:?}")]
    NulCharacter(String),
    /// Wildcard in a publish destination
    #[error("topic name must not contain wildcards: {0}")]
    Wildcard(String),
    /// Malformed filter
    #[error("invalid topic filter {filter}: {reason}")]
    InvalidFilter {
        /// The rejected filter
        filter: String,
        /// What is wrong with it
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn filter(s: &str) -> TopicFilter {
        TopicFilter::parse(s).unwrap()
    }

    #[test]
    fn topic_validation() {
        assert!(Topic::parse("a/b/c").is_ok());
        assert!(Topic::parse("/leading").is_ok());
        assert_eq!(Topic::parse(""), Err(TopicError::Empty));
        assert!(matches!(Topic::parse("a/+/c"), Err(TopicError::Wildcard(_))));
        assert!(matches!(Topic::parse("a/#"), Err(TopicError::Wildcard(_))));
        assert!(matches!(
            Topic::parse("a\0b"),
            Err(TopicError::NulCharacter(_))
        ));
    }

    #[test]
    fn topic_join() {
        let base = Topic::parse("plant").unwrap();
        assert_eq!(base.join("pollute/x/y").unwrap().as_str(), "plant/pollute/x/y");
        assert!(base.join("#").is_err());
    }

    #[test]
    fn filter_validation() {
        assert!(TopicFilter::parse("a/+/c").is_ok());
        assert!(TopicFilter::parse("#").is_ok());
        assert!(TopicFilter::parse("+/+").is_ok());
        assert!(TopicFilter::parse("a/#/c").is_err());
        assert!(TopicFilter::parse("a/b#").is_err());
        assert!(TopicFilter::parse("a/b+/c").is_err());
        assert!(TopicFilter::parse("").is_err());
    }

    #[test]
    fn subtree_and_exact() {
        let base = Topic::parse("a").unwrap();
        assert_eq!(TopicFilter::subtree(&base).as_str(), "a/#");
        assert_eq!(TopicFilter::exact(&base).as_str(), "a");
    }

    #[test]
    fn multi_level_wildcard_matching() {
        let f = filter("a/#");
        assert!(f.matches("a"));
        assert!(f.matches("a/x"));
        assert!(f.matches("a/y/z"));
        assert!(!f.matches("ab"));
        assert!(!f.matches("b/a"));
    }

    #[test]
    fn single_level_wildcard_matching() {
        let f = filter("a/+/c");
        assert!(f.matches("a/b/c"));
        assert!(f.matches("a//c"));
        assert!(!f.matches("a/b/d"));
        assert!(!f.matches("a/b/c/d"));
        assert!(!filter("a/+").matches("a"));
    }

    #[test]
    fn dollar_topics_hidden_from_leading_wildcards() {
        assert!(!filter("#").matches("$SYS/broker/uptime"));
        assert!(!filter("+/broker/uptime").matches("$SYS/broker/uptime"));
        assert!(filter("$SYS/#").matches("$SYS/broker/uptime"));
    }

    fn arb_level() -> impl Strategy<Value = String> {
        "[a-z0-9]{1,6}"
    }

    proptest! {
        #[test]
        fn exact_filter_matches_only_itself(
            levels in prop::collection::vec(arb_level(), 1..5),
            other in prop::collection::vec(arb_level(), 1..5),
        ) {
            let topic = Topic::parse(levels.join("/")).unwrap();
            let f = TopicFilter::exact(&topic);
            prop_assert!(f.matches(topic.as_str()));
            prop_assert_eq!(f.matches(&other.join("/")), other == levels);
        }

        #[test]
        fn subtree_matches_all_descendants(
            base in prop::collection::vec(arb_level(), 1..4),
            suffix in prop::collection::vec(arb_level(), 0..4),
        ) {
            let base_topic = Topic::parse(base.join("/")).unwrap();
            let mut full = base.clone();
            full.extend(suffix);
            prop_assert!(TopicFilter::subtree(&base_topic).matches(&full.join("/")));
        }
    }
}
