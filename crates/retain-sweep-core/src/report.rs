//! Per-topic result maps.

use crate::topics::Topic;
use std::collections::btree_map;
use std::collections::BTreeMap;

/// Outcome per topic, iterated in topic order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicResults<T>(BTreeMap<Topic, T>);

impl<T> Default for TopicResults<T> {
    fn default() -> Self {
        Self(BTreeMap::new())
    }
}

impl<T> TopicResults<T> {
    /// Create an empty result map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome for `topic`, replacing any earlier one.
    pub fn insert(&mut self, topic: Topic, outcome: T) {
        self.0.insert(topic, outcome);
    }

    /// Outcome recorded for `topic`.
    #[must_use]
    pub fn get(&self, topic: &str) -> Option<&T> {
        self.0.get(topic)
    }

    /// Number of topics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no topic has an outcome.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate `(topic, outcome)` pairs in topic order.
    pub fn iter(&self) -> btree_map::Iter<'_, Topic, T> {
        self.0.iter()
    }

    /// Count outcomes satisfying `predicate`.
    pub fn count(&self, predicate: impl Fn(&T) -> bool) -> usize {
        self.0.values().filter(|outcome| predicate(outcome)).count()
    }
}

impl<'a, T> IntoIterator for &'a TopicResults<T> {
    type Item = (&'a Topic, &'a T);
    type IntoIter = btree_map::Iter<'a, Topic, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<T> FromIterator<(Topic, T)> for TopicResults<T> {
    fn from_iter<I: IntoIterator<Item = (Topic, T)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
