//! Retained-set collection.
//!
//! The broker has no "list retained" request. Instead, every new subscription
//! is answered with the retained messages matching its filter, flagged as
//! retained. A collection window subscribes, lets the broker replay for a
//! fixed wall-clock interval, unsubscribes, and only then reads what the
//! delivery callback accumulated.
//!
//! The window is a proxy for "replay finished". MQTT 3.1.1 has no
//! end-of-replay marker, so a window shorter than the broker's replay latency
//! silently under-reports.

use crate::session::{BrokerSession, Delivery, DeliveryHandler, QoS, SessionError};
use crate::topics::{Topic, TopicFilter};
use std::collections::btree_set;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Topics observed carrying a retained message.
///
/// Inserting an already present topic is a no-op. Iteration is sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredSet(BTreeSet<Topic>);

impl DiscoveredSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a topic. Returns `false` if it was already present.
    pub fn insert(&mut self, topic: Topic) -> bool {
        self.0.insert(topic)
    }

    /// Whether `topic` was observed.
    #[must_use]
    pub fn contains(&self, topic: &str) -> bool {
        self.0.contains(topic)
    }

    /// Number of distinct topics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing was observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in sorted order.
    pub fn iter(&self) -> btree_set::Iter<'_, Topic> {
        self.0.iter()
    }

    /// Copy the topics into a sorted vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Topic> {
        self.0.iter().cloned().collect()
    }
}

impl FromIterator<Topic> for DiscoveredSet {
    fn from_iter<I: IntoIterator<Item = Topic>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for DiscoveredSet {
    type Item = Topic;
    type IntoIter = btree_set::IntoIter<Topic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a DiscoveredSet {
    type Item = &'a Topic;
    type IntoIter = btree_set::Iter<'a, Topic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Which request of a collection window failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStage {
    /// Opening the subscription
    Subscribe,
    /// Tearing it down
    Unsubscribe,
}

/// A subscribe or unsubscribe that did not go through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterFailure {
    /// Filter the request was for
    pub filter: TopicFilter,
    /// Failing request
    pub stage: FilterStage,
    /// Cause
    pub error: SessionError,
}

/// Result of one collection window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Collection {
    /// Topics seen with the retained flag
    pub topics: DiscoveredSet,
    /// Requests that failed; the window still ran for the others
    pub failures: Vec<FilterFailure>,
}

impl Collection {
    /// Error returned when subscribing to `filter`, if it failed.
    #[must_use]
    pub fn subscribe_error(&self, filter: &TopicFilter) -> Option<&SessionError> {
        self.failures
            .iter()
            .find(|f| f.stage == FilterStage::Subscribe && &f.filter == filter)
            .map(|f| &f.error)
    }
}

/// Collects retained topics through a bounded subscription window.
pub struct Collector<'a, S> {
    session: &'a S,
    qos: QoS,
    window: Duration,
}

impl<'a, S: BrokerSession> Collector<'a, S> {
    /// Create a collector that keeps its subscriptions open for `window`.
    #[must_use]
    pub fn new(session: &'a S, qos: QoS, window: Duration) -> Self {
        Self {
            session,
            qos,
            window,
        }
    }

    /// Discover every retained topic at or below `base`.
    pub async fn discover(&self, base: &Topic) -> Collection {
        tracing::info!(topic = %base, window = ?self.window, "Collecting retained topics");
        self.collect(&[TopicFilter::exact(base), TopicFilter::subtree(base)])
            .await
    }

    /// Observe exactly the given topics, one subscription each.
    pub async fn observe(&self, topics: &[Topic]) -> Collection {
        let filters: Vec<TopicFilter> = topics.iter().map(TopicFilter::exact).collect();
        self.collect(&filters).await
    }

    /// Run one window over `filters`.
    ///
    /// The accumulator is read only after the unsubscribe has resolved.
    pub async fn collect(&self, filters: &[TopicFilter]) -> Collection {
        let found = Arc::new(Mutex::new(DiscoveredSet::new()));
        let handler = retained_sink(found.clone());

        let mut failures = Vec::new();
        let mut active = Vec::with_capacity(filters.len());
        for filter in filters {
            match self.session.subscribe(filter, self.qos, handler.clone()).await {
                Ok(()) => active.push(filter.clone()),
                Err(error) => {
                    tracing::warn!(filter = %filter, error = %error, "Subscribe failed");
                    failures.push(FilterFailure {
                        filter: filter.clone(),
                        stage: FilterStage::Subscribe,
                        error,
                    });
                }
            }
        }

        if active.is_empty() {
            return Collection {
                topics: DiscoveredSet::new(),
                failures,
            };
        }

        tokio::time::sleep(self.window).await;

        if let Err(error) = self.session.unsubscribe(&active).await {
            tracing::warn!(error = %error, filters = active.len(), "Unsubscribe failed");
            failures.extend(active.iter().map(|filter| FilterFailure {
                filter: filter.clone(),
                stage: FilterStage::Unsubscribe,
                error: error.clone(),
            }));
        }

        let topics = std::mem::take(&mut *lock(&*found));
        tracing::debug!(count = topics.len(), "Collection window closed");

        Collection { topics, failures }
    }
}

/// Delivery callback that records topics of retained deliveries into `found`.
pub(crate) fn retained_sink(found: Arc<Mutex<DiscoveredSet>>) -> DeliveryHandler {
    Arc::new(move |delivery: &Delivery| {
        if !delivery.retained {
            return;
        }
        match Topic::parse(delivery.topic.as_str()) {
            Ok(topic) => {
                tracing::debug!(topic = %topic, payload_len = delivery.payload.len(), "Retained delivery");
                lock(&*found).insert(topic);
            }
            Err(err) => {
                tracing::warn!(topic = %delivery.topic, error = %err, "Ignoring delivery with invalid topic");
            }
        }
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
