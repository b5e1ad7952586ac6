//! In-process broker implementing [`BrokerSession`].
//!
//! Keeps a retained store and a subscription table with MQTT semantics:
//! a new subscription receives every matching retained message with the
//! retained flag set, live publishes reach current subscribers with the flag
//! cleared, and a retained publish with an empty payload erases the stored
//! copy. Failure injection hooks let tests exercise retry and reporting
//! paths without a network.

use crate::session::{BrokerSession, Delivery, DeliveryHandler, QoS, SessionError};
use crate::topics::{Topic, TopicFilter};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A request observed by the [`MemoryBroker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Publish request, successful or not
    Publish {
        /// Destination
        topic: String,
        /// Retain flag
        retain: bool,
        /// Body length
        payload_len: usize,
    },
    /// Subscribe request
    Subscribe(String),
    /// Unsubscribe request
    Unsubscribe(String),
}

struct Route {
    filter: TopicFilter,
    handler: DeliveryHandler,
}

#[derive(Default)]
struct State {
    retained: BTreeMap<String, Vec<u8>>,
    routes: Vec<Route>,
    publish_failures: HashMap<String, usize>,
    rejected_filters: HashSet<String>,
    pinned: HashSet<String>,
    operations: Vec<Operation>,
    disconnected: bool,
}

/// In-process broker with a retained message store.
#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<State>,
}

impl MemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a retained message without notifying subscribers.
    pub fn seed_retained(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        self.state().retained.insert(topic.to_string(), payload.into());
    }

    /// Make the next `times` publishes to `topic` fail.
    pub fn fail_publishes(&self, topic: &str, times: usize) {
        self.state()
            .publish_failures
            .insert(topic.to_string(), times);
    }

    /// Refuse subscriptions to exactly `filter`.
    pub fn reject_subscription(&self, filter: &str) {
        self.state().rejected_filters.insert(filter.to_string());
    }

    /// Keep the retained copy on `topic` even when an empty payload is
    /// published to it, as a broker with a deny rule would.
    pub fn pin_retained(&self, topic: &str) {
        self.state().pinned.insert(topic.to_string());
    }

    /// Topics currently holding a retained message, sorted.
    #[must_use]
    pub fn retained_topics(&self) -> Vec<String> {
        self.state().retained.keys().cloned().collect()
    }

    /// Retained payload stored on `topic`.
    #[must_use]
    pub fn retained_payload(&self, topic: &str) -> Option<Vec<u8>> {
        self.state().retained.get(topic).cloned()
    }

    /// Every request seen so far, in arrival order.
    #[must_use]
    pub fn operations(&self) -> Vec<Operation> {
        self.state().operations.clone()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.state().routes.len()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BrokerSession for MemoryBroker {
    async fn publish(
        &self,
        topic: &Topic,
        _qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), SessionError> {
        let targets = {
            let mut state = self.state();
            state.operations.push(Operation::Publish {
                topic: topic.to_string(),
                retain,
                payload_len: payload.len(),
            });

            if state.disconnected {
                return Err(SessionError::Disconnected);
            }

            if let Some(remaining) = state.publish_failures.get_mut(topic.as_str()) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(SessionError::Publish(format!(
                        "injected failure on {topic}"
                    )));
                }
            }

            if retain {
                if payload.is_empty() {
                    if !state.pinned.contains(topic.as_str()) {
                        state.retained.remove(topic.as_str());
                    }
                } else {
                    state
                        .retained
                        .insert(topic.to_string(), payload.clone());
                }
            }

            matching_handlers(&state.routes, topic.as_str())
        };

        let delivery = Delivery {
            topic: topic.to_string(),
            payload,
            retained: false,
        };
        for handler in targets {
            handler(&delivery);
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        filter: &TopicFilter,
        _qos: QoS,
        handler: DeliveryHandler,
    ) -> Result<(), SessionError> {
        let replay: Vec<Delivery> = {
            let mut state = self.state();
            state
                .operations
                .push(Operation::Subscribe(filter.to_string()));

            if state.disconnected {
                return Err(SessionError::Disconnected);
            }
            if state.rejected_filters.contains(filter.as_str()) {
                return Err(SessionError::Rejected(format!(
                    "subscription to {filter} refused"
                )));
            }

            state.routes.push(Route {
                filter: filter.clone(),
                handler: handler.clone(),
            });

            state
                .retained
                .iter()
                .filter(|(topic, _)| filter.matches(topic))
                .map(|(topic, payload)| Delivery {
                    topic: topic.clone(),
                    payload: payload.clone(),
                    retained: true,
                })
                .collect()
        };

        for delivery in &replay {
            handler(delivery);
        }

        Ok(())
    }

    async fn unsubscribe(&self, filters: &[TopicFilter]) -> Result<(), SessionError> {
        let mut state = self.state();
        for filter in filters {
            state
                .operations
                .push(Operation::Unsubscribe(filter.to_string()));
        }
        if state.disconnected {
            return Err(SessionError::Disconnected);
        }
        state.routes.retain(|route| !filters.contains(&route.filter));
        Ok(())
    }

    async fn disconnect(&self, _grace: Duration) {
        let mut state = self.state();
        state.disconnected = true;
        state.routes.clear();
    }
}

fn matching_handlers(routes: &[Route], topic: &str) -> Vec<DeliveryHandler> {
    routes
        .iter()
        .filter(|route| route.filter.matches(topic))
        .map(|route| route.handler.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn topic(s: &str) -> Topic {
        Topic::parse(s).unwrap()
    }

    fn recorder() -> (DeliveryHandler, Arc<Mutex<Vec<Delivery>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: DeliveryHandler = Arc::new(move |d: &Delivery| {
            sink.lock().unwrap().push(d.clone());
        });
        (handler, seen)
    }

    #[tokio::test]
    async fn subscribe_replays_retained_with_flag() {
        let broker = MemoryBroker::new();
        broker.seed_retained("a/x", "1");
        broker.seed_retained("a/y/z", "2");
        broker.seed_retained("b", "3");

        let (handler, seen) = recorder();
        broker
            .subscribe(&TopicFilter::parse("a/#").unwrap(), QoS::AtMostOnce, handler)
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        let topics: Vec<_> = seen.iter().map(|d| d.topic.as_str()).collect();
        assert_eq!(topics, vec!["a/x", "a/y/z"]);
        assert!(seen.iter().all(|d| d.retained));
    }

    #[tokio::test]
    async fn live_publish_is_not_flagged_retained() {
        let broker = MemoryBroker::new();
        let (handler, seen) = recorder();
        broker
            .subscribe(&TopicFilter::parse("a/+").unwrap(), QoS::AtMostOnce, handler)
            .await
            .unwrap();

        broker
            .publish(&topic("a/b"), QoS::AtMostOnce, true, b"v".to_vec())
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(!seen[0].retained);
        assert_eq!(broker.retained_payload("a/b"), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn empty_retained_publish_erases() {
        let broker = MemoryBroker::new();
        broker.seed_retained("a/x", "1");
        broker
            .publish(&topic("a/x"), QoS::AtLeastOnce, true, Vec::new())
            .await
            .unwrap();
        assert!(broker.retained_topics().is_empty());
    }

    #[tokio::test]
    async fn pinned_topic_survives_erase() {
        let broker = MemoryBroker::new();
        broker.seed_retained("a/x", "1");
        broker.pin_retained("a/x");
        broker
            .publish(&topic("a/x"), QoS::AtLeastOnce, true, Vec::new())
            .await
            .unwrap();
        assert_eq!(broker.retained_topics(), vec!["a/x".to_string()]);
    }

    #[tokio::test]
    async fn injected_failures_run_out() {
        let broker = MemoryBroker::new();
        broker.fail_publishes("a/x", 1);
        let t = topic("a/x");
        assert!(broker.publish(&t, QoS::AtMostOnce, false, vec![1]).await.is_err());
        assert!(broker.publish(&t, QoS::AtMostOnce, false, vec![1]).await.is_ok());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let broker = MemoryBroker::new();
        let filter = TopicFilter::parse("a/#").unwrap();
        let (handler, seen) = recorder();
        broker
            .subscribe(&filter, QoS::AtMostOnce, handler)
            .await
            .unwrap();
        broker.unsubscribe(&[filter]).await.unwrap();
        assert_eq!(broker.subscription_count(), 0);

        broker
            .publish(&topic("a/b"), QoS::AtMostOnce, false, vec![1])
            .await
            .unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_and_disconnected() {
        let broker = MemoryBroker::new();
        broker.reject_subscription("secret/#");
        let (handler, _) = recorder();
        let err = broker
            .subscribe(
                &TopicFilter::parse("secret/#").unwrap(),
                QoS::AtMostOnce,
                handler,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Rejected(_)));

        broker.disconnect(Duration::ZERO).await;
        let err = broker
            .publish(&topic("a"), QoS::AtMostOnce, false, Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::Disconnected);
    }
}
