//! Clearing of retained messages.
//!
//! A retained message is erased by publishing a zero-length payload with the
//! retain flag set. Topics are cleared one at a time; a topic that keeps
//! failing is reported and the batch moves on.
//!
//! A successful publish only means the broker accepted the request. Whether
//! the stored copy is really gone is checked separately by
//! [`VerificationEngine`](crate::verification::VerificationEngine).

use crate::observer::RunObserver;
use crate::report::TopicResults;
use crate::session::{BrokerSession, QoS, SessionError};
use crate::topics::Topic;
use std::time::Duration;

/// Bounded retry for clearing publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total publish attempts per topic, including the first
    pub max_attempts: u32,
    /// Pause before each retry
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Per-topic clearing result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearOutcome {
    /// Broker acknowledged the empty retained publish
    Cleared {
        /// Attempts used
        attempts: u32,
    },
    /// Every attempt failed
    FailedAfterRetries {
        /// Attempts used
        attempts: u32,
        /// Error of the final attempt
        last_error: SessionError,
    },
}

impl ClearOutcome {
    /// Whether the clearing publish was accepted.
    #[must_use]
    pub fn is_cleared(&self) -> bool {
        matches!(self, Self::Cleared { .. })
    }
}

/// Clearing results for a batch.
pub type ClearReport = TopicResults<ClearOutcome>;

/// Publishes empty retained payloads with bounded retries.
pub struct ClearingEngine<'a, S> {
    session: &'a S,
    qos: QoS,
    policy: RetryPolicy,
}

impl<'a, S: BrokerSession> ClearingEngine<'a, S> {
    /// Create an engine publishing at `qos`.
    #[must_use]
    pub fn new(session: &'a S, qos: QoS, policy: RetryPolicy) -> Self {
        Self {
            session,
            qos,
            policy,
        }
    }

    /// Clear every topic in order. Failures never stop the batch.
    pub async fn clear<'t>(
        &self,
        topics: impl IntoIterator<Item = &'t Topic>,
        observer: &mut dyn RunObserver,
    ) -> ClearReport {
        let mut report = ClearReport::new();
        for topic in topics {
            let outcome = self.clear_topic(topic, observer).await;
            observer.cleared(topic, &outcome);
            report.insert(topic.clone(), outcome);
        }

        tracing::info!(
            cleared = report.count(ClearOutcome::is_cleared),
            failed = report.count(|o| !o.is_cleared()),
            "Clearing finished"
        );
        report
    }

    /// Clear a single topic, retrying up to the policy's attempt limit.
    pub async fn clear_topic(&self, topic: &Topic, observer: &mut dyn RunObserver) -> ClearOutcome {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self
                .session
                .publish(topic, self.qos, true, Vec::new())
                .await
            {
                Ok(()) => {
                    tracing::info!(topic = %topic, attempt, "Cleared retained message");
                    return ClearOutcome::Cleared { attempts: attempt };
                }
                Err(error) => {
                    tracing::warn!(topic = %topic, attempt, error = %error, "Clearing publish failed");
                    observer.clear_attempt_failed(topic, attempt, &error);

                    if attempt >= max_attempts {
                        return ClearOutcome::FailedAfterRetries {
                            attempts: attempt,
                            last_error: error,
                        };
                    }
                    tokio::time::sleep(self.policy.backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBroker, Operation};
    use crate::observer::NoopObserver;

    const FAST: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        backoff: Duration::from_millis(1),
    };

    fn topic(s: &str) -> Topic {
        Topic::parse(s).unwrap()
    }

    #[derive(Default)]
    struct AttemptLog(Vec<(String, u32)>);

    impl RunObserver for AttemptLog {
        fn clear_attempt_failed(&mut self, topic: &Topic, attempt: u32, _error: &SessionError) {
            self.0.push((topic.to_string(), attempt));
        }
    }

    #[test]
    fn default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn publishes_empty_retained_payload() {
        let broker = MemoryBroker::new();
        broker.seed_retained("a/x", "1");
        let engine = ClearingEngine::new(&broker, QoS::AtLeastOnce, FAST);

        let topics = [topic("a/x")];
        let report = engine.clear(&topics, &mut NoopObserver).await;

        assert_eq!(
            report.get("a/x"),
            Some(&ClearOutcome::Cleared { attempts: 1 })
        );
        assert_eq!(
            broker.operations(),
            vec![Operation::Publish {
                topic: "a/x".into(),
                retain: true,
                payload_len: 0,
            }]
        );
        assert!(broker.retained_topics().is_empty());
    }

    #[tokio::test]
    async fn clearing_already_clear_topic_is_reported_cleared() {
        let broker = MemoryBroker::new();
        let engine = ClearingEngine::new(&broker, QoS::AtMostOnce, FAST);
        let t = topic("a/never-retained");

        let first = engine.clear_topic(&t, &mut NoopObserver).await;
        let second = engine.clear_topic(&t, &mut NoopObserver).await;

        assert!(first.is_cleared());
        assert!(second.is_cleared());
        assert!(broker.retained_topics().is_empty());
    }

    #[tokio::test]
    async fn third_attempt_success_counts_as_cleared() {
        let broker = MemoryBroker::new();
        broker.seed_retained("a/x", "1");
        broker.fail_publishes("a/x", 2);
        let engine = ClearingEngine::new(&broker, QoS::AtLeastOnce, FAST);
        let mut log = AttemptLog::default();

        let outcome = engine.clear_topic(&topic("a/x"), &mut log).await;

        assert_eq!(outcome, ClearOutcome::Cleared { attempts: 3 });
        assert_eq!(log.0, vec![("a/x".into(), 1), ("a/x".into(), 2)]);
        assert!(broker.retained_topics().is_empty());
    }

    #[tokio::test]
    async fn gives_up_after_three_failures_and_continues() {
        let broker = MemoryBroker::new();
        broker.seed_retained("a/x", "1");
        broker.seed_retained("a/y", "2");
        broker.fail_publishes("a/x", 3);
        let engine = ClearingEngine::new(&broker, QoS::AtLeastOnce, FAST);

        let topics = [topic("a/x"), topic("a/y")];
        let report = engine.clear(&topics, &mut NoopObserver).await;

        match report.get("a/x") {
            Some(ClearOutcome::FailedAfterRetries { attempts, last_error }) => {
                assert_eq!(*attempts, 3);
                assert!(matches!(last_error, SessionError::Publish(_)));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(report.get("a/y").is_some_and(ClearOutcome::is_cleared));
        assert_eq!(broker.retained_topics(), vec!["a/x".to_string()]);
        assert_eq!(broker.operations().len(), 4);
    }

    #[tokio::test]
    async fn zero_attempt_policy_still_tries_once() {
        let broker = MemoryBroker::new();
        let policy = RetryPolicy {
            max_attempts: 0,
            backoff: Duration::ZERO,
        };
        let engine = ClearingEngine::new(&broker, QoS::AtMostOnce, policy);
        let outcome = engine.clear_topic(&topic("a"), &mut NoopObserver).await;
        assert_eq!(outcome, ClearOutcome::Cleared { attempts: 1 });
    }
}
