//! Verification that retained copies are gone.
//!
//! Each topic gets its own exact subscription so unrelated retained data
//! under the same subtree cannot leak into the result. A retained delivery
//! during the window means the broker still holds a copy.

use crate::collector::Collector;
use crate::observer::RunObserver;
use crate::report::TopicResults;
use crate::session::{BrokerSession, QoS, SessionError};
use crate::topics::{Topic, TopicFilter};
use std::time::Duration;

/// Per-topic verification result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// No retained delivery arrived during the window
    ConfirmedCleared,
    /// The broker replayed a retained message
    StillPresent,
    /// The exact subscription could not be opened
    Unverified(SessionError),
}

impl VerifyOutcome {
    /// Whether the topic is known to hold no retained message.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::ConfirmedCleared)
    }
}

/// Verification results for a batch.
pub type VerificationReport = TopicResults<VerifyOutcome>;

/// Re-subscribes to topics and classifies them as cleared or not.
pub struct VerificationEngine<'a, S> {
    session: &'a S,
    qos: QoS,
    window: Duration,
}

impl<'a, S: BrokerSession> VerificationEngine<'a, S> {
    /// Create an engine observing each topic for `window`.
    #[must_use]
    pub fn new(session: &'a S, qos: QoS, window: Duration) -> Self {
        Self {
            session,
            qos,
            window,
        }
    }

    /// Verify `topics`. Topics that never held a retained message are
    /// reported as confirmed.
    pub async fn verify(&self, topics: &[Topic], observer: &mut dyn RunObserver) -> VerificationReport {
        let mut report = VerificationReport::new();
        if topics.is_empty() {
            return report;
        }

        tracing::info!(topics = topics.len(), window = ?self.window, "Verifying deletion");
        let collection = Collector::new(self.session, self.qos, self.window)
            .observe(topics)
            .await;

        for topic in topics {
            let outcome = if let Some(error) = collection.subscribe_error(&TopicFilter::exact(topic)) {
                VerifyOutcome::Unverified(error.clone())
            } else if collection.topics.contains(topic.as_str()) {
                tracing::warn!(topic = %topic, "Retained message still present");
                VerifyOutcome::StillPresent
            } else {
                VerifyOutcome::ConfirmedCleared
            };
            observer.verified(topic, &outcome);
            report.insert(topic.clone(), outcome);
        }

        report
    }
}
