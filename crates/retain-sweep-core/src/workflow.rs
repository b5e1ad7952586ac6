//! Run modes.
//!
//! - [`sweep`]: discover, clear and verify everything retained under a base
//!   topic
//! - [`probe`]: publish one non-retained message to check connectivity
//! - [`verify_clearing`]: create fixtures, sweep them, and check each one
//! - [`pollute`]: create retained fixtures for the other modes to find
//!
//! Per-topic failures end up in the returned reports; no mode aborts on
//! them.

use crate::clearing::{ClearReport, ClearingEngine, RetryPolicy};
use crate::collector::{Collection, Collector, FilterStage};
use crate::fixtures::{self, Fixture, FixtureError, RandomSource, VERIFY_SEGMENT};
use crate::observer::{Phase, RunObserver};
use crate::report::TopicResults;
use crate::session::{BrokerSession, QoS, SessionError};
use crate::topics::Topic;
use crate::verification::{VerificationEngine, VerificationReport, VerifyOutcome};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Suffix of the connectivity probe topic.
pub const PROBE_SEGMENT: &str = "test";

/// Payload of the connectivity probe.
pub const PROBE_PAYLOAD: &str = "connection test";

/// Fixtures created by `--verify`.
pub const DEFAULT_VERIFY_COUNT: usize = 3;

/// Fixtures created by `--pollute`.
pub const DEFAULT_POLLUTE_COUNT: usize = 5;

/// Timing and delivery settings shared by all modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepSettings {
    /// QoS for every publish and subscription
    pub qos: QoS,
    /// How long discovery waits for retained replays
    pub discovery_window: Duration,
    /// How long verification waits after clearing
    pub verification_window: Duration,
    /// Window used by the fixture modes to find what they published
    pub confirmation_window: Duration,
    /// Verification window of the clear-and-verify fixture mode
    pub fixture_verification_window: Duration,
    /// Clearing retries
    pub retry: RetryPolicy,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            qos: QoS::AtMostOnce,
            discovery_window: Duration::from_secs(5),
            verification_window: Duration::from_secs(2),
            confirmation_window: Duration::from_secs(2),
            fixture_verification_window: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of a default-mode run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Base topic swept
    pub base: Topic,
    /// Discovery window result
    pub discovery: Collection,
    /// Clearing result per discovered topic
    pub clearing: ClearReport,
    /// Verification result per discovered topic
    pub verification: VerificationReport,
}

impl SweepReport {
    /// Whether every discovery subscription was granted. When one was
    /// refused the discovered set may be missing topics.
    #[must_use]
    pub fn discovery_complete(&self) -> bool {
        !self
            .discovery
            .failures
            .iter()
            .any(|f| f.stage == FilterStage::Subscribe)
    }

    /// Whether a complete discovery found nothing.
    #[must_use]
    pub fn nothing_found(&self) -> bool {
        self.discovery_complete() && self.discovery.topics.is_empty()
    }

    /// Whether discovery was complete and every discovered topic was
    /// cleared and confirmed.
    #[must_use]
    pub fn all_cleared(&self) -> bool {
        self.discovery_complete() && self.failed_topics().is_empty()
    }

    /// Discovered topics that failed clearing or verification.
    #[must_use]
    pub fn failed_topics(&self) -> Vec<&Topic> {
        self.discovery
            .topics
            .iter()
            .filter(|topic| !self.topic_cleared(topic))
            .collect()
    }

    fn topic_cleared(&self, topic: &Topic) -> bool {
        let cleared = self
            .clearing
            .get(topic.as_str())
            .is_some_and(|o| o.is_cleared());
        let confirmed = self
            .verification
            .get(topic.as_str())
            .is_some_and(VerifyOutcome::is_confirmed);
        cleared && confirmed
    }
}

/// Discover, clear and verify every retained message at or below `base`.
///
/// Phases run in order and always reach [`Phase::Reporting`]. When nothing
/// is discovered no clearing or verification request is sent, and a refused
/// discovery subscription leaves the report incomplete rather than empty.
pub async fn sweep<S: BrokerSession>(
    session: &S,
    base: &Topic,
    settings: &SweepSettings,
    observer: &mut dyn RunObserver,
) -> SweepReport {
    observer.phase(Phase::Collecting {
        window: settings.discovery_window,
    });
    let discovery = Collector::new(session, settings.qos, settings.discovery_window)
        .discover(base)
        .await;
    observer.collected(&discovery);
    tracing::info!(base = %base, found = discovery.topics.len(), "Discovery finished");

    let mut report = SweepReport {
        base: base.clone(),
        discovery,
        clearing: ClearReport::new(),
        verification: VerificationReport::new(),
    };

    if !report.discovery.topics.is_empty() {
        observer.phase(Phase::Clearing);
        report.clearing = ClearingEngine::new(session, settings.qos, settings.retry)
            .clear(&report.discovery.topics, observer)
            .await;

        observer.phase(Phase::Verifying {
            window: settings.verification_window,
        });
        let topics = report.discovery.topics.to_vec();
        report.verification =
            VerificationEngine::new(session, settings.qos, settings.verification_window)
                .verify(&topics, observer)
                .await;
    }

    observer.phase(Phase::Reporting);
    report
}

/// Result of the connectivity probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    /// Probe destination
    pub topic: Topic,
    /// Publish outcome
    pub result: Result<(), SessionError>,
}

/// Publish one non-retained message to `<base>/test`.
///
/// # Errors
///
/// Returns error if the probe topic is not valid.
pub async fn probe<S: BrokerSession>(
    session: &S,
    base: &Topic,
    qos: QoS,
) -> Result<ProbeReport, FixtureError> {
    let topic = base.join(PROBE_SEGMENT)?;
    tracing::info!(topic = %topic, "Publishing probe message");
    let result = session
        .publish(&topic, qos, false, PROBE_PAYLOAD.as_bytes().to_vec())
        .await;
    Ok(ProbeReport { topic, result })
}

/// State of one generated fixture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixtureStatus {
    /// Publish failed
    PublishFailed(SessionError),
    /// Published, but no retained copy was observed
    NotRetained,
    /// Published and observed as retained
    Retained,
}

/// Result of the pollute mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolluteReport {
    /// Every generated fixture, in generation order
    pub fixtures: Vec<Fixture>,
    /// Status per fixture topic
    pub status: TopicResults<FixtureStatus>,
    /// Confirmation window result
    pub confirmation: Collection,
}

impl PolluteReport {
    /// Whether every fixture is retained on the broker.
    #[must_use]
    pub fn all_published(&self) -> bool {
        self.status.count(|s| *s == FixtureStatus::Retained) == self.fixtures.len()
    }
}

/// Publish `count` retained fixtures under `<base>/pollute`, then confirm
/// each with an exact subscription.
///
/// # Errors
///
/// Returns error if fixture topics cannot be generated.
pub async fn pollute<S: BrokerSession>(
    session: &S,
    base: &Topic,
    count: usize,
    rng: &mut dyn RandomSource,
    now: DateTime<Utc>,
    settings: &SweepSettings,
    observer: &mut dyn RunObserver,
) -> Result<PolluteReport, FixtureError> {
    let fixtures = fixtures::pollute_fixtures(base, count, rng, now)?;
    let (published, mut status) = publish_fixtures(session, &fixtures, settings.qos, observer).await;

    let confirmation = Collector::new(session, settings.qos, settings.confirmation_window)
        .observe(&published)
        .await;
    observer.collected(&confirmation);

    for topic in published {
        let state = if confirmation.topics.contains(topic.as_str()) {
            FixtureStatus::Retained
        } else {
            tracing::warn!(topic = %topic, "Fixture not observed as retained");
            FixtureStatus::NotRetained
        };
        status.insert(topic, state);
    }

    Ok(PolluteReport {
        fixtures,
        status,
        confirmation,
    })
}

/// Result of the clear-and-verify fixture mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyRunReport {
    /// Every generated fixture, in generation order
    pub fixtures: Vec<Fixture>,
    /// Fixtures whose publish failed
    pub publish_failures: TopicResults<SessionError>,
    /// Discovery over the `<base>/verify` subtree
    pub discovery: Collection,
    /// Clearing result per discovered topic
    pub clearing: ClearReport,
    /// Verification per published fixture
    pub verification: VerificationReport,
}

impl VerifyRunReport {
    /// Whether every fixture was published and confirmed cleared.
    #[must_use]
    pub fn all_cleared(&self) -> bool {
        self.publish_failures.is_empty()
            && self.verification.count(VerifyOutcome::is_confirmed) == self.fixtures.len()
    }
}

/// Publish `count` retained fixtures under `<base>/verify`, sweep that
/// subtree, and verify each published fixture.
///
/// # Errors
///
/// Returns error if fixture topics cannot be generated.
pub async fn verify_clearing<S: BrokerSession>(
    session: &S,
    base: &Topic,
    count: usize,
    rng: &mut dyn RandomSource,
    settings: &SweepSettings,
    observer: &mut dyn RunObserver,
) -> Result<VerifyRunReport, FixtureError> {
    let prefix = base.join(VERIFY_SEGMENT)?;
    let fixtures = fixtures::verify_fixtures(base, count, rng)?;
    let (published, status) = publish_fixtures(session, &fixtures, settings.qos, observer).await;
    let publish_failures = status
        .iter()
        .filter_map(|(topic, state)| match state {
            FixtureStatus::PublishFailed(err) => Some((topic.clone(), err.clone())),
            _ => None,
        })
        .collect();

    observer.phase(Phase::Collecting {
        window: settings.confirmation_window,
    });
    let discovery = Collector::new(session, settings.qos, settings.confirmation_window)
        .discover(&prefix)
        .await;
    observer.collected(&discovery);

    observer.phase(Phase::Clearing);
    let clearing = ClearingEngine::new(session, settings.qos, settings.retry)
        .clear(&discovery.topics, observer)
        .await;

    observer.phase(Phase::Verifying {
        window: settings.fixture_verification_window,
    });
    let verification =
        VerificationEngine::new(session, settings.qos, settings.fixture_verification_window)
            .verify(&published, observer)
            .await;

    observer.phase(Phase::Reporting);
    Ok(VerifyRunReport {
        fixtures,
        publish_failures,
        discovery,
        clearing,
        verification,
    })
}

/// Publish fixtures as retained. Returns the topics that were accepted, and
/// a status map holding the failures.
async fn publish_fixtures<S: BrokerSession>(
    session: &S,
    fixtures: &[Fixture],
    qos: QoS,
    observer: &mut dyn RunObserver,
) -> (Vec<Topic>, TopicResults<FixtureStatus>) {
    let mut published = Vec::with_capacity(fixtures.len());
    let mut status = TopicResults::new();

    for fixture in fixtures {
        let result = session
            .publish(&fixture.topic, qos, true, fixture.payload.as_bytes().to_vec())
            .await;
        observer.published(&fixture.topic, &fixture.payload, &result);
        match result {
            Ok(()) => {
                tracing::info!(topic = %fixture.topic, payload = %fixture.payload, "Published retained fixture");
                published.push(fixture.topic.clone());
            }
            Err(err) => {
                tracing::warn!(topic = %fixture.topic, error = %err, "Failed to publish retained fixture");
                status.insert(fixture.topic.clone(), FixtureStatus::PublishFailed(err));
            }
        }
    }

    (published, status)
}
