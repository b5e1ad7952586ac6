//! Synthetic retained fixtures.
//!
//! Topic generation is a pure function of a [`RandomSource`], so a seeded
//! source always yields the same fixtures.

use crate::topics::{Topic, TopicError};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

/// Namespace for `pollute` fixtures below the base topic.
pub const POLLUTE_SEGMENT: &str = "pollute";

/// Namespace for clear-and-verify fixtures below the base topic.
pub const VERIFY_SEGMENT: &str = "verify";

/// Deepest nesting generated below the pollute namespace.
pub const MAX_POLLUTE_DEPTH: u64 = 3;

const MAX_DRAWS_PER_FIXTURE: usize = 16;

/// Source of pseudo-random numbers.
pub trait RandomSource {
    /// Next 64 random bits.
    fn next_u64(&mut self) -> u64;

    /// Uniform-ish value in `0..bound`. `bound` must be non-zero.
    fn below(&mut self, bound: u64) -> u64 {
        self.next_u64() % bound
    }

    /// Non-negative 63-bit value.
    fn next_u63(&mut self) -> u64 {
        self.next_u64() >> 1
    }
}

/// xorshift64 generator.
#[derive(Debug, Clone)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    /// Seeded generator. A zero seed is replaced by the current time.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        let state = if seed == 0 { clock_seed() } else { seed };
        Self { state }
    }

    /// Generator seeded from the system clock.
    #[must_use]
    pub fn from_clock() -> Self {
        Self::new(0)
    }
}

impl RandomSource for XorShift64 {
    fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }
}

fn clock_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    // truncation is fine, only entropy matters
    #[allow(clippy::cast_possible_truncation)]
    let seed = nanos as u64;
    seed | 1
}

/// A retained message to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixture {
    /// Destination
    pub topic: Topic,
    /// Body
    pub payload: String,
}

/// Generate `count` distinct topics `<base>/pollute/level<n>[/level<n>...]`
/// with 1 to 3 generated levels each.
///
/// # Errors
///
/// Returns error if a generated name is not a valid topic, or the source
/// keeps repeating itself.
pub fn pollute_topics(
    base: &Topic,
    count: usize,
    rng: &mut dyn RandomSource,
) -> Result<Vec<Topic>, FixtureError> {
    let prefix = base.join(POLLUTE_SEGMENT)?;
    distinct(count, || {
        let depth = 1 + rng.below(MAX_POLLUTE_DEPTH);
        let levels: Vec<String> = (0..depth)
            .map(|_| format!("level{}", rng.next_u63()))
            .collect();
        prefix.join(&levels.join("/"))
    })
}

/// Generate `count` distinct topics `<base>/verify/<n>`.
///
/// # Errors
///
/// Returns error if a generated name is not a valid topic, or the source
/// keeps repeating itself.
pub fn verify_topics(
    base: &Topic,
    count: usize,
    rng: &mut dyn RandomSource,
) -> Result<Vec<Topic>, FixtureError> {
    let prefix = base.join(VERIFY_SEGMENT)?;
    distinct(count, || prefix.join(&rng.next_u63().to_string()))
}

/// Pollute fixtures with payloads `pollute_<i>_<YYYYMMDDhhmmss>`.
///
/// # Errors
///
/// See [`pollute_topics`].
pub fn pollute_fixtures(
    base: &Topic,
    count: usize,
    rng: &mut dyn RandomSource,
    now: DateTime<Utc>,
) -> Result<Vec<Fixture>, FixtureError> {
    let stamp = now.format("%Y%m%d%H%M%S").to_string();
    Ok(pollute_topics(base, count, rng)?
        .into_iter()
        .enumerate()
        .map(|(i, topic)| Fixture {
            topic,
            payload: format!("pollute_{i}_{stamp}"),
        })
        .collect())
}

/// Verify fixtures with payloads `verify<i>`.
///
/// # Errors
///
/// See [`verify_topics`].
pub fn verify_fixtures(
    base: &Topic,
    count: usize,
    rng: &mut dyn RandomSource,
) -> Result<Vec<Fixture>, FixtureError> {
    Ok(verify_topics(base, count, rng)?
        .into_iter()
        .enumerate()
        .map(|(i, topic)| Fixture {
            topic,
            payload: format!("verify{i}"),
        })
        .collect())
}

fn distinct(
    count: usize,
    mut draw: impl FnMut() -> Result<Topic, TopicError>,
) -> Result<Vec<Topic>, FixtureError> {
    let mut seen = HashSet::with_capacity(count);
    let mut topics = Vec::with_capacity(count);
    let max_draws = count.saturating_mul(MAX_DRAWS_PER_FIXTURE);

    for _ in 0..max_draws {
        if topics.len() == count {
            break;
        }
        let topic = draw()?;
        if seen.insert(topic.clone()) {
            topics.push(topic);
        }
    }

    if topics.len() < count {
        return Err(FixtureError::Exhausted {
            requested: count,
            generated: topics.len(),
        });
    }
    Ok(topics)
}

/// Errors while generating fixtures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FixtureError {
    /// Generated name is not a valid topic
    #[error(transparent)]
    Topic(#[from] TopicError),
    /// Random source produced too many duplicates
    #[error("only {generated} of {requested} distinct fixture topics could be generated")]
    Exhausted {
        /// Fixtures asked for
        requested: usize,
        /// Distinct fixtures produced
        generated: usize,
    },
}
