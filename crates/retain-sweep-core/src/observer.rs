//! Progress callbacks for the run modes.

use crate::clearing::ClearOutcome;
use crate::collector::Collection;
use crate::session::SessionError;
use crate::topics::Topic;
use crate::verification::VerifyOutcome;
use std::fmt;
use std::time::Duration;

/// Stage of a default-mode run. Runs move through these in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Session established
    Connected,
    /// Discovery window open
    Collecting {
        /// Configured window length
        window: Duration,
    },
    /// Publishing empty retained payloads
    Clearing,
    /// Verification window open
    Verifying {
        /// Configured window length
        window: Duration,
    },
    /// Results complete
    Reporting,
    /// Nothing left to do
    Terminal,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => f.write_str("connected"),
            Self::Collecting { .. } => f.write_str("collecting"),
            Self::Clearing => f.write_str("clearing"),
            Self::Verifying { .. } => f.write_str("verifying"),
            Self::Reporting => f.write_str("reporting"),
            Self::Terminal => f.write_str("terminal"),
        }
    }
}

/// Notified as each per-topic operation completes.
///
/// Every method defaults to doing nothing.
pub trait RunObserver {
    /// A new phase started.
    fn phase(&mut self, _phase: Phase) {}

    /// A collection window closed.
    fn collected(&mut self, _collection: &Collection) {}

    /// A fixture publish finished.
    fn published(&mut self, _topic: &Topic, _payload: &str, _result: &Result<(), SessionError>) {}

    /// One clearing attempt failed; more may follow.
    fn clear_attempt_failed(&mut self, _topic: &Topic, _attempt: u32, _error: &SessionError) {}

    /// Clearing of `topic` finished.
    fn cleared(&mut self, _topic: &Topic, _outcome: &ClearOutcome) {}

    /// Verification of `topic` finished.
    fn verified(&mut self, _topic: &Topic, _outcome: &VerifyOutcome) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}
