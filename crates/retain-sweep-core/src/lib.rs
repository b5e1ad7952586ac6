//! # retain-sweep core
//!
//! Reconciliation of retained MQTT messages under a topic subtree.
//!
//! The broker offers no "list retained" or "delete" request, only publish and
//! subscribe. This crate builds a delete-and-verify workflow on top:
//! - [`Collector`]: subscribe, let the broker replay retained messages for a
//!   bounded window, unsubscribe, read the accumulated set
//! - [`ClearingEngine`]: publish empty retained payloads with bounded retries
//! - [`VerificationEngine`]: re-subscribe exactly and classify each topic
//! - [`fixtures`]: deterministic generation of retained test fixtures
//!
//! Transports plug in through [`BrokerSession`]. [`MemoryBroker`] is an
//! in-process implementation.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clearing;
pub mod collector;
pub mod fixtures;
pub mod memory;
pub mod observer;
pub mod report;
pub mod session;
pub mod topics;
pub mod verification;
pub mod workflow;

pub use clearing::{ClearOutcome, ClearReport, ClearingEngine, RetryPolicy};
pub use collector::{Collection, Collector, DiscoveredSet, FilterFailure, FilterStage};
pub use fixtures::{Fixture, FixtureError, RandomSource, XorShift64};
pub use memory::MemoryBroker;
pub use observer::{NoopObserver, Phase, RunObserver};
pub use report::TopicResults;
pub use session::{BrokerSession, Delivery, DeliveryHandler, QoS, SessionError};
pub use topics::{Topic, TopicError, TopicFilter};
pub use verification::{VerificationEngine, VerificationReport, VerifyOutcome};
pub use workflow::{
    FixtureStatus, PolluteReport, ProbeReport, SweepReport, SweepSettings, VerifyRunReport,
};
