//! Broker session capability set.
//!
//! The reconciliation workflows only need publish, subscribe and unsubscribe
//! with acknowledgement, plus asynchronous delivery of incoming messages to a
//! callback. [`BrokerSession`] captures exactly that; the MQTT transport and
//! the in-process [`MemoryBroker`](crate::memory::MemoryBroker) implement it.

use crate::topics::{Topic, TopicFilter};
use serde::Deserialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Delivery guarantee level for a publish or subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(try_from = "u8")]
pub enum QoS {
    /// Fire and forget (0)
    #[default]
    AtMostOnce,
    /// Acknowledged delivery (1)
    AtLeastOnce,
    /// Assured single delivery (2)
    ExactlyOnce,
}

impl QoS {
    /// Numeric protocol level.
    #[must_use]
    pub fn level(self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = InvalidQoS;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(InvalidQoS(other)),
        }
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}

/// QoS level outside 0..=2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid QoS level {0}, expected 0, 1 or 2")]
pub struct InvalidQoS(pub u8);

/// A message handed to a subscription callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Concrete topic the message was published to
    pub topic: String,
    /// Message body
    pub payload: Vec<u8>,
    /// Set when the broker replays a stored retained message
    pub retained: bool,
}

/// Callback invoked for each delivery matching a subscription.
///
/// Runs on the session's delivery task, concurrently with the caller.
pub type DeliveryHandler = Arc<dyn Fn(&Delivery) + Send + Sync>;

/// Narrow view of a connected broker session.
///
/// Every operation resolves once the broker acknowledges it, or fails.
/// Callers issue one operation at a time.
pub trait BrokerSession: Send + Sync {
    /// Publish `payload` to `topic`.
    fn publish(
        &self,
        topic: &Topic,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Subscribe to `filter`, routing matching deliveries to `handler`.
    fn subscribe(
        &self,
        filter: &TopicFilter,
        qos: QoS,
        handler: DeliveryHandler,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Remove subscriptions. Handlers stop receiving once this resolves.
    fn unsubscribe(
        &self,
        filters: &[TopicFilter],
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Close the session, waiting at most `grace` for in-flight work.
    fn disconnect(&self, grace: Duration) -> impl Future<Output = ()> + Send;
}

/// Errors reported by a broker session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Connection could not be established
    #[error("connection error: {0}")]
    Connect(String),
    /// Publish was not accepted
    #[error("publish error: {0}")]
    Publish(String),
    /// Subscribe request failed
    #[error("subscription error: {0}")]
    Subscribe(String),
    /// Unsubscribe request failed
    #[error("unsubscribe error: {0}")]
    Unsubscribe(String),
    /// Broker refused the request
    #[error("rejected by broker: {0}")]
    Rejected(String),
    /// No acknowledgement within the configured timeout
    #[error("no acknowledgement after {0:?}")]
    AckTimeout(Duration),
    /// Session is closed
    #[error("session disconnected")]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_from_level() {
        assert_eq!(QoS::try_from(0), Ok(QoS::AtMostOnce));
        assert_eq!(QoS::try_from(1), Ok(QoS::AtLeastOnce));
        assert_eq!(QoS::try_from(2), Ok(QoS::ExactlyOnce));
        assert_eq!(QoS::try_from(3), Err(InvalidQoS(3)));
    }

    #[test]
    fn qos_deserializes_from_integer() {
        let qos: QoS = serde_json::from_str("1").unwrap();
        assert_eq!(qos, QoS::AtLeastOnce);
        assert!(serde_json::from_str::<QoS>("7").is_err());
    }

    #[test]
    fn session_error_messages() {
        let err = SessionError::AckTimeout(Duration::from_secs(5));
        assert_eq!(err.to_string(), "no acknowledgement after 5s");
        assert_eq!(
            SessionError::Publish("queue full".into()).to_string(),
            "publish error: queue full"
        );
    }
}
