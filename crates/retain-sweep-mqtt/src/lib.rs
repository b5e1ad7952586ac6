//! # retain-sweep MQTT transport
//!
//! [`MqttSession`] implements the core `BrokerSession` over MQTT 3.1.1 with
//! `rumqttc`. The event loop runs on its own tokio task; it dispatches
//! incoming messages to subscription callbacks and completes acknowledgement
//! waits for the control task.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod session;

pub use session::{generated_client_id, parse_mqtt_url, MqttSession, MqttSessionConfig};
