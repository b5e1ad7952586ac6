//! Run configuration.

use crate::cli::Cli;
use anyhow::{bail, Context, Result};
use retain_sweep_core::{QoS, RetryPolicy, SweepSettings, Topic};
use retain_sweep_mqtt::{generated_client_id, MqttSessionConfig};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Config file contents.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    /// Broker URI
    pub broker: String,

    /// Username, empty for anonymous
    #[serde(default)]
    pub username: String,

    /// Password
    #[serde(default)]
    pub password: String,

    /// Client ID, generated when empty
    #[serde(rename = "clientID", default)]
    pub client_id: String,

    /// Base topic of the subtree to work on
    pub topic: String,

    /// QoS for every publish and subscription
    #[serde(default)]
    pub qos: QoS,

    /// Discovery window override
    pub discovery_window_ms: Option<u64>,

    /// Verification window override
    pub verification_window_ms: Option<u64>,

    /// Fixture confirmation window override
    pub confirmation_window_ms: Option<u64>,

    /// Verification window override for `--verify`
    pub fixture_verification_window_ms: Option<u64>,

    /// Clearing attempts per topic
    pub max_attempts: Option<u32>,

    /// Pause between clearing attempts
    pub retry_backoff_ms: Option<u64>,
}

impl FileConfig {
    /// Read and parse a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is not valid config JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Apply environment overrides.
    ///
    /// # Environment Variables
    ///
    /// - `RETAIN_SWEEP_BROKER`: broker URI
    /// - `RETAIN_SWEEP_USERNAME` / `RETAIN_SWEEP_PASSWORD`: credentials
    /// - `RETAIN_SWEEP_CLIENT_ID`: client ID
    /// - `RETAIN_SWEEP_TOPIC`: base topic
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(broker) = lookup("RETAIN_SWEEP_BROKER") {
            self.broker = broker;
        }
        if let Some(username) = lookup("RETAIN_SWEEP_USERNAME") {
            self.username = username;
        }
        if let Some(password) = lookup("RETAIN_SWEEP_PASSWORD") {
            self.password = password;
        }
        if let Some(client_id) = lookup("RETAIN_SWEEP_CLIENT_ID") {
            self.client_id = client_id;
        }
        if let Some(topic) = lookup("RETAIN_SWEEP_TOPIC") {
            self.topic = topic;
        }
    }
}

/// Validated settings for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Connection settings
    pub session: MqttSessionConfig,
    /// Base topic
    pub topic: Topic,
    /// Windows, QoS and retries
    pub settings: SweepSettings,
}

impl RunConfig {
    /// Load the config file named on the command line, apply environment and
    /// flag overrides, and validate.
    ///
    /// # Errors
    ///
    /// Returns error if loading or validation fails.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mut file = FileConfig::load(&cli.config)?;
        file.apply_env(|key| std::env::var(key).ok());
        if cli.discovery_window_ms.is_some() {
            file.discovery_window_ms = cli.discovery_window_ms;
        }
        if cli.verification_window_ms.is_some() {
            file.verification_window_ms = cli.verification_window_ms;
        }
        if cli.confirmation_window_ms.is_some() {
            file.confirmation_window_ms = cli.confirmation_window_ms;
        }
        if cli.fixture_verification_window_ms.is_some() {
            file.fixture_verification_window_ms = cli.fixture_verification_window_ms;
        }
        Self::resolve(file)
    }

    /// Validate a file config.
    ///
    /// # Errors
    ///
    /// Returns error if the broker is empty or the topic is not a valid
    /// publish destination.
    pub fn resolve(file: FileConfig) -> Result<Self> {
        if file.broker.trim().is_empty() {
            bail!("Config field 'broker' must not be empty");
        }
        let topic = Topic::parse(file.topic.as_str())
            .with_context(|| format!("Invalid config field 'topic': {:?}", file.topic))?;

        let mut settings = SweepSettings {
            qos: file.qos,
            ..SweepSettings::default()
        };
        if let Some(ms) = file.discovery_window_ms {
            settings.discovery_window = Duration::from_millis(ms);
        }
        if let Some(ms) = file.verification_window_ms {
            settings.verification_window = Duration::from_millis(ms);
        }
        if let Some(ms) = file.confirmation_window_ms {
            settings.confirmation_window = Duration::from_millis(ms);
        }
        if let Some(ms) = file.fixture_verification_window_ms {
            settings.fixture_verification_window = Duration::from_millis(ms);
        }
        settings.retry = RetryPolicy {
            max_attempts: file.max_attempts.unwrap_or(settings.retry.max_attempts),
            backoff: file
                .retry_backoff_ms
                .map_or(settings.retry.backoff, Duration::from_millis),
        };

        let client_id = if file.client_id.is_empty() {
            generated_client_id()
        } else {
            file.client_id
        };

        let session = MqttSessionConfig {
            broker: file.broker,
            client_id,
            username: Some(file.username).filter(|u| !u.is_empty()),
            password: Some(file.password).filter(|p| !p.is_empty()),
            ..MqttSessionConfig::default()
        };

        Ok(Self {
            session,
            topic,
            settings,
        })
    }
}
