//! Command-line arguments.

use clap::{ArgGroup, Parser};
use std::path::PathBuf;

/// Discover, clear and verify retained MQTT messages under a topic.
#[derive(Debug, Parser)]
#[command(name = "retain-sweep")]
#[command(version, about, long_about = None)]
#[command(group(ArgGroup::new("mode").args(["test", "verify", "pollute"])))]
pub struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = "config.json", env = "RETAIN_SWEEP_CONFIG")]
    pub config: PathBuf,

    /// Publish a test message to <topic>/test instead of clearing retained
    #[arg(long)]
    pub test: bool,

    /// Generate and clear retained messages under <topic>/verify and verify deletion
    #[arg(long)]
    pub verify: bool,

    /// Generate retained messages under <topic>/pollute to test cleanup
    #[arg(long)]
    pub pollute: bool,

    /// Number of fixtures for --verify (default 3) or --pollute (default 5)
    #[arg(long)]
    pub count: Option<usize>,

    /// Seed for fixture topic generation (0 seeds from the clock)
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Override the discovery window in milliseconds
    #[arg(long)]
    pub discovery_window_ms: Option<u64>,

    /// Override the verification window in milliseconds
    #[arg(long)]
    pub verification_window_ms: Option<u64>,

    /// Override the window --pollute and --verify use to find their fixtures
    #[arg(long)]
    pub confirmation_window_ms: Option<u64>,

    /// Override the verification window of --verify in milliseconds
    #[arg(long)]
    pub fixture_verification_window_ms: Option<u64>,
}

/// What a run does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Discover, clear and verify (no flag)
    Sweep,
    /// `--test`
    Probe,
    /// `--verify`
    Verify,
    /// `--pollute`
    Pollute,
}

impl Cli {
    /// Selected mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        if self.test {
            Mode::Probe
        } else if self.verify {
            Mode::Verify
        } else if self.pollute {
            Mode::Pollute
        } else {
            Mode::Sweep
        }
    }
}
