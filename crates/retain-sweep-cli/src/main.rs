//! # retain-sweep
//!
//! Clears retained MQTT messages under a topic subtree and verifies that the
//! broker really dropped them.
//!
//! ## Modes
//!
//! - default: discover, clear and verify everything retained under `topic`
//! - `--test`: publish one non-retained probe to `<topic>/test`
//! - `--verify`: create fixtures under `<topic>/verify`, clear and verify them
//! - `--pollute`: create retained fixtures under `<topic>/pollute`

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use retain_sweep_core::workflow::{self, DEFAULT_POLLUTE_COUNT, DEFAULT_VERIFY_COUNT};
use retain_sweep_core::{BrokerSession, Phase, RunObserver, XorShift64};
use retain_sweep_mqtt::MqttSession;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod output;

use cli::{Cli, Mode};
use config::RunConfig;
use output::ConsoleReporter;

/// Time the event loop gets to flush DISCONNECT.
const DISCONNECT_GRACE: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() {
    // Initialize logging; stdout is reserved for the report
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(&cli).await {
        tracing::error!("Fatal error: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting retain-sweep");

    let config = RunConfig::from_cli(cli).context("Failed to load config")?;
    let session = MqttSession::connect(&config.session)
        .await
        .context("Connect error")?;

    let mut reporter = ConsoleReporter::stdout();
    reporter.phase(Phase::Connected);

    let outcome = run_mode(cli, &config, &session, &mut reporter).await;

    session.disconnect(DISCONNECT_GRACE).await;
    reporter.phase(Phase::Terminal);
    outcome
}

async fn run_mode(
    cli: &Cli,
    config: &RunConfig,
    session: &MqttSession,
    reporter: &mut ConsoleReporter<std::io::Stdout>,
) -> Result<()> {
    let base = &config.topic;
    let settings = &config.settings;

    match cli.mode() {
        Mode::Sweep => {
            let report = workflow::sweep(session, base, settings, reporter).await;
            reporter.sweep_summary(&report);
        }
        Mode::Probe => {
            let report = workflow::probe(session, base, settings.qos).await?;
            reporter.probe_summary(&report);
        }
        Mode::Verify => {
            let count = cli.count.unwrap_or(DEFAULT_VERIFY_COUNT);
            let mut rng = XorShift64::new(cli.seed);
            let report =
                workflow::verify_clearing(session, base, count, &mut rng, settings, reporter)
                    .await?;
            reporter.verify_summary(&report);
        }
        Mode::Pollute => {
            let count = cli.count.unwrap_or(DEFAULT_POLLUTE_COUNT);
            let mut rng = XorShift64::new(cli.seed);
            let report = workflow::pollute(
                session,
                base,
                count,
                &mut rng,
                Utc::now(),
                settings,
                reporter,
            )
            .await?;
            reporter.pollute_summary(&report);
        }
    }

    Ok(())
}
