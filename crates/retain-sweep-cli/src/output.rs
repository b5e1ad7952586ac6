//! Human-readable progress and summaries on stdout.

use retain_sweep_core::collector::FilterStage;
use retain_sweep_core::{
    ClearOutcome, Collection, FixtureStatus, Phase, PolluteReport, ProbeReport, RunObserver,
    SessionError, SweepReport, Topic, VerifyOutcome, VerifyRunReport,
};
use std::io::{self, Write};

/// Prints a line per completed operation and a summary per run.
pub struct ConsoleReporter<W> {
    out: W,
}

impl ConsoleReporter<io::Stdout> {
    /// Reporter writing to stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ConsoleReporter<W> {
    /// Reporter writing to `out`.
    pub fn new(out: W) -> Self {
        Self { out }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: &str) {
        if let Err(err) = writeln!(self.out, "{text}") {
            tracing::warn!(error = %err, "Failed to write report line");
        }
    }

    /// Summary of a default-mode run.
    pub fn sweep_summary(&mut self, report: &SweepReport) {
        if report.nothing_found() {
            self.line(&format!("No retained messages found under: {}", report.base));
            return;
        }
        if !report.discovery_complete() {
            self.line(&format!(
                "⚠️ Discovery incomplete under: {} (subscription refused)",
                report.base
            ));
        }

        for topic in report.failed_topics() {
            self.line(&format!("❌ Failed to clear retained message on: {topic}"));
        }

        self.line(&format!(
            "Summary: {} found, {} cleared, {} confirmed, {} failed",
            report.discovery.topics.len(),
            report.clearing.count(ClearOutcome::is_cleared),
            report.verification.count(VerifyOutcome::is_confirmed),
            report.failed_topics().len(),
        ));
        if report.all_cleared() {
            self.line("All retained messages successfully cleared!");
        } else {
            self.line("Some retained messages could not be cleared.");
        }
    }

    /// Result of the `--test` probe.
    pub fn probe_summary(&mut self, report: &ProbeReport) {
        match &report.result {
            Ok(()) => self.line(&format!("Test message published to: {}", report.topic)),
            Err(err) => self.line(&format!("Test publish error: {err}")),
        }
    }

    /// Summary of the `--pollute` run.
    pub fn pollute_summary(&mut self, report: &PolluteReport) {
        self.line("");
        self.line("Verification results:");
        for fixture in &report.fixtures {
            let line = match report.status.get(fixture.topic.as_str()) {
                Some(FixtureStatus::Retained) => {
                    format!("✅ Successfully published retained on: {}", fixture.topic)
                }
                Some(FixtureStatus::PublishFailed(err)) => {
                    format!("❌ Failed to publish retained on: {} ({err})", fixture.topic)
                }
                Some(FixtureStatus::NotRetained) | None => {
                    format!("❌ Failed to publish retained on: {}", fixture.topic)
                }
            };
            self.line(&line);
        }

        self.line("");
        if report.all_published() {
            self.line("All retained messages successfully published!");
            self.line("You can now use the cleanup function to remove these messages.");
        } else {
            self.line("Some retained messages could not be published.");
        }
    }

    /// Summary of the `--verify` run.
    pub fn verify_summary(&mut self, report: &VerifyRunReport) {
        for (topic, err) in &report.publish_failures {
            self.line(&format!("❌ Could not publish fixture {topic}: {err}"));
        }
        if report.all_cleared() {
            self.line("All retained messages successfully cleared!");
        } else {
            self.line("Some retained messages could not be cleared.");
        }
    }
}

impl<W: Write> RunObserver for ConsoleReporter<W> {
    fn phase(&mut self, phase: Phase) {
        match phase {
            Phase::Collecting { window } => {
                self.line(&format!("Collecting retained topics (waiting {window:?})..."));
            }
            Phase::Verifying { window } => {
                self.line(&format!("Verifying deletion (waiting {window:?})..."));
            }
            _ => tracing::debug!(%phase, "Phase"),
        }
    }

    fn collected(&mut self, collection: &Collection) {
        for failure in &collection.failures {
            let stage = match failure.stage {
                FilterStage::Subscribe => "Subscribe",
                FilterStage::Unsubscribe => "Unsubscribe",
            };
            self.line(&format!("⚠️ {stage} failed for {}: {}", failure.filter, failure.error));
        }
    }

    fn published(&mut self, topic: &Topic, payload: &str, result: &Result<(), SessionError>) {
        match result {
            Ok(()) => self.line(&format!(
                "Published retained message to: {topic} (payload: {payload})"
            )),
            Err(err) => self.line(&format!("Failed to publish retained to {topic}: {err}")),
        }
    }

    fn clear_attempt_failed(&mut self, topic: &Topic, attempt: u32, error: &SessionError) {
        self.line(&format!("Error clearing {topic} (attempt {attempt}): {error}"));
    }

    fn cleared(&mut self, topic: &Topic, outcome: &ClearOutcome) {
        match outcome {
            ClearOutcome::Cleared { .. } => {
                self.line(&format!("Cleared retained message on topic: {topic}"));
            }
            ClearOutcome::FailedAfterRetries { attempts, .. } => {
                self.line(&format!("❌ Gave up clearing {topic} after {attempts} attempts"));
            }
        }
    }

    fn verified(&mut self, topic: &Topic, outcome: &VerifyOutcome) {
        match outcome {
            VerifyOutcome::ConfirmedCleared => self.line(&format!("✅ No retained on {topic}")),
            VerifyOutcome::StillPresent => {
                self.line(&format!("❌ Retained still present on {topic}"));
            }
            VerifyOutcome::Unverified(err) => {
                self.line(&format!("⚠️ Could not verify {topic}: {err}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retain_sweep_core::workflow;
    use retain_sweep_core::{MemoryBroker, RetryPolicy, SweepSettings};
    use std::time::Duration;

    fn fast() -> SweepSettings {
        SweepSettings {
            discovery_window: Duration::from_millis(5),
            verification_window: Duration::from_millis(5),
            confirmation_window: Duration::from_millis(5),
            fixture_verification_window: Duration::from_millis(5),
            retry: RetryPolicy {
                max_attempts: 3,
                backoff: Duration::from_millis(1),
            },
            ..SweepSettings::default()
        }
    }

    fn text(reporter: ConsoleReporter<Vec<u8>>) -> String {
        String::from_utf8(reporter.into_inner()).unwrap()
    }

    #[tokio::test]
    async fn sweep_output_lists_each_topic_and_summary() {
        let broker = MemoryBroker::new();
        broker.seed_retained("a/x", "1");
        broker.seed_retained("a/y/z", "2");
        let base = Topic::parse("a").unwrap();
        let mut reporter = ConsoleReporter::new(Vec::new());

        let report = workflow::sweep(&broker, &base, &fast(), &mut reporter).await;
        reporter.sweep_summary(&report);
        let out = text(reporter);

        assert!(out.contains("Collecting retained topics (waiting 5ms)..."));
        assert!(out.contains("Cleared retained message on topic: a/x"));
        assert!(out.contains("Cleared retained message on topic: a/y/z"));
        assert!(out.contains("✅ No retained on a/y/z"));
        assert!(out.contains("Summary: 2 found, 2 cleared, 2 confirmed, 0 failed"));
        assert!(out.ends_with("All retained messages successfully cleared!\n"));
    }

    #[tokio::test]
    async fn sweep_output_when_nothing_retained() {
        let broker = MemoryBroker::new();
        let base = Topic::parse("a").unwrap();
        let mut reporter = ConsoleReporter::new(Vec::new());

        let report = workflow::sweep(&broker, &base, &fast(), &mut reporter).await;
        reporter.sweep_summary(&report);
        let out = text(reporter);

        assert!(out.ends_with("No retained messages found under: a\n"));
        assert!(!out.contains("Cleared"));
    }

    #[tokio::test]
    async fn sweep_output_reports_retries_and_failures() {
        let broker = MemoryBroker::new();
        broker.seed_retained("a/x", "1");
        broker.seed_retained("a/y", "2");
        broker.fail_publishes("a/x", 2);
        broker.fail_publishes("a/y", 3);
        let base = Topic::parse("a").unwrap();
        let mut reporter = ConsoleReporter::new(Vec::new());

        let report = workflow::sweep(&broker, &base, &fast(), &mut reporter).await;
        reporter.sweep_summary(&report);
        let out = text(reporter);

        assert!(out.contains("Error clearing a/x (attempt 2): publish error"));
        assert!(out.contains("Cleared retained message on topic: a/x"));
        assert!(out.contains("❌ Gave up clearing a/y after 3 attempts"));
        assert!(out.contains("❌ Failed to clear retained message on: a/y"));
        assert!(out.ends_with("Some retained messages could not be cleared.\n"));
    }

    #[tokio::test]
    async fn sweep_output_when_discovery_refused() {
        let broker = MemoryBroker::new();
        broker.seed_retained("a/x", "1");
        broker.reject_subscription("a");
        broker.reject_subscription("a/#");
        let base = Topic::parse("a").unwrap();
        let mut reporter = ConsoleReporter::new(Vec::new());

        let report = workflow::sweep(&broker, &base, &fast(), &mut reporter).await;
        reporter.sweep_summary(&report);
        let out = text(reporter);

        assert_eq!(out.matches("⚠️ Subscribe failed for a").count(), 2);
        assert!(out.contains("⚠️ Discovery incomplete under: a (subscription refused)"));
        assert!(!out.contains("No retained messages found"));
        assert!(out.contains("Summary: 0 found, 0 cleared, 0 confirmed, 0 failed"));
        assert!(out.ends_with("Some retained messages could not be cleared.\n"));
    }

    #[tokio::test]
    async fn probe_output() {
        let broker = MemoryBroker::new();
        let base = Topic::parse("a").unwrap();
        let report = workflow::probe(&broker, &base, retain_sweep_core::QoS::AtMostOnce)
            .await
            .unwrap();
        let mut reporter = ConsoleReporter::new(Vec::new());
        reporter.probe_summary(&report);
        assert_eq!(text(reporter), "Test message published to: a/test\n");
    }

    #[tokio::test]
    async fn pollute_output() {
        let broker = MemoryBroker::new();
        let base = Topic::parse("a").unwrap();
        let mut reporter = ConsoleReporter::new(Vec::new());

        let report = workflow::pollute(
            &broker,
            &base,
            2,
            &mut retain_sweep_core::XorShift64::new(1),
            chrono::Utc::now(),
            &fast(),
            &mut reporter,
        )
        .await
        .unwrap();
        reporter.pollute_summary(&report);
        let out = text(reporter);

        assert_eq!(out.matches("Published retained message to: a/pollute/").count(), 2);
        assert_eq!(out.matches("✅ Successfully published retained on:").count(), 2);
        assert!(out.contains("All retained messages successfully published!"));
    }
}
