use chrono::Utc;
use retain_sweep_core::workflow::{self, SweepSettings};
use retain_sweep_core::{BrokerSession, NoopObserver, QoS, RetryPolicy, Topic, XorShift64};
use retain_sweep_mqtt::{generated_client_id, MqttSession, MqttSessionConfig};
use std::time::Duration;

fn broker_config() -> Option<MqttSessionConfig> {
    if std::env::var("RETAIN_SWEEP_INTEGRATION").is_err() {
        eprintln!("Skipping integration test; set RETAIN_SWEEP_INTEGRATION=1 to run");
        return None;
    }

    let broker = std::env::var("RETAIN_SWEEP_BROKER")
        .unwrap_or_else(|_| "tcp://localhost:1883".to_string());

    Some(MqttSessionConfig {
        broker,
        client_id: generated_client_id(),
        ..Default::default()
    })
}

fn settings() -> SweepSettings {
    SweepSettings {
        qos: QoS::AtLeastOnce,
        discovery_window: Duration::from_secs(1),
        verification_window: Duration::from_secs(1),
        confirmation_window: Duration::from_secs(1),
        fixture_verification_window: Duration::from_millis(500),
        retry: RetryPolicy::default(),
    }
}

fn scratch_base() -> Topic {
    Topic::parse(format!("retain-sweep-it/{}", uuid_suffix())).unwrap()
}

fn uuid_suffix() -> String {
    generated_client_id().trim_start_matches("retain-sweep-").to_string()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pollute_then_sweep() {
    let Some(config) = broker_config() else {
        return;
    };
    let session = MqttSession::connect(&config).await.unwrap();
    let base = scratch_base();
    let settings = settings();

    let polluted = workflow::pollute(
        &session,
        &base,
        5,
        &mut XorShift64::from_clock(),
        Utc::now(),
        &settings,
        &mut NoopObserver,
    )
    .await
    .unwrap();
    assert!(polluted.all_published(), "{polluted:?}");

    let swept = workflow::sweep(&session, &base, &settings, &mut NoopObserver).await;
    for fixture in &polluted.fixtures {
        assert!(swept.discovery.topics.contains(fixture.topic.as_str()));
    }
    assert!(swept.all_cleared(), "{swept:?}");

    let again = workflow::sweep(&session, &base, &settings, &mut NoopObserver).await;
    assert!(again.nothing_found());

    session.disconnect(Duration::from_millis(250)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn verify_mode_round_trip() {
    let Some(config) = broker_config() else {
        return;
    };
    let session = MqttSession::connect(&config).await.unwrap();

    let report = workflow::verify_clearing(
        &session,
        &scratch_base(),
        3,
        &mut XorShift64::from_clock(),
        &settings(),
        &mut NoopObserver,
    )
    .await
    .unwrap();
    assert!(report.all_cleared(), "{report:?}");

    session.disconnect(Duration::from_millis(250)).await;
}
