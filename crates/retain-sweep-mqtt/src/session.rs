//! MQTT broker session over `rumqttc`.

use retain_sweep_core::session::{BrokerSession, Delivery, DeliveryHandler, QoS, SessionError};
use retain_sweep_core::topics::{Topic, TopicFilter};
use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet,
    SubscribeReasonCode,
};
use std::borrow::Cow;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use url::Url;

/// Default MQTT port.
pub const DEFAULT_PORT: u16 = 1883;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Configuration for an [`MqttSession`].
#[derive(Debug, Clone)]
pub struct MqttSessionConfig {
    /// Broker URI (e.g., <tcp://localhost:1883>)
    pub broker: String,
    /// Client ID for the MQTT connection
    pub client_id: String,
    /// Username, if the broker wants one
    pub username: Option<String>,
    /// Password sent with `username`
    pub password: Option<String>,
    /// Keep-alive interval
    pub keep_alive: Duration,
    /// How long to wait for CONNACK
    pub connect_timeout: Duration,
    /// How long to wait for any other acknowledgement
    pub ack_timeout: Duration,
}

impl Default for MqttSessionConfig {
    fn default() -> Self {
        Self {
            broker: "tcp://localhost:1883".to_string(),
            client_id: "retain-sweep".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(10),
        }
    }
}

/// Client ID used when none is configured.
#[must_use]
pub fn generated_client_id() -> String {
    format!("retain-sweep-{}", uuid::Uuid::new_v4())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckKind {
    /// QoS 0 publish written to the socket
    PublishSent,
    PubAck,
    PubComp,
    SubAck,
    UnsubAck,
}

impl AckKind {
    fn for_publish(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => Self::PublishSent,
            QoS::AtLeastOnce => Self::PubAck,
            QoS::ExactlyOnce => Self::PubComp,
        }
    }
}

struct PendingAck {
    /// Request the waiter belongs to
    request: u64,
    kind: AckKind,
    /// Packet id, known once the request has been written
    pkid: Option<u16>,
    tx: oneshot::Sender<Result<(), SessionError>>,
}

struct Route {
    filter: TopicFilter,
    handler: DeliveryHandler,
}

/// State shared between the control task and the event loop task.
///
/// Every publish, subscribe and unsubscribe handed to the client takes a
/// request number and joins `outbox`. The event loop writes them in that
/// order, so each outgoing packet pops the front entry and tells the waiter
/// its packet id. Acknowledgements then only complete the waiter whose
/// packet id they carry; a late ack for a timed-out request is dropped.
#[derive(Default)]
struct Shared {
    routes: Mutex<Vec<Route>>,
    pending: Mutex<Option<PendingAck>>,
    outbox: Mutex<VecDeque<u64>>,
    next_request: AtomicU64,
}

impl Shared {
    fn dispatch(&self, delivery: &Delivery) {
        let handlers: Vec<DeliveryHandler> = lock(&self.routes)
            .iter()
            .filter(|route| route.filter.matches(&delivery.topic))
            .map(|route| route.handler.clone())
            .collect();

        if handlers.is_empty() {
            tracing::debug!(topic = %delivery.topic, "No subscription for delivery");
        }
        for handler in handlers {
            handler(delivery);
        }
    }

    /// Take a request number and queue it behind the requests already sent.
    fn enqueue(&self) -> u64 {
        let request = self.next_request.fetch_add(1, Ordering::Relaxed);
        lock(&self.outbox).push_back(request);
        request
    }

    /// Forget a request the client never accepted.
    fn dequeue(&self, request: u64) {
        lock(&self.outbox).retain(|queued| *queued != request);
    }

    /// A publish, subscribe or unsubscribe was written with `pkid`.
    fn written(&self, pkid: u16) {
        let Some(request) = lock(&self.outbox).pop_front() else {
            tracing::debug!(pkid, "Outgoing packet without a queued request");
            return;
        };

        let mut pending = lock(&self.pending);
        let Some(waiter) = pending.as_mut().filter(|p| p.request == request) else {
            return;
        };
        if waiter.kind == AckKind::PublishSent {
            if let Some(waiter) = pending.take() {
                let _ = waiter.tx.send(Ok(()));
            }
        } else {
            waiter.pkid = Some(pkid);
        }
    }

    /// Resolve the in-flight request if it waits for `kind` on `pkid`.
    fn complete(&self, kind: AckKind, pkid: u16, result: Result<(), SessionError>) {
        let mut pending = lock(&self.pending);
        if pending
            .as_ref()
            .is_some_and(|p| p.kind == kind && p.pkid == Some(pkid))
        {
            if let Some(waiter) = pending.take() {
                let _ = waiter.tx.send(result);
            }
        } else {
            tracing::debug!(?kind, pkid, "Ignoring acknowledgement for no waiting request");
        }
    }

    /// Fail the in-flight request, whatever it waits for, and drop the
    /// queue of unwritten requests.
    fn fail_pending(&self, error: SessionError) {
        lock(&self.outbox).clear();
        if let Some(waiter) = lock(&self.pending).take() {
            let _ = waiter.tx.send(Err(error));
        }
    }

    fn add_route(&self, filter: &TopicFilter, handler: DeliveryHandler) {
        lock(&self.routes).push(Route {
            filter: filter.clone(),
            handler,
        });
    }

    fn remove_routes(&self, filter: &TopicFilter) {
        lock(&self.routes).retain(|route| &route.filter != filter);
    }
}

/// Connected MQTT session.
pub struct MqttSession {
    client: AsyncClient,
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
    ack_timeout: Duration,
}

impl MqttSession {
    /// Connect to the broker and wait for CONNACK.
    ///
    /// # Errors
    ///
    /// Returns error if the broker URI is invalid, the broker refuses the
    /// connection, or no CONNACK arrives within the connect timeout.
    pub async fn connect(config: &MqttSessionConfig) -> Result<Self, SessionError> {
        let (host, port) = parse_mqtt_url(&config.broker)?;

        let mut mqtt_options = MqttOptions::new(&config.client_id, host, port);
        mqtt_options.set_keep_alive(config.keep_alive);
        mqtt_options.set_clean_session(true);
        if let Some(username) = config.username.as_deref().filter(|u| !u.is_empty()) {
            mqtt_options.set_credentials(username, config.password.clone().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(mqtt_options, 100);
        let shared = Arc::new(Shared::default());
        let (connected_tx, connected_rx) = oneshot::channel();
        let task = tokio::spawn(drive(eventloop, shared.clone(), connected_tx));

        let outcome = match timeout(config.connect_timeout, connected_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::Connect("event loop stopped".to_string())),
            Err(_) => Err(SessionError::Connect(format!(
                "no CONNACK within {:?}",
                config.connect_timeout
            ))),
        };
        if let Err(err) = outcome {
            task.abort();
            return Err(err);
        }

        tracing::info!(broker = %config.broker, client_id = %config.client_id, "Connected to MQTT broker");

        Ok(Self {
            client,
            shared,
            task: Mutex::new(Some(task)),
            ack_timeout: config.ack_timeout,
        })
    }

    /// Install a waiter for `kind`, send the request, and wait for the
    /// acknowledgement.
    async fn request(
        &self,
        kind: AckKind,
        send: impl Future<Output = Result<(), ClientError>> + Send,
        on_send_error: fn(String) -> SessionError,
    ) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        let request = self.shared.enqueue();
        // a waiter left behind by a timed-out request is dropped here
        *lock(&self.shared.pending) = Some(PendingAck {
            request,
            kind,
            pkid: None,
            tx,
        });

        if let Err(err) = send.await {
            lock(&self.shared.pending).take();
            self.shared.dequeue(request);
            return Err(on_send_error(err.to_string()));
        }

        match timeout(self.ack_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::Disconnected),
            Err(_) => {
                lock(&self.shared.pending).take();
                Err(SessionError::AckTimeout(self.ack_timeout))
            }
        }
    }
}

impl BrokerSession for MqttSession {
    async fn publish(
        &self,
        topic: &Topic,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), SessionError> {
        tracing::debug!(topic = %topic, %qos, retain, payload_len = payload.len(), "Publishing");
        self.request(
            AckKind::for_publish(qos),
            self.client
                .publish(topic.as_str(), to_mqtt_qos(qos), retain, payload),
            SessionError::Publish,
        )
        .await
    }

    async fn subscribe(
        &self,
        filter: &TopicFilter,
        qos: QoS,
        handler: DeliveryHandler,
    ) -> Result<(), SessionError> {
        tracing::debug!(filter = %filter, %qos, "Subscribing");
        self.shared.add_route(filter, handler);

        let result = self
            .request(
                AckKind::SubAck,
                self.client.subscribe(filter.as_str(), to_mqtt_qos(qos)),
                SessionError::Subscribe,
            )
            .await;
        if let Err(err) = &result {
            self.shared.remove_routes(filter);
            if matches!(err, SessionError::AckTimeout(_)) {
                // the broker may still grant it; withdraw without waiting
                let request = self.shared.enqueue();
                if self.client.unsubscribe(filter.as_str()).await.is_err() {
                    self.shared.dequeue(request);
                }
            }
        }
        result
    }

    async fn unsubscribe(&self, filters: &[TopicFilter]) -> Result<(), SessionError> {
        let mut first_error = None;
        for filter in filters {
            tracing::debug!(filter = %filter, "Unsubscribing");
            let result = self
                .request(
                    AckKind::UnsubAck,
                    self.client.unsubscribe(filter.as_str()),
                    SessionError::Unsubscribe,
                )
                .await;
            self.shared.remove_routes(filter);
            if let Err(err) = result {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn disconnect(&self, grace: Duration) {
        if let Err(err) = self.client.disconnect().await {
            tracing::warn!(error = %err, "Failed to send DISCONNECT");
        }

        let task = lock(&self.task).take();
        if let Some(mut task) = task {
            if timeout(grace, &mut task).await.is_err() {
                tracing::debug!(?grace, "Event loop still running after grace period");
                task.abort();
            }
        }
        tracing::info!("Disconnected from MQTT broker");
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

async fn drive(
    mut eventloop: EventLoop,
    shared: Arc<Shared>,
    connected: oneshot::Sender<Result<(), SessionError>>,
) {
    let mut connected = Some(connected);

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let result = if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(SessionError::Connect(format!("refused: {:?}", ack.code)))
                };
                match connected.take() {
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    None => tracing::info!("Reconnected to MQTT broker"),
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                tracing::debug!(
                    topic = %publish.topic,
                    retained = publish.retain,
                    payload_len = publish.payload.len(),
                    "Received MQTT message"
                );
                shared.dispatch(&Delivery {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                    retained: publish.retain,
                });
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                shared.complete(AckKind::PubAck, ack.pkid, Ok(()));
            }
            Ok(Event::Incoming(Packet::PubComp(ack))) => {
                shared.complete(AckKind::PubComp, ack.pkid, Ok(()));
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let refused = ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure));
                let result = if refused {
                    Err(SessionError::Rejected("subscription refused".to_string()))
                } else {
                    Ok(())
                };
                shared.complete(AckKind::SubAck, ack.pkid, result);
            }
            Ok(Event::Incoming(Packet::UnsubAck(ack))) => {
                shared.complete(AckKind::UnsubAck, ack.pkid, Ok(()));
            }
            Ok(Event::Outgoing(
                Outgoing::Publish(pkid) | Outgoing::Subscribe(pkid) | Outgoing::Unsubscribe(pkid),
            )) => shared.written(pkid),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::debug!("DISCONNECT sent, stopping event loop");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if let Some(tx) = connected.take() {
                    let _ = tx.send(Err(SessionError::Connect(e.to_string())));
                    break;
                }
                tracing::error!(error = %e, "MQTT error");
                shared.fail_pending(SessionError::Connect(e.to_string()));
                // rumqttc reconnects on the next poll
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

fn to_mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

/// Parse a broker URI into host and port.
///
/// Accepts `tcp://host[:port]`, `mqtt://host[:port]` and bare
/// `host[:port]`, which is read as `tcp://`.
///
/// # Errors
///
/// Returns [`SessionError::Connect`] for other schemes or malformed input.
pub fn parse_mqtt_url(input: &str) -> Result<(String, u16), SessionError> {
    let uri: Cow<'_, str> = if input.contains("://") {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(format!("tcp://{input}"))
    };

    let url = Url::parse(&uri).map_err(|e| bad_broker(input, &e))?;
    if !matches!(url.scheme(), "tcp" | "mqtt") {
        return Err(bad_broker(input, &format!("unsupported scheme '{}'", url.scheme())));
    }
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| bad_broker(input, &"missing host"))?;

    Ok((host.to_string(), url.port().unwrap_or(DEFAULT_PORT)))
}

fn bad_broker(input: &str, detail: &dyn std::fmt::Display) -> SessionError {
    SessionError::Connect(format!("invalid broker URI {input}: {detail}"))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
