//! The device session state machine.
//!
//! A [`Session`] owns one logical connection to the hub: it mints
//! credentials, opens the wire engine lazily when work is queued, keeps
//! subscriptions established across reconnects, retransmits unacknowledged
//! telemetry, and rotates expiring tokens. All progress happens inside
//! [`Session::do_work`], which the host application calls from its own loop;
//! nothing here spawns threads or blocks.

mod queue;
mod retry;
mod subscriptions;

pub use queue::{CompletionStatus, DispatchQueue, OutboundMessage, MAX_RESEND_COUNT, RESEND_INTERVAL};
pub use retry::{RetryDecision, RetryPolicy, RetryState, DEFAULT_RETRY_BASE, MAX_RETRY_DELAY};
pub use subscriptions::{filter_for, SubscriptionSet, TopicKind};

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{AuthError, AuthMode, CredentialManager, TokenSigner};
use crate::config::DeviceConfig;
use crate::error::{SessionError, SessionResult};
use crate::protocol::{
    method_response_topic, parse_inbound, telemetry_base, twin_get_topic, twin_reported_topic,
    InboundTopic,
};
use crate::wire::{ConnectCode, ConnectParams, QosLevel, WireEngine, WireEvent, X509Material};

/// Default broker keep-alive, in seconds.
pub const DEFAULT_KEEP_ALIVE_SECS: u16 = 240;
const BROKER_PORT: u16 = 8883;

/// Lifecycle phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection and no attempt in progress.
    Idle,
    /// Credential obtained, connect being issued.
    Connecting,
    /// Connect sent, waiting for the broker's verdict.
    WaitingForConnAck,
    /// Broker accepted; subscriptions being re-established.
    Authenticated,
    /// Fully connected and doing work.
    SteadyState,
    /// Connection lost; retry policy governs what happens next.
    Disconnected,
    /// Being torn down.
    ShuttingDown,
}

impl SessionState {
    fn name(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::WaitingForConnAck => "waiting_for_connack",
            SessionState::Authenticated => "authenticated",
            SessionState::SteadyState => "steady_state",
            SessionState::Disconnected => "disconnected",
            SessionState::ShuttingDown => "shutting_down",
        }
    }
}

/// Connection status reported to the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Authenticated,
    Unauthenticated,
}

/// Why the status changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusReason {
    ConnectionOk,
    ExpiredToken,
    BadCredential,
    DeviceDisabled,
    RetryExpired,
    CommunicationError,
}

/// Verdict the handler returns for a received cloud-to-device message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDisposition {
    Accepted,
    Rejected,
    Abandoned,
}

/// Whether any telemetry is still queued or in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Idle,
    Busy,
}

/// Outcome of [`Session::process_item`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessResult {
    /// Item handed to the wire.
    Ok,
    /// No usable connection; retry after the session reconnects.
    NotConnected,
    /// Preconditions not yet met (subscription still establishing); retry
    /// on a later cycle.
    Continue,
    /// Item could not be sent.
    Error,
}

/// Work items beyond plain telemetry.
#[derive(Debug, Clone)]
pub enum WorkItem {
    /// Report device state to the twin; `item_id` is echoed back in
    /// [`SessionHandler::reported_state_complete`].
    ReportedState { item_id: u32, payload: Vec<u8> },
    /// Answer a direct-method invocation.
    MethodResponse {
        request_id: String,
        status: i32,
        payload: Vec<u8>,
    },
}

/// A cloud-to-device message delivered to the handler.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub payload: Vec<u8>,
    pub properties: BTreeMap<String, String>,
}

/// Application callbacks. Every method has a default so handlers implement
/// only what they care about.
pub trait SessionHandler {
    /// A cloud-to-device message arrived.
    fn message_received(&mut self, _message: &ReceivedMessage) -> MessageDisposition {
        MessageDisposition::Accepted
    }

    /// A queued telemetry message reached a terminal state.
    fn send_complete(&mut self, _message: OutboundMessage, _status: CompletionStatus) {}

    /// The connection status changed.
    fn connection_status(&mut self, _status: ConnectionStatus, _reason: StatusReason) {}

    /// A direct method was invoked; answer with
    /// [`WorkItem::MethodResponse`] carrying the same request id.
    fn method_invoked(&mut self, _method: &str, _request_id: &str, _payload: &[u8]) {}

    /// A twin document arrived for a [`Session::request_twin`] call.
    fn twin_response(&mut self, _status: u16, _request_id: &str, _payload: &[u8]) {}

    /// The desired-properties document changed.
    fn desired_properties(&mut self, _version: Option<i64>, _payload: &[u8]) {}

    /// A reported-state item completed. `status` is the hub's response code;
    /// zero means the connection dropped before a response arrived.
    fn reported_state_complete(&mut self, _item_id: u32, _status: u16) {}
}

/// Time source, injectable so timer behavior is testable.
pub trait Clock: Send {
    fn now(&self) -> Instant;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

fn next_id(current: u16) -> u16 {
    if current >= u16::MAX - 1 {
        1
    } else {
        current + 1
    }
}

pub struct Session {
    device_id: String,
    host: String,
    telemetry_base: String,
    engine: Box<dyn WireEngine>,
    credentials: CredentialManager,
    subscriptions: SubscriptionSet,
    queue: DispatchQueue,
    retry: RetryState,
    clock: Box<dyn Clock>,
    state: SessionState,
    packet_id: u16,
    keep_alive_secs: u16,
    x509_certificate: Option<String>,
    x509_private_key: Option<String>,
    /// Twin get request ids not yet published (waiting for the twin
    /// subscription to be confirmed).
    queued_twin_gets: Vec<String>,
    /// Twin get request ids published and awaiting a response.
    pending_twin_gets: Vec<String>,
    /// Reported-state request ids awaiting a response, with the caller's
    /// item id.
    pending_reported: Vec<(String, u32)>,
    inflight_subs: Vec<(u16, TopicKind)>,
    retry_exhausted: bool,
}

impl Session {
    /// Builds a session over the production engine, deriving the auth mode
    /// from the config's credential fields.
    pub fn create(
        config: DeviceConfig,
        signer: Option<Box<dyn TokenSigner>>,
    ) -> SessionResult<Self> {
        Self::create_with(
            config,
            signer,
            Box::new(crate::wire::RumqttEngine::new()),
            Box::new(SystemClock),
        )
    }

    /// Builds a session over an injected engine and clock.
    pub fn create_with(
        config: DeviceConfig,
        signer: Option<Box<dyn TokenSigner>>,
        engine: Box<dyn WireEngine>,
        clock: Box<dyn Clock>,
    ) -> SessionResult<Self> {
        config.validate()?;
        let host = config.host();
        let device_id = config.device_id.clone();
        let mode = if let Some(key) = &config.device_key {
            AuthMode::DeviceKey(key.clone())
        } else if let Some(token) = &config.sas_token {
            AuthMode::SasToken(token.clone())
        } else {
            AuthMode::X509
        };
        let scope = format!("{host}/devices/{device_id}");
        let credentials = CredentialManager::new(mode, signer, scope)?;

        Ok(Self {
            telemetry_base: telemetry_base(&device_id),
            device_id,
            host,
            engine,
            credentials,
            subscriptions: SubscriptionSet::new(),
            queue: DispatchQueue::new(),
            retry: RetryState::new(RetryPolicy::ExponentialJitter, None),
            clock,
            state: SessionState::Idle,
            packet_id: 0,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            x509_certificate: None,
            x509_private_key: None,
            queued_twin_gets: Vec::new(),
            pending_twin_gets: Vec::new(),
            pending_reported: Vec::new(),
            inflight_subs: Vec::new(),
            retry_exhausted: false,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Queues a telemetry message. Delivery starts on a later
    /// [`do_work`](Self::do_work) cycle once a connection exists.
    pub fn send_telemetry(&mut self, message: OutboundMessage) -> SessionResult<()> {
        if self.state == SessionState::ShuttingDown {
            return Err(SessionError::ShuttingDown);
        }
        self.queue.enqueue(message);
        Ok(())
    }

    /// `Busy` while any telemetry is pending or awaiting acknowledgement.
    pub fn get_send_status(&self) -> SendStatus {
        if self.queue.is_empty() {
            SendStatus::Idle
        } else {
            SendStatus::Busy
        }
    }

    /// Registers interest in cloud-to-device messages.
    pub fn subscribe_cloud_to_device(&mut self) {
        self.subscriptions.request(TopicKind::CloudToDevice);
    }

    pub fn unsubscribe_cloud_to_device(&mut self) {
        self.withdraw(TopicKind::CloudToDevice);
    }

    /// Registers interest in direct-method invocations.
    pub fn subscribe_methods(&mut self) {
        self.subscriptions.request(TopicKind::Methods);
    }

    pub fn unsubscribe_methods(&mut self) {
        self.withdraw(TopicKind::Methods);
    }

    /// Registers interest in the twin: responses to get/reported requests
    /// plus desired-property change notifications.
    pub fn subscribe_twin(&mut self) {
        self.subscriptions.request(TopicKind::TwinResponse);
        self.subscriptions.request(TopicKind::DesiredProperties);
    }

    pub fn unsubscribe_twin(&mut self) {
        self.withdraw(TopicKind::TwinResponse);
        self.withdraw(TopicKind::DesiredProperties);
    }

    /// Asks the hub for the full twin document. The response arrives through
    /// [`SessionHandler::twin_response`] carrying the returned request id.
    /// Requires an established connection.
    pub fn request_twin(&mut self) -> SessionResult<String> {
        if self.state != SessionState::SteadyState {
            return Err(SessionError::NotConnected {
                state: self.state.name(),
            });
        }
        self.subscriptions.request(TopicKind::TwinResponse);
        self.subscriptions.request(TopicKind::DesiredProperties);
        let request_id = Uuid::new_v4().to_string();
        self.queued_twin_gets.push(request_id.clone());
        Ok(request_id)
    }

    /// Sends a reported-state document or a method response.
    pub fn process_item(&mut self, item: WorkItem) -> ProcessResult {
        if self.state != SessionState::SteadyState {
            return ProcessResult::NotConnected;
        }
        match item {
            WorkItem::ReportedState { item_id, payload } => {
                self.subscriptions.request(TopicKind::TwinResponse);
                self.subscriptions.request(TopicKind::DesiredProperties);
                if !self.subscriptions.is_acknowledged(TopicKind::TwinResponse) {
                    return ProcessResult::Continue;
                }
                let request_id = Uuid::new_v4().to_string();
                let topic = twin_reported_topic(&request_id);
                let packet_id = self.take_packet_id();
                match self
                    .engine
                    .publish(packet_id, &topic, QosLevel::AtMostOnce, &payload)
                {
                    Ok(()) => {
                        debug!(%request_id, item_id, "reported state sent");
                        self.pending_reported.push((request_id, item_id));
                        ProcessResult::Ok
                    }
                    Err(e) => {
                        warn!(error = %e, item_id, "reported state publish failed");
                        ProcessResult::Error
                    }
                }
            }
            WorkItem::MethodResponse {
                request_id,
                status,
                payload,
            } => {
                let topic = method_response_topic(status, &request_id);
                let packet_id = self.take_packet_id();
                match self
                    .engine
                    .publish(packet_id, &topic, QosLevel::AtMostOnce, &payload)
                {
                    Ok(()) => ProcessResult::Ok,
                    Err(e) => {
                        warn!(error = %e, %request_id, "method response publish failed");
                        ProcessResult::Error
                    }
                }
            }
        }
    }

    /// Replaces the reconnect policy and restarts its failure window. Also
    /// re-arms a session that had given up retrying.
    pub fn set_retry_policy(&mut self, policy: RetryPolicy, timeout: Option<Duration>) {
        info!(?policy, ?timeout, "retry policy changed");
        self.retry.reconfigure(policy, timeout);
        self.retry_exhausted = false;
    }

    /// Applies a named runtime option.
    ///
    /// Known names: `x509certificate`, `x509privatekey`, `logtrace`,
    /// `keepalive`. Anything else is forwarded to the engine.
    pub fn set_option(&mut self, name: &str, value: &str) -> SessionResult<()> {
        if name.is_empty() || value.is_empty() {
            return Err(SessionError::invalid_argument(
                "option name and value must be non-empty",
            ));
        }
        match name {
            "x509certificate" => {
                if !self.credentials.is_certificate() {
                    return Err(SessionError::invalid_argument(
                        "x509certificate only applies to certificate authentication",
                    ));
                }
                self.x509_certificate = Some(value.to_string());
                Ok(())
            }
            "x509privatekey" => {
                if !self.credentials.is_certificate() {
                    return Err(SessionError::invalid_argument(
                        "x509privatekey only applies to certificate authentication",
                    ));
                }
                self.x509_private_key = Some(value.to_string());
                Ok(())
            }
            "logtrace" => {
                let enabled = match value {
                    "true" => true,
                    "false" => false,
                    _ => {
                        return Err(SessionError::invalid_argument(
                            "logtrace must be true or false",
                        ))
                    }
                };
                self.engine.set_trace(enabled);
                Ok(())
            }
            "keepalive" => {
                let seconds: u16 = value.parse().map_err(|_| {
                    SessionError::invalid_argument("keepalive must be a number of seconds")
                })?;
                if seconds == self.keep_alive_secs {
                    return Ok(());
                }
                self.keep_alive_secs = seconds;
                if self.is_connected() {
                    info!(seconds, "keep-alive changed, cycling connection");
                    self.drop_connection();
                    self.state = SessionState::Idle;
                }
                Ok(())
            }
            _ => self
                .engine
                .set_io_option(name, value)
                .map_err(SessionError::from),
        }
    }

    /// Runs one cooperative work cycle against the handler: advances the
    /// connection state machine, flushes queues, scans retransmit timers,
    /// and dispatches any events the engine has surfaced.
    pub fn do_work(&mut self, handler: &mut dyn SessionHandler) -> SessionResult<()> {
        let now = self.clock.now();
        match self.state {
            SessionState::ShuttingDown => return Ok(()),
            SessionState::Idle => {
                if self.has_pending_work() && !self.retry_exhausted {
                    self.begin_connect(handler)?;
                }
            }
            SessionState::Disconnected => {
                if !self.retry_exhausted {
                    match self.retry.evaluate(now) {
                        RetryDecision::Attempt => self.begin_connect(handler)?,
                        RetryDecision::Wait => {}
                        RetryDecision::Expired => {
                            warn!("reconnect retries exhausted");
                            self.retry_exhausted = true;
                            handler
                                .connection_status(
                                    ConnectionStatus::Unauthenticated,
                                    StatusReason::RetryExpired,
                                );
                            for message in self.queue.drain_all() {
                                handler.send_complete(message, CompletionStatus::Failed);
                            }
                        }
                    }
                }
            }
            SessionState::Connecting
            | SessionState::WaitingForConnAck
            | SessionState::Authenticated => {}
            SessionState::SteadyState => {
                if self.credentials.needs_renewal(now) {
                    info!("access token nearing expiry, cycling connection");
                    self.drop_connection();
                    self.state = SessionState::Idle;
                } else {
                    self.service_steady_state(handler, now);
                }
            }
        }

        self.dispatch_events(handler);
        Ok(())
    }

    /// Tears the session down: withdraws established subscriptions, closes
    /// the connection, and reports every queued message as destroyed.
    pub fn destroy(mut self, handler: &mut dyn SessionHandler) {
        let was_connected = self.is_connected();
        self.state = SessionState::ShuttingDown;
        if was_connected {
            for kind in self.subscriptions.acknowledged() {
                let filter = filter_for(kind, &self.device_id);
                let packet_id = self.take_packet_id();
                if let Err(e) = self.engine.unsubscribe(packet_id, &filter) {
                    debug!(error = %e, ?kind, "unsubscribe on teardown failed");
                }
            }
            self.drop_connection();
        }
        for message in self.queue.drain_all() {
            handler.send_complete(message, CompletionStatus::Destroyed);
        }
        info!(device_id = %self.device_id, "session destroyed");
    }

    fn is_connected(&self) -> bool {
        matches!(
            self.state,
            SessionState::WaitingForConnAck
                | SessionState::Authenticated
                | SessionState::SteadyState
        )
    }

    fn has_pending_work(&self) -> bool {
        !self.queue.is_empty()
            || !self.subscriptions.pending().is_empty()
            || !self.queued_twin_gets.is_empty()
    }

    fn take_packet_id(&mut self) -> u16 {
        self.packet_id = next_id(self.packet_id);
        self.packet_id
    }

    /// Closes the wire connection and forgets per-connection state so a
    /// later connect starts clean.
    fn drop_connection(&mut self) {
        if let Err(e) = self.engine.disconnect() {
            debug!(error = %e, "disconnect failed");
        }
        self.subscriptions.reset_acknowledgements();
        self.inflight_subs.clear();
        // Published twin gets will never be answered on a new connection.
        let mut unanswered: Vec<String> = self.pending_twin_gets.drain(..).collect();
        self.queued_twin_gets.append(&mut unanswered);
    }

    fn begin_connect(&mut self, handler: &mut dyn SessionHandler) -> SessionResult<()> {
        self.state = SessionState::Connecting;
        let now = self.clock.now();
        let credential = match self.credentials.obtain(now) {
            Ok(credential) => credential,
            Err(AuthError::ExpiredToken(expiry)) => {
                // A caller-supplied token never rotates, so retrying is
                // pointless.
                warn!(expiry, "supplied access token has expired");
                handler.connection_status(
                    ConnectionStatus::Unauthenticated,
                    StatusReason::ExpiredToken,
                );
                self.state = SessionState::Disconnected;
                self.retry_exhausted = true;
                return Err(AuthError::ExpiredToken(expiry).into());
            }
            Err(e) => {
                self.state = SessionState::Disconnected;
                return Err(e.into());
            }
        };

        let x509 = if self.credentials.is_certificate() {
            match (&self.x509_certificate, &self.x509_private_key) {
                (Some(certificate), Some(private_key)) => Some(X509Material {
                    certificate: certificate.clone(),
                    private_key: private_key.clone(),
                }),
                _ => {
                    self.state = SessionState::Disconnected;
                    self.retry_exhausted = true;
                    return Err(SessionError::invalid_argument(
                        "certificate authentication requires x509certificate and x509privatekey",
                    ));
                }
            }
        } else {
            None
        };

        let params = ConnectParams {
            host: self.host.clone(),
            port: BROKER_PORT,
            client_id: self.device_id.clone(),
            username: format!(
                "{}/{}/DeviceClientType={}%2F{}",
                self.host,
                self.device_id,
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
            ),
            password: credential.token,
            keep_alive_secs: self.keep_alive_secs,
            clean_session: false,
            x509,
        };

        info!(host = %self.host, device_id = %self.device_id, "connecting");
        match self.engine.connect(&params) {
            Ok(()) => {
                self.state = SessionState::WaitingForConnAck;
                self.retry.note_attempt(now);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "connect failed");
                self.state = SessionState::Disconnected;
                self.retry.note_failure(now);
                self.retry.note_attempt(now);
                Ok(())
            }
        }
    }

    fn service_steady_state(&mut self, handler: &mut dyn SessionHandler, now: Instant) {
        // Retransmit timers first so a freed slot is visible to the drain.
        let failed = {
            let engine = &mut *self.engine;
            let packet_id = &mut self.packet_id;
            let mut next = || {
                *packet_id = next_id(*packet_id);
                *packet_id
            };
            self.queue
                .scan_timeouts(engine, now, &mut next, &self.telemetry_base)
        };
        for message in failed {
            handler.send_complete(message, CompletionStatus::Failed);
        }

        self.issue_pending_subscriptions();
        self.flush_twin_gets();

        let engine = &mut *self.engine;
        let packet_id = &mut self.packet_id;
        let mut next = || {
            *packet_id = next_id(*packet_id);
            *packet_id
        };
        self.queue
            .drain_pending(engine, now, &mut next, &self.telemetry_base);
    }

    fn issue_pending_subscriptions(&mut self) {
        for kind in self.subscriptions.pending() {
            if self.inflight_subs.iter().any(|(_, k)| *k == kind) {
                continue;
            }
            let filter = filter_for(kind, &self.device_id);
            let packet_id = self.take_packet_id();
            match self
                .engine
                .subscribe(packet_id, &filter, QosLevel::AtLeastOnce)
            {
                Ok(()) => {
                    debug!(?kind, %filter, "subscribe issued");
                    self.inflight_subs.push((packet_id, kind));
                }
                Err(e) => {
                    warn!(error = %e, ?kind, "subscribe failed");
                    return;
                }
            }
        }
    }

    /// Publishes twin get requests once the response subscription is live.
    fn flush_twin_gets(&mut self) {
        if !self.subscriptions.is_acknowledged(TopicKind::TwinResponse) {
            return;
        }
        while let Some(request_id) = self.queued_twin_gets.first().cloned() {
            let topic = twin_get_topic(&request_id);
            let packet_id = self.take_packet_id();
            match self
                .engine
                .publish(packet_id, &topic, QosLevel::AtMostOnce, &[])
            {
                Ok(()) => {
                    debug!(%request_id, "twin get sent");
                    self.queued_twin_gets.remove(0);
                    self.pending_twin_gets.push(request_id);
                }
                Err(e) => {
                    warn!(error = %e, "twin get publish failed");
                    return;
                }
            }
        }
    }

    fn withdraw(&mut self, kind: TopicKind) {
        if !self.subscriptions.is_requested(kind) {
            return;
        }
        let needs_wire = self.subscriptions.clear(kind);
        self.inflight_subs.retain(|(_, k)| *k != kind);
        if needs_wire && self.state == SessionState::SteadyState {
            let filter = filter_for(kind, &self.device_id);
            let packet_id = self.take_packet_id();
            if let Err(e) = self.engine.unsubscribe(packet_id, &filter) {
                warn!(error = %e, ?kind, "unsubscribe failed");
            }
        }
    }

    fn dispatch_events(&mut self, handler: &mut dyn SessionHandler) {
        let mut events = Vec::new();
        self.engine.service(&mut |event| events.push(event));
        for event in events {
            self.handle_event(event, handler);
        }
    }

    fn handle_event(&mut self, event: WireEvent, handler: &mut dyn SessionHandler) {
        match event {
            WireEvent::ConnAck {
                session_present,
                code: ConnectCode::Accepted,
            } => {
                info!(session_present, "connection established");
                self.state = SessionState::Authenticated;
                self.retry.reset();
                self.retry_exhausted = false;
                handler.connection_status(
                    ConnectionStatus::Authenticated,
                    StatusReason::ConnectionOk,
                );
                self.issue_pending_subscriptions();
                self.state = SessionState::SteadyState;
            }
            WireEvent::ConnAck { code, .. } => {
                let reason = match code {
                    ConnectCode::BadUserNamePassword => StatusReason::BadCredential,
                    ConnectCode::NotAuthorized => StatusReason::DeviceDisabled,
                    _ => StatusReason::CommunicationError,
                };
                warn!(?code, "connection refused");
                handler.connection_status(ConnectionStatus::Unauthenticated, reason);
                self.drop_connection();
                self.state = SessionState::Disconnected;
                // Credential refusals stay retryable: keys and device state
                // can be rotated externally while the session keeps running.
                self.retry.note_failure(self.clock.now());
            }
            WireEvent::PubAck { packet_id } => {
                if let Some(message) = self.queue.acknowledge(packet_id) {
                    handler.send_complete(message, CompletionStatus::Ok);
                } else {
                    debug!(packet_id, "puback for unknown packet");
                }
            }
            WireEvent::SubAck { packet_id, granted } => {
                let Some(index) = self
                    .inflight_subs
                    .iter()
                    .position(|(id, _)| *id == packet_id)
                else {
                    debug!(packet_id, "suback for unknown packet");
                    return;
                };
                let (_, kind) = self.inflight_subs.remove(index);
                if granted.first().copied().flatten().is_some() {
                    debug!(?kind, "subscription confirmed");
                    self.subscriptions.acknowledge(kind);
                } else {
                    warn!(?kind, "subscription rejected by broker");
                }
            }
            WireEvent::UnsubAck { packet_id } => {
                debug!(packet_id, "unsubscribe confirmed");
            }
            WireEvent::Message { topic, payload } => {
                self.handle_message(&topic, payload, handler);
            }
            WireEvent::Disconnected { reason } => {
                warn!(%reason, "connection lost");
                self.fail_unanswered_reported(handler);
                self.drop_connection();
                self.state = SessionState::Disconnected;
                self.retry.note_failure(self.clock.now());
                handler.connection_status(
                    ConnectionStatus::Unauthenticated,
                    StatusReason::CommunicationError,
                );
            }
            WireEvent::PingTimeout => {
                warn!("keep-alive ping timed out");
                self.fail_unanswered_reported(handler);
                self.drop_connection();
                self.state = SessionState::Disconnected;
                self.retry.note_failure(self.clock.now());
                handler.connection_status(
                    ConnectionStatus::Unauthenticated,
                    StatusReason::CommunicationError,
                );
            }
        }
    }

    fn handle_message(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        handler: &mut dyn SessionHandler,
    ) {
        match parse_inbound(&self.device_id, topic) {
            Some(InboundTopic::CloudToDevice { properties }) => {
                let message = ReceivedMessage {
                    payload,
                    properties,
                };
                let disposition = handler.message_received(&message);
                debug!(?disposition, "cloud-to-device message handled");
            }
            Some(InboundTopic::TwinResponse { status, request_id }) => {
                if let Some(index) = self
                    .pending_reported
                    .iter()
                    .position(|(rid, _)| *rid == request_id)
                {
                    let (_, item_id) = self.pending_reported.remove(index);
                    handler.reported_state_complete(item_id, status);
                } else if let Some(index) = self
                    .pending_twin_gets
                    .iter()
                    .position(|rid| *rid == request_id)
                {
                    self.pending_twin_gets.remove(index);
                    handler.twin_response(status, &request_id, &payload);
                } else {
                    debug!(%request_id, status, "twin response with unknown request id");
                }
            }
            Some(InboundTopic::DesiredProperties { version }) => {
                handler.desired_properties(version, &payload);
            }
            Some(InboundTopic::MethodInvoke { method, request_id }) => {
                handler.method_invoked(&method, &request_id, &payload);
            }
            None => {
                debug!(topic, "message on unrecognized topic dropped");
            }
        }
    }

    /// Reported-state requests in flight when the connection drops will
    /// never be answered; surface them with a zero status.
    fn fail_unanswered_reported(&mut self, handler: &mut dyn SessionHandler) {
        for (request_id, item_id) in self.pending_reported.drain(..) {
            debug!(%request_id, item_id, "reported state unanswered at disconnect");
            handler.reported_state_complete(item_id, 0);
        }
    }
}
