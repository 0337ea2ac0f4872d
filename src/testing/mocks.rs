//! Scriptable doubles used across the unit and integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::auth::{AuthError, TokenSigner};
use crate::session::{
    Clock, CompletionStatus, ConnectionStatus, MessageDisposition, OutboundMessage,
    ReceivedMessage, SessionHandler, StatusReason,
};
use crate::wire::{
    ConnectCode, ConnectParams, QosLevel, WireEngine, WireError, WireEvent,
};

/// Signs tokens deterministically, no crypto involved.
pub struct FakeSigner;

impl TokenSigner for FakeSigner {
    fn sign(&self, _key: &str, scope: &str, expiry_unix: u64) -> Result<String, AuthError> {
        Ok(format!(
            "SharedAccessSignature sr={scope}&sig=fake&se={expiry_unix}"
        ))
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Clone)]
pub struct ManualClock {
    base: Instant,
    offset_millis: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_millis: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn advance(&self, delta: Duration) {
        self.offset_millis
            .fetch_add(delta.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_millis(self.offset_millis.load(Ordering::SeqCst))
    }
}

/// One recorded publish call.
#[derive(Debug, Clone)]
pub struct PublishRecord {
    pub packet_id: u16,
    pub topic: String,
    pub qos: QosLevel,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct MockEngineState {
    connects: Vec<ConnectParams>,
    disconnects: usize,
    publishes: Vec<PublishRecord>,
    subscribes: Vec<(u16, String, QosLevel)>,
    unsubscribes: Vec<(u16, String)>,
    io_options: Vec<(String, String)>,
    trace: Option<bool>,
    events: VecDeque<WireEvent>,
    fail_connects: usize,
    fail_publishes: usize,
    connack_code: ConnectCode,
    auto_connack: bool,
    auto_puback: bool,
    auto_suback: bool,
}

/// Shared view into a [`MockEngine`]'s recorded calls and scripting knobs.
/// Both halves stay usable after the engine is boxed into a session.
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockEngineState>>,
}

impl MockHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, MockEngineState> {
        self.state.lock().expect("mock engine state lock")
    }

    pub fn connects(&self) -> Vec<ConnectParams> {
        self.lock().connects.clone()
    }

    pub fn disconnects(&self) -> usize {
        self.lock().disconnects
    }

    pub fn publishes(&self) -> Vec<PublishRecord> {
        self.lock().publishes.clone()
    }

    pub fn subscribes(&self) -> Vec<(u16, String, QosLevel)> {
        self.lock().subscribes.clone()
    }

    pub fn unsubscribes(&self) -> Vec<(u16, String)> {
        self.lock().unsubscribes.clone()
    }

    pub fn io_options(&self) -> Vec<(String, String)> {
        self.lock().io_options.clone()
    }

    pub fn trace(&self) -> Option<bool> {
        self.lock().trace
    }

    /// Fail the next `count` connect calls.
    pub fn fail_connects(&self, count: usize) {
        self.lock().fail_connects = count;
    }

    /// Fail the next `count` publish calls.
    pub fn fail_publishes(&self, count: usize) {
        self.lock().fail_publishes = count;
    }

    /// Code returned by auto-generated connacks.
    pub fn set_connack_code(&self, code: ConnectCode) {
        self.lock().connack_code = code;
    }

    /// Answer every successful connect with a connack on the next service.
    pub fn auto_connack(&self, enabled: bool) {
        self.lock().auto_connack = enabled;
    }

    /// Acknowledge every QoS 1 publish on the next service.
    pub fn auto_puback(&self, enabled: bool) {
        self.lock().auto_puback = enabled;
    }

    /// Grant every subscribe on the next service.
    pub fn auto_suback(&self, enabled: bool) {
        self.lock().auto_suback = enabled;
    }

    /// Queue an event for the next service call.
    pub fn push_event(&self, event: WireEvent) {
        self.lock().events.push_back(event);
    }
}

/// In-memory [`WireEngine`] driven entirely by the test.
pub struct MockEngine {
    state: Arc<Mutex<MockEngineState>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockEngineState::default())),
        }
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockEngineState> {
        self.state.lock().expect("mock engine state lock")
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl WireEngine for MockEngine {
    fn connect(&mut self, params: &ConnectParams) -> Result<(), WireError> {
        let mut state = self.lock();
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(WireError::ConnectFailed("scripted failure".to_string()));
        }
        state.connects.push(params.clone());
        if state.auto_connack {
            let code = state.connack_code;
            state.events.push_back(WireEvent::ConnAck {
                session_present: false,
                code,
            });
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), WireError> {
        self.lock().disconnects += 1;
        Ok(())
    }

    fn publish(
        &mut self,
        packet_id: u16,
        topic: &str,
        qos: QosLevel,
        payload: &[u8],
    ) -> Result<(), WireError> {
        let mut state = self.lock();
        if state.fail_publishes > 0 {
            state.fail_publishes -= 1;
            return Err(WireError::PublishFailed("scripted failure".to_string()));
        }
        state.publishes.push(PublishRecord {
            packet_id,
            topic: topic.to_string(),
            qos,
            payload: payload.to_vec(),
        });
        if state.auto_puback && qos == QosLevel::AtLeastOnce {
            state.events.push_back(WireEvent::PubAck { packet_id });
        }
        Ok(())
    }

    fn subscribe(&mut self, packet_id: u16, filter: &str, qos: QosLevel) -> Result<(), WireError> {
        let mut state = self.lock();
        state.subscribes.push((packet_id, filter.to_string(), qos));
        if state.auto_suback {
            state.events.push_back(WireEvent::SubAck {
                packet_id,
                granted: vec![Some(qos)],
            });
        }
        Ok(())
    }

    fn unsubscribe(&mut self, packet_id: u16, filter: &str) -> Result<(), WireError> {
        self.lock().unsubscribes.push((packet_id, filter.to_string()));
        Ok(())
    }

    fn service(&mut self, sink: &mut dyn FnMut(WireEvent)) {
        loop {
            let event = self.lock().events.pop_front();
            match event {
                Some(event) => sink(event),
                None => return,
            }
        }
    }

    fn set_trace(&mut self, enabled: bool) {
        self.lock().trace = Some(enabled);
    }

    fn set_io_option(&mut self, name: &str, value: &str) -> Result<(), WireError> {
        self.lock()
            .io_options
            .push((name.to_string(), value.to_string()));
        Ok(())
    }
}

/// Handler that records every callback it receives.
#[derive(Default)]
pub struct RecordingHandler {
    pub disposition: Option<MessageDisposition>,
    pub statuses: Vec<(ConnectionStatus, StatusReason)>,
    pub completions: Vec<(Vec<u8>, CompletionStatus)>,
    pub received: Vec<ReceivedMessage>,
    pub methods: Vec<(String, String, Vec<u8>)>,
    pub twin_responses: Vec<(u16, String, Vec<u8>)>,
    pub desired: Vec<(Option<i64>, Vec<u8>)>,
    pub reported: Vec<(u32, u16)>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionHandler for RecordingHandler {
    fn message_received(&mut self, message: &ReceivedMessage) -> MessageDisposition {
        self.received.push(message.clone());
        self.disposition.unwrap_or(MessageDisposition::Accepted)
    }

    fn send_complete(&mut self, message: OutboundMessage, status: CompletionStatus) {
        self.completions.push((message.payload, status));
    }

    fn connection_status(&mut self, status: ConnectionStatus, reason: StatusReason) {
        self.statuses.push((status, reason));
    }

    fn method_invoked(&mut self, method: &str, request_id: &str, payload: &[u8]) {
        self.methods
            .push((method.to_string(), request_id.to_string(), payload.to_vec()));
    }

    fn twin_response(&mut self, status: u16, request_id: &str, payload: &[u8]) {
        self.twin_responses
            .push((status, request_id.to_string(), payload.to_vec()));
    }

    fn desired_properties(&mut self, version: Option<i64>, payload: &[u8]) {
        self.desired.push((version, payload.to_vec()));
    }

    fn reported_state_complete(&mut self, item_id: u32, status: u16) {
        self.reported.push((item_id, status));
    }
}
