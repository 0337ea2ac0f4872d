//! Abstraction over the MQTT engine.
//!
//! The session core never talks to a socket; it drives a [`WireEngine`] and
//! reacts to the [`WireEvent`]s the engine surfaces. The production engine
//! lives in [`rumqtt`]; tests substitute a scripted mock.

pub mod rumqtt;

use thiserror::Error;

pub use rumqtt::RumqttEngine;

/// Delivery quality of service for publishes and subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosLevel {
    AtMostOnce,
    AtLeastOnce,
}

/// Broker verdict on a connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectCode {
    #[default]
    Accepted,
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadUserNamePassword,
    NotAuthorized,
    Unknown,
}

/// Client certificate and private key in PEM form.
#[derive(Debug, Clone)]
pub struct X509Material {
    pub certificate: String,
    pub private_key: String,
}

/// Everything an engine needs to open a connection.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: String,
    /// Absent for certificate authentication.
    pub password: Option<String>,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
    pub x509: Option<X509Material>,
}

/// Event surfaced by the engine during [`WireEngine::service`].
#[derive(Debug, Clone)]
pub enum WireEvent {
    ConnAck {
        session_present: bool,
        code: ConnectCode,
    },
    PubAck {
        packet_id: u16,
    },
    SubAck {
        packet_id: u16,
        granted: Vec<Option<QosLevel>>,
    },
    UnsubAck {
        packet_id: u16,
    },
    Message {
        topic: String,
        payload: Vec<u8>,
    },
    Disconnected {
        reason: String,
    },
    PingTimeout,
}

/// Errors raised by a wire engine.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("not connected")]
    NotConnected,

    #[error("connection failed: {0}")]
    ConnectFailed(String),

    #[error("publish failed: {0}")]
    PublishFailed(String),

    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("i/o option {name} not supported: {reason}")]
    Unsupported { name: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),
}

/// A pollable MQTT engine.
///
/// All calls are non-blocking; progress happens inside [`service`], which the
/// session invokes once per work cycle. Packet ids are chosen by the caller
/// so acknowledgement events can be correlated back to queued messages.
///
/// [`service`]: WireEngine::service
pub trait WireEngine: Send {
    fn connect(&mut self, params: &ConnectParams) -> Result<(), WireError>;

    fn disconnect(&mut self) -> Result<(), WireError>;

    fn publish(
        &mut self,
        packet_id: u16,
        topic: &str,
        qos: QosLevel,
        payload: &[u8],
    ) -> Result<(), WireError>;

    fn subscribe(&mut self, packet_id: u16, filter: &str, qos: QosLevel) -> Result<(), WireError>;

    fn unsubscribe(&mut self, packet_id: u16, filter: &str) -> Result<(), WireError>;

    /// Drains pending network activity, invoking `sink` once per event.
    fn service(&mut self, sink: &mut dyn FnMut(WireEvent));

    /// Toggles verbose packet tracing.
    fn set_trace(&mut self, enabled: bool);

    /// Applies an engine-specific i/o option (proxy, TLS tuning, and the like).
    fn set_io_option(&mut self, name: &str, value: &str) -> Result<(), WireError>;
}
