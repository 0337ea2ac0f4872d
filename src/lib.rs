//! Device-side hub session over MQTT.
//!
//! `hublink` keeps one device connected to its cloud hub: telemetry with
//! at-least-once delivery and bounded retransmission, cloud-to-device
//! messages, device twin state, and direct methods. The session is a
//! single-threaded state machine the host drives from its own loop via
//! [`Session::do_work`]; connections are opened lazily, credentials are
//! rotated before they expire, and reconnects follow a configurable
//! backoff policy.
//!
//! ```no_run
//! use hublink::{DeviceConfig, OutboundMessage, Session, SessionHandler};
//!
//! struct Handler;
//! impl SessionHandler for Handler {}
//!
//! # fn main() -> Result<(), hublink::SessionError> {
//! let config = DeviceConfig {
//!     device_id: "sensor-1".to_string(),
//!     hub_name: "contoso".to_string(),
//!     hub_suffix: "example-hub.net".to_string(),
//!     gateway_host: None,
//!     device_key: None,
//!     sas_token: Some("SharedAccessSignature sr=scope&sig=abc&se=9999999999".to_string()),
//! };
//! let mut session = Session::create(config, None)?;
//! session.subscribe_cloud_to_device();
//! session.send_telemetry(OutboundMessage {
//!     payload: br#"{"temperature": 21.5}"#.to_vec(),
//!     properties: Default::default(),
//! })?;
//!
//! let mut handler = Handler;
//! loop {
//!     session.do_work(&mut handler)?;
//!     std::thread::sleep(std::time::Duration::from_millis(100));
//! }
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod session;
pub mod testing;
pub mod wire;

pub use auth::{AuthError, AuthMode, TokenSigner};
pub use config::{ConfigError, DeviceConfig};
pub use error::{SessionError, SessionResult};
pub use session::{
    CompletionStatus, ConnectionStatus, MessageDisposition, OutboundMessage, ProcessResult,
    ReceivedMessage, RetryPolicy, SendStatus, Session, SessionHandler, SessionState, StatusReason,
    WorkItem,
};
pub use wire::{WireEngine, WireError, WireEvent};
