//! Topic builders and parsers for the device/cloud topic family.
//!
//! Builders produce the exact topic strings the broker routes on; the parser
//! classifies a received topic into one of the inbound message kinds and
//! extracts the embedded correlation data.

use std::collections::BTreeMap;

use super::properties::decode_properties;

/// Subscription filter for twin responses (get results and reported-state acks).
pub const TWIN_RES_FILTER: &str = "$iothub/twin/res/#";
/// Subscription filter for desired-property change notifications.
pub const TWIN_DESIRED_FILTER: &str = "$iothub/twin/PATCH/properties/desired/#";
/// Subscription filter for direct-method invocations.
pub const METHOD_POST_FILTER: &str = "$iothub/methods/POST/#";

const TWIN_RES_PREFIX: &str = "$iothub/twin/res/";
const TWIN_DESIRED_PREFIX: &str = "$iothub/twin/PATCH/properties/desired/";
const METHOD_POST_PREFIX: &str = "$iothub/methods/POST/";

/// Telemetry publish base: `devices/{device_id}/messages/events/`.
pub fn telemetry_base(device_id: &str) -> String {
    format!("devices/{device_id}/messages/events/")
}

/// Cloud-to-device subscription filter: `devices/{device_id}/messages/devicebound/#`.
pub fn c2d_filter(device_id: &str) -> String {
    format!("devices/{device_id}/messages/devicebound/#")
}

fn c2d_prefix(device_id: &str) -> String {
    format!("devices/{device_id}/messages/devicebound/")
}

/// Twin get-request publish topic carrying a caller-chosen request id.
pub fn twin_get_topic(request_id: &str) -> String {
    format!("$iothub/twin/GET/?$rid={request_id}")
}

/// Twin reported-properties publish topic carrying a request id.
pub fn twin_reported_topic(request_id: &str) -> String {
    format!("$iothub/twin/PATCH/properties/reported/?$rid={request_id}")
}

/// Direct-method response publish topic carrying the result status and the
/// request id of the invocation being answered.
pub fn method_response_topic(status: i32, request_id: &str) -> String {
    format!("$iothub/methods/res/{status}/?$rid={request_id}")
}

/// A received topic, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundTopic {
    /// Cloud-to-device message; user properties extracted from the topic tail.
    CloudToDevice {
        properties: BTreeMap<String, String>,
    },
    /// Twin response (`$iothub/twin/res/{status}/?$rid={rid}`).
    TwinResponse { status: u16, request_id: String },
    /// Desired-property change notification, with the twin document version
    /// when the broker includes one.
    DesiredProperties { version: Option<i64> },
    /// Direct-method invocation.
    MethodInvoke { method: String, request_id: String },
}

/// Classify a received topic for the given device.
///
/// Returns `None` for topics outside the known family; callers log and drop
/// those rather than erroring, since a broker may deliver retained traffic
/// from wider subscriptions.
pub fn parse_inbound(device_id: &str, topic: &str) -> Option<InboundTopic> {
    if let Some(tail) = topic.strip_prefix(&c2d_prefix(device_id)) {
        return Some(InboundTopic::CloudToDevice {
            properties: decode_properties(tail),
        });
    }
    if let Some(tail) = topic.strip_prefix(TWIN_RES_PREFIX) {
        let (status_str, query) = tail.split_once("/?")?;
        let status = status_str.parse::<u16>().ok()?;
        let request_id = query_value(query, "$rid")?.to_string();
        return Some(InboundTopic::TwinResponse { status, request_id });
    }
    if let Some(tail) = topic.strip_prefix(TWIN_DESIRED_PREFIX) {
        let version = tail
            .strip_prefix('?')
            .and_then(|query| query_value(query, "$version"))
            .and_then(|v| v.parse::<i64>().ok());
        return Some(InboundTopic::DesiredProperties { version });
    }
    if let Some(tail) = topic.strip_prefix(METHOD_POST_PREFIX) {
        let (method, query) = tail.split_once("/?")?;
        if method.is_empty() {
            return None;
        }
        let request_id = query_value(query, "$rid")?.to_string();
        return Some(InboundTopic::MethodInvoke {
            method: method.to_string(),
            request_id,
        });
    }
    None
}

/// Look up a key in a `&`-separated query segment.
fn query_value<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then_some(v)
    })
}
