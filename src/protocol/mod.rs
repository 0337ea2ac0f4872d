//! Wire-protocol topic and property codecs.
//!
//! Everything in this module is stateless: topic strings are built from the
//! device identity and parsed back into structured events, and message
//! properties are carried as a percent-encoded `k=v` list appended to the
//! publish topic.

pub mod properties;
pub mod topics;

pub use properties::{decode_properties, encode_properties};
pub use topics::{
    c2d_filter, method_response_topic, parse_inbound, telemetry_base, twin_get_topic,
    twin_reported_topic, InboundTopic, METHOD_POST_FILTER, TWIN_DESIRED_FILTER, TWIN_RES_FILTER,
};
