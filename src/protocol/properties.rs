//! Percent-encoded property list codec.
//!
//! Application properties travel inside the publish topic as
//! `k1=v1&k2=v2` pairs appended after the telemetry base segment. Keys and
//! values are percent-encoded on the way out and decoded on the way in.
//! A fixed set of reserved (system) property names is dropped while parsing
//! a received topic; they carry broker metadata, not user data.

use percent_encoding::{percent_decode_str, percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::BTreeMap;

const PROPERTY_SEPARATOR: char = '&';

/// Everything except unreserved characters gets escaped.
const PROPERTY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Reserved property prefixes, matched against the still-encoded token.
const SYSTEM_PROPERTY_PREFIXES: &[&str] = &[
    "%24.exp",
    "%24.mid",
    "%24.uid",
    "%24.to",
    "%24.cid",
    "devices/",
    "iothub-operation",
    "iothub-ack",
];

fn is_system_property(raw_token: &str) -> bool {
    SYSTEM_PROPERTY_PREFIXES
        .iter()
        .any(|prefix| raw_token.starts_with(prefix))
}

/// Append an encoded property list to a topic base.
///
/// With no properties the base is returned unchanged. Key order follows the
/// map's ordering; the receiving side treats the list as unordered.
pub fn encode_properties(base: &str, properties: &BTreeMap<String, String>) -> String {
    let mut topic = base.to_string();
    let mut first = true;
    for (key, value) in properties {
        if !first {
            topic.push(PROPERTY_SEPARATOR);
        }
        first = false;
        topic.push_str(&percent_encode(key.as_bytes(), PROPERTY_ENCODE_SET).to_string());
        topic.push('=');
        topic.push_str(&percent_encode(value.as_bytes(), PROPERTY_ENCODE_SET).to_string());
    }
    topic
}

/// Decode a `&`-separated property segment from a received topic.
///
/// Tokens without an `=`, tokens that fail percent-decoding, and reserved
/// system properties are skipped rather than failing the whole message.
pub fn decode_properties(segment: &str) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    for token in segment.split(PROPERTY_SEPARATOR) {
        if token.is_empty() || is_system_property(token) {
            continue;
        }
        let Some((raw_key, raw_value)) = token.split_once('=') else {
            continue;
        };
        let decoded_key = percent_decode_str(raw_key).decode_utf8();
        let decoded_value = percent_decode_str(raw_value).decode_utf8();
        if let (Ok(key), Ok(value)) = (decoded_key, decoded_value) {
            properties.insert(key.into_owned(), value.into_owned());
        }
    }
    properties
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn props(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_encode_no_properties_keeps_base() {
        let base = "devices/dev-1/messages/events/";
        assert_eq!(encode_properties(base, &BTreeMap::new()), base);
    }

    #[test]
    fn test_encode_two_properties() {
        let topic = encode_properties("base/", &props(&[("k1", "v1"), ("k2", "v2")]));
        assert_eq!(topic, "base/k1=v1&k2=v2");
    }

    #[test]
    fn test_encode_escapes_reserved_characters() {
        let topic = encode_properties("base/", &props(&[("a key", "x=y&z")]));
        assert_eq!(topic, "base/a%20key=x%3Dy%26z");
    }

    #[test]
    fn test_decode_skips_system_properties() {
        let segment = "%24.to=%2Fdevices%2Fdev-1%2Fmessages%2FdeviceBound&iothub-ack=full&k1=v1";
        let decoded = decode_properties(segment);
        assert_eq!(decoded, props(&[("k1", "v1")]));
    }

    #[test]
    fn test_decode_tolerates_malformed_tokens() {
        let decoded = decode_properties("novalue&&k=v");
        assert_eq!(decoded, props(&[("k", "v")]));
    }

    #[test]
    fn test_round_trip_two_properties() {
        let original = props(&[("k1", "v1"), ("k2", "v2")]);
        let topic = encode_properties("", &original);
        assert_eq!(decode_properties(&topic), original);
    }

    proptest! {
        #[test]
        fn round_trip_preserves_mapping(
            pairs in proptest::collection::btree_map("[a-zA-Z0-9 =&%/._-]{1,12}", "[a-zA-Z0-9 =&%/._-]{0,12}", 0..6)
        ) {
            // Keys that collide with reserved prefixes are legitimately dropped.
            let input: BTreeMap<String, String> = pairs
                .into_iter()
                .filter(|(k, _)| !k.starts_with("devices/") && !k.starts_with("iothub-"))
                .collect();
            let encoded = encode_properties("", &input);
            prop_assert_eq!(decode_properties(&encoded), input);
        }

        #[test]
        fn decode_never_panics(segment in ".*") {
            let _ = decode_properties(&segment);
        }
    }
}
