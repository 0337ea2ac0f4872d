//! Loading and validating device configuration from TOML files.

use std::io::Write;

use hublink::config::{ConfigError, DeviceConfig};
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write");
    file
}

#[test]
fn test_load_key_authenticated_config() {
    let file = write_config(
        r#"
device_id = "sensor-1"
hub_name = "plant-hub"
hub_suffix = "example-hub.net"
device_key = "c3VwZXJzZWNyZXQ="
"#,
    );
    let config = DeviceConfig::load_from_file(file.path()).expect("load");
    assert_eq!(config.device_id, "sensor-1");
    assert_eq!(config.host(), "plant-hub.example-hub.net");
    assert!(config.sas_token.is_none());
}

#[test]
fn test_gateway_host_overrides_derived_host() {
    let file = write_config(
        r#"
device_id = "sensor-1"
hub_name = "plant-hub"
hub_suffix = "example-hub.net"
gateway_host = "edge-gw.local"
device_key = "c3VwZXJzZWNyZXQ="
"#,
    );
    let config = DeviceConfig::load_from_file(file.path()).expect("load");
    assert_eq!(config.host(), "edge-gw.local");
}

#[test]
fn test_load_rejects_both_credentials() {
    let file = write_config(
        r#"
device_id = "sensor-1"
hub_name = "plant-hub"
hub_suffix = "example-hub.net"
device_key = "c3VwZXJzZWNyZXQ="
sas_token = "SharedAccessSignature sr=s&sig=x&se=9999999999"
"#,
    );
    let result = DeviceConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::ConflictingCredentials)));
}

#[test]
fn test_load_rejects_missing_hub_name() {
    let file = write_config(
        r#"
device_id = "sensor-1"
hub_name = ""
hub_suffix = "example-hub.net"
device_key = "c3VwZXJzZWNyZXQ="
"#,
    );
    let result = DeviceConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::MissingField("hub_name"))));
}

#[test]
fn test_load_rejects_malformed_toml() {
    let file = write_config("device_id = [not toml");
    let result = DeviceConfig::load_from_file(file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_load_missing_file_is_a_read_error() {
    let result = DeviceConfig::load_from_file(std::path::Path::new("/nonexistent/config.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}
