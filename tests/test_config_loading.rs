//! Configuration loading and validation tests
//!
//! Tests focus on behavior of configuration loading, validation, and error handling.

mod test_helpers;

use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use telemetry_forwarder::config::{ConfigError, ForwarderConfig};

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[device]
sensor_name = "sensor1"
location = "greenhouse-1"
site_name = "site-a"

[mqtt]
endpoint = "mqtts://example.iot.eu-west-1.amazonaws.com:8883"
cert = "certs/device.pem.crt"
key = "certs/private.pem.key"
root_ca = "certs/AmazonRootCA1.pem"
subscriptions = ["site/a/loc/sensor1"]

[topic]
root = "telemetry"

[publish]
cycle_period_secs = 5
precision = 1
"#,
    );

    let config = ForwarderConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.client_id(), "sensor1");
    assert_eq!(
        config.telemetry_topic(),
        "telemetry/site-a/greenhouse-1/sensor1"
    );
    assert_eq!(config.cycle_period(), Duration::from_secs(5));
    assert_eq!(config.mqtt.keep_alive_secs, 6);
    assert!(!config.mqtt.clean_session);
    assert_eq!(config.mqtt.subscriptions, vec!["site/a/loc/sensor1"]);
}

#[test]
fn test_config_matches_helper_defaults() {
    let temp_file = write_config(
        r#"
[device]
sensor_name = "sensor1"
location = "greenhouse-1"
site_name = "site-a"

[mqtt]
endpoint = "mqtt://localhost:1883"
"#,
    );

    let config = ForwarderConfig::load_from_file(temp_file.path()).unwrap();
    assert_eq!(config, test_helpers::test_config());
}

#[test]
fn test_missing_file_is_read_error() {
    let result = ForwarderConfig::load_from_file(std::path::Path::new("/nonexistent/forwarder.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let temp_file = write_config("[device\nsensor_name = ");
    let result = ForwarderConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_zero_period_rejected_on_load() {
    let temp_file = write_config(
        r#"
[device]
sensor_name = "sensor1"
location = "greenhouse-1"
site_name = "site-a"

[mqtt]
endpoint = "mqtt://localhost:1883"

[publish]
cycle_period_secs = 0
"#,
    );

    let err = ForwarderConfig::load_from_file(temp_file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidConfig(_)));
}

#[test]
fn test_wildcard_in_location_rejected_on_load() {
    let temp_file = write_config(
        r#"
[device]
sensor_name = "sensor1"
location = "greenhouse+1"
site_name = "site-a"

[mqtt]
endpoint = "mqtt://localhost:1883"
"#,
    );

    let err = ForwarderConfig::load_from_file(temp_file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidTopic(_)));
    assert!(err.to_string().contains("device.location"));
}

#[test]
fn test_discover_prefers_explicit_path() {
    let temp_file = write_config(
        r#"
[device]
sensor_name = "explicit"
location = "lab"
site_name = "hq"

[mqtt]
endpoint = "mqtt://localhost:1883"
"#,
    );

    let config = ForwarderConfig::discover(Some(temp_file.path())).unwrap();
    assert_eq!(config.client_id(), "explicit");
}
