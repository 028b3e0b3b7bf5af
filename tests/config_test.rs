//! Configuration loading from files.

use field_gateway::GatewayConfig;
use std::io::Write;
use std::time::Duration;
use tokio_test::assert_ok;

#[test]
fn test_file_overrides_defaults() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write!(
        file,
        r#"
        log_level = "debug"

        [serial]
        device = "/dev/ttyUSB1"

        [alerts]
        battery_min = 2800
        dispatch_every = "30m"
        admin_recipients = ["ops@example.org"]

        [fanout]
        listen = "127.0.0.1:7800"
        "#
    )
    .unwrap();

    let config = GatewayConfig::load_from(file.path()).unwrap();
    assert_ok!(config.validate());
    assert_eq!(config.log_level, "debug");
    assert_eq!(config.serial.device.to_str(), Some("/dev/ttyUSB1"));
    assert_eq!(config.alerts.battery_min, 2800.0);
    assert_eq!(config.alerts.dispatch_every, Duration::from_secs(30 * 60));
    assert_eq!(config.alerts.admin_recipients, vec!["ops@example.org"]);
    assert_eq!(config.fanout.listen.map(|a| a.port()), Some(7800));
    assert_eq!(config.sync.aggregate_collection, "sensors_aggregate");
}

#[test]
fn test_printed_config_loads_back() {
    let mut config = GatewayConfig::default();
    config.dead_man.scan_hour = 6;
    config.link_health.cooldown = Duration::from_secs(15 * 60);

    let printed = toml::to_string_pretty(&config).unwrap();
    let reloaded = GatewayConfig::from_toml_str(&printed).unwrap();
    assert_eq!(reloaded.dead_man.scan_hour, 6);
    assert_eq!(reloaded.link_health.cooldown, Duration::from_secs(15 * 60));
}

#[test]
fn test_malformed_file_is_a_config_error() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write!(file, "[sync]\nperiod = 3\n").unwrap();
    let err = GatewayConfig::load_from(file.path()).unwrap_err();
    assert!(err.to_string().starts_with("Configuration error"));
}
