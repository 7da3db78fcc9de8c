//! Configuration tests

use std::io::Write;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;

use super::Config;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn defaults_match_the_original_deployment() {
    let config = Config::default();

    assert_eq!(config.broker.port, 1883);
    assert_eq!(config.broker.keepalive, 60);
    assert_eq!(config.broker.reconnect_backoff, Duration::from_secs(5));
    assert_eq!(config.topics.subscriptions.len(), 2);
    assert_eq!(config.topics.subscriptions[0].topic, "workwell/monitoramento");
    assert_eq!(config.topics.subscriptions[1].topic, "workwell/alerts");
    assert_eq!(config.topics.command_topic, "workwell/command");
    assert_eq!(config.journal.path.to_str().unwrap(), "last_msg.log");
    assert_eq!(config.log.level, "info");
}

#[test]
fn load_full_config() {
    let file = write_config(
        r#"
[log]
level = "debug"

[broker]
host = "broker.example.com"
port = 8883
keepalive = 30
client_id_prefix = "plant-bridge"
reconnect_backoff = "2s"
connect_timeout = "4s"

[topics]
subscriptions = [
    { topic = "plant/telemetry", qos = 0 },
    { topic = "plant/alerts", qos = 1 },
]
command_topic = "plant/command"

[server]
ws_bind = "0.0.0.0:9001"
http_bind = "0.0.0.0:9000"

[journal]
path = "/var/log/bridge/messages.log"
"#,
    );

    let config = Config::load(file.path()).unwrap();

    assert_eq!(config.log.level, "debug");
    assert_eq!(config.broker.host, "broker.example.com");
    assert_eq!(config.broker.port, 8883);
    assert_eq!(config.broker.address(), "broker.example.com:8883");
    assert_eq!(config.broker.reconnect_backoff, Duration::from_secs(2));
    assert_eq!(config.broker.connect_timeout, Duration::from_secs(4));
    assert_eq!(config.topics.subscriptions[1].qos, 1);
    assert_eq!(config.topics.command_topic, "plant/command");
    assert_eq!(config.server.ws_bind.port(), 9001);
    assert_eq!(config.server.http_bind.port(), 9000);
}

#[test]
fn partial_config_keeps_defaults() {
    let file = write_config(
        r#"
[broker]
host = "10.0.0.7"
"#,
    );

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.broker.host, "10.0.0.7");
    assert_eq!(config.broker.port, 1883);
    assert_eq!(config.topics.subscriptions.len(), 2);
}

#[test]
fn env_var_substitution_with_default() {
    let file = write_config(
        r#"
[broker]
host = "${MQBRIDGE_TEST_NO_SUCH_HOST:-fallback.local}"
"#,
    );

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.broker.host, "fallback.local");
}

#[test]
fn env_var_substitution_from_environment() {
    std::env::set_var("MQBRIDGE_TEST_HOST_SUBST", "env.example.com");
    let file = write_config(
        r#"
[broker]
host = "${MQBRIDGE_TEST_HOST_SUBST}"
"#,
    );

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.broker.host, "env.example.com");
    std::env::remove_var("MQBRIDGE_TEST_HOST_SUBST");
}

#[test]
fn empty_subscriptions_fail_validation() {
    let file = write_config(
        r#"
[topics]
subscriptions = []
"#,
    );

    assert!(Config::load(file.path()).is_err());
}

#[test]
fn out_of_range_qos_fails_validation() {
    let file = write_config(
        r#"
[topics]
subscriptions = [{ topic = "t", qos = 3 }]
"#,
    );

    assert!(Config::load(file.path()).is_err());
}
