// tests/config_loading.rs

use std::fs;
use std::time::Duration;

use tempfile::tempdir;

use suitelink::config::{default_config_path, load_and_validate, load_from_path};
use suitelink::errors::SuitelinkError;

const SAMPLE: &str = r#"
[client]
refresh_interval = 30
retry_period = 2
timeout = 10

[commands]
suspend = "--suspend <full_name>"
requeue = "--force=queued <full_name>"

[server.prod]
host = "prod.example.org"
port = "3141"
user = "ops"
password = "secret"
ssl = true

[server.prod.suite_filter]
enabled = true
auto_add_new = true
suites = ["daily", "hourly"]

[server.test]
host = "test.example.org"
port = "3142"
token = "abc"
refresh_interval = 0
"#;

#[test]
fn loads_servers_commands_and_client_settings() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Suitelink.toml");
    fs::write(&path, SAMPLE).unwrap();

    let cfg = load_and_validate(&path).unwrap();
    assert_eq!(cfg.servers.len(), 2);
    assert_eq!(cfg.commands["suspend"], "--suspend <full_name>");

    let prod = &cfg.servers["prod"];
    assert!(prod.ssl);
    assert_eq!(prod.credential.user(), Some("ops"));
    assert!(prod.suite_filter.enabled && prod.suite_filter.auto_add_new);

    let conn = prod.connection_config(&cfg.client);
    assert_eq!(conn.timeout, Duration::from_secs(10));
    assert_eq!(conn.retry_period, Duration::from_secs(2));
    assert_eq!(conn.address(), "prod.example.org:3141");

    let prod_opts = prod.session_options(&cfg.client);
    assert_eq!(prod_opts.refresh_interval, Some(Duration::from_secs(30)));
    assert_eq!(prod_opts.suite_filter.registered_suites(), vec!["daily", "hourly"]);

    let test_opts = cfg.servers["test"].session_options(&cfg.client);
    assert_eq!(test_opts.refresh_interval, None);
    assert_eq!(cfg.servers["test"].credential.user(), None);
}

#[test]
fn unknown_keys_are_rejected_at_parse_time() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Suitelink.toml");
    fs::write(
        &path,
        "[server.a]\nhost = \"h\"\nport = \"1\"\ntoken = \"t\"\npasword = \"typo\"\n",
    )
    .unwrap();

    assert!(matches!(load_from_path(&path), Err(SuitelinkError::TomlError(_))));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempdir().unwrap();
    let err = load_and_validate(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, SuitelinkError::IoError(_)));
}

#[test]
fn invalid_server_is_a_config_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Suitelink.toml");
    fs::write(&path, "[server.a]\nhost = \"\"\nport = \"1\"\ntoken = \"t\"\n").unwrap();

    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, SuitelinkError::ConfigError(msg) if msg.contains("empty host")));
}

#[test]
fn default_path_is_in_the_working_directory() {
    assert_eq!(default_config_path().to_str(), Some("Suitelink.toml"));
}
