//! Config loading and defaults integration tests

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use feed_pinner::config::MIN_POLL_INTERVAL_MS;
use feed_pinner::Config;

#[test]
fn test_minimal_config_uses_defaults() {
    let toml_str = r#"
[node]
data_dir = "/tmp/feed-pinner-test"
"#;

    let config: Config = toml::from_str(toml_str).expect("valid TOML");

    assert_eq!(config.node.data_dir, PathBuf::from("/tmp/feed-pinner-test"));
    assert_eq!(config.api.bind_addr, "0.0.0.0");
    assert_eq!(config.api.http_port, 3000);
    assert!(config.auth.tokens.is_empty());
    assert_eq!(config.pins.open_timeout(), Duration::from_secs(30));
    assert_eq!(config.pins.reconcile_interval(), Some(Duration::from_secs(300)));
    assert!(config.p2p.mdns_enabled);
    assert_eq!(config.p2p.listen_addrs, vec!["/ip4/0.0.0.0/tcp/4001".to_string()]);
    assert_eq!(
        config.snapshot_db_path(),
        PathBuf::from("/tmp/feed-pinner-test/pins.sled")
    );
}

#[test]
fn test_config_with_all_fields() {
    let toml_str = r#"
[node]
data_dir = "/var/lib/feed-pinner"

[api]
bind_addr = "127.0.0.1"
http_port = 8080

[auth]
tokens = ["alpha", "beta"]

[pins]
open_timeout_secs = 5
reconcile_interval_secs = 0

[p2p]
listen_addrs = ["/ip4/0.0.0.0/tcp/4500"]
bootstrap_nodes = ["/ip4/10.0.0.1/tcp/4001/p2p/12D3KooWDpJ7As7BWAwRMfu1VU2WCqNjvq387JEYKDBj4kx6nXTN"]
mdns_enabled = false
poll_interval_ms = 1500
query_timeout_secs = 10
"#;

    let config: Config = toml::from_str(toml_str).expect("valid TOML");

    assert_eq!(config.api.bind_addr, "127.0.0.1");
    assert_eq!(config.api.http_port, 8080);
    assert_eq!(config.auth.tokens, vec!["alpha", "beta"]);
    assert_eq!(config.pins.open_timeout(), Duration::from_secs(5));
    assert_eq!(config.pins.reconcile_interval(), None);
    assert_eq!(config.p2p.bootstrap_nodes.len(), 1);
    assert!(!config.p2p.mdns_enabled);
    assert_eq!(config.p2p.poll_interval(), Duration::from_millis(1500));
    assert_eq!(config.p2p.query_timeout(), Duration::from_secs(10));
}

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[node]
data_dir = "/srv/pins"

[api]
http_port = 9000
"#
    )
    .unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.node.data_dir, PathBuf::from("/srv/pins"));
    assert_eq!(config.api.http_port, 9000);
}

#[test]
fn test_missing_node_section_is_an_error() {
    let result: Result<Config, _> = toml::from_str("[api]\nhttp_port = 1\n");
    assert!(result.is_err());
}

#[test]
fn test_zero_poll_interval_is_clamped() {
    let toml_str = r#"
[node]
data_dir = "/tmp/feed-pinner-test"

[p2p]
poll_interval_ms = 0
"#;

    let config: Config = toml::from_str(toml_str).expect("valid TOML");
    assert_eq!(config.p2p.poll_interval_ms, 0);
    assert_eq!(
        config.p2p.poll_interval(),
        Duration::from_millis(MIN_POLL_INTERVAL_MS)
    );
}
