//! Configuration loading tests
//!
//! Loads YAML files from disk and builds strategies and servers from them.

use std::io::Write;

use dice_auth::Error;
use dice_auth::config::{Config, DiceConfig};
use dice_auth::dice::DiceStrategy;
use dice_auth::server::Server;

fn write_config(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dice.yaml");
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    (dir, path)
}

#[test]
fn custom_dn_options_shape_canonical_output() {
    let (_dir, path) = write_config(
        r"
dice:
  cas_server: https://dice.dev
  authentication_path: /users
  dn:
    attribute_order: [cn, o, c]
    upper_case: false
",
    );

    let config = Config::load(Some(&path)).unwrap();
    let strategy = DiceStrategy::new(DiceConfig::from_options(config.dice).unwrap()).unwrap();

    assert_eq!(
        strategy
            .canonicalize("/C=US/OU=C001/O=Equestria/CN=Twilight Sparkle")
            .unwrap(),
        "CN=Twilight Sparkle,O=Equestria,C=US,OU=C001"
    );
}

#[test]
fn server_requires_directory_options() {
    let (_dir, path) = write_config("server:\n  port: 8080\n");

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.server.session_ttl.as_secs(), 3600);

    let err = Server::new(config).err().unwrap();
    assert!(matches!(err, Error::MissingConfiguration("cas_server")));
}

#[test]
fn server_builds_from_complete_config() {
    let (_dir, path) = write_config(
        r"
server:
  host: 0.0.0.0
  request_timeout: 45s
  session_ttl: 15m
dice:
  name: pki
  cas_server: https://dice.dev
  authentication_path: /users
  use_callback_url: true
",
    );

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.server.request_timeout.as_secs(), 45);
    assert_eq!(config.server.session_ttl.as_secs(), 900);

    let dice = DiceConfig::from_options(config.dice.clone()).unwrap();
    assert_eq!(dice.request_path(), "/auth/pki");
    assert_eq!(dice.callback_path, "/auth/pki/callback");
    assert!(Server::new(config).is_ok());
}

#[test]
fn malformed_yaml_is_a_config_error() {
    let (_dir, path) = write_config("dice: [not, a, map\n");
    assert!(matches!(Config::load(Some(&path)), Err(Error::Config(_))));
}
