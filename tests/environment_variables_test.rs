//! Integration tests for configuration loading from disk and environment.

use std::env;
use std::fs;
use std::sync::Mutex;

use formcast::server::AppState;
use formcast::Config;
use tempfile::TempDir;

// Global lock to prevent env var pollution between tests
static ENV_LOCK: Mutex<()> = Mutex::new(());

const FORMCAST_VARS: &[&str] = &[
    "FORMCAST_SERVER_URL",
    "FORMCAST_BIND_ADDR",
    "FORMCAST_CLIENT_ROLE",
    "FORMCAST_CREDENTIAL_TTL",
    "FORMCAST_SIGNING_KEY",
    "CLOUDFLARE_ACCOUNT_ID",
    "CLOUDFLARE_DATABASE_ID",
    "CLOUDFLARE_API_TOKEN",
];

/// Point the config dir at a fresh temp dir and clear every override.
fn setup_test_env() -> (TempDir, std::sync::MutexGuard<'static, ()>) {
    let guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    let temp_dir = TempDir::new().unwrap();

    for var in FORMCAST_VARS {
        env::remove_var(var);
    }
    env::set_var("FORMCAST_CONFIG_DIR", temp_dir.path());

    (temp_dir, guard)
}

#[test]
fn test_missing_file_gives_defaults() {
    let (_dir, _guard) = setup_test_env();
    let config = Config::load().unwrap();
    assert_eq!(config.server_url, "http://127.0.0.1:3000");
    assert_eq!(config.client_role, "notifications-client");
    assert_eq!(config.channel, "notifications");
    assert!(config.signing_key.is_none());
    assert!(config.persistence.is_none());
}

#[test]
fn test_file_values_then_env_overrides() {
    let (dir, _guard) = setup_test_env();
    fs::write(
        dir.path().join("config.json"),
        r#"{"server_url":"http://files.example","credential_ttl_secs":60}"#,
    )
    .unwrap();
    env::set_var("FORMCAST_SERVER_URL", "http://env.example");

    let config = Config::load().unwrap();
    assert_eq!(config.server_url, "http://env.example");
    assert_eq!(config.credential_ttl_secs, 60);

    env::remove_var("FORMCAST_SERVER_URL");
}

#[test]
fn test_secrets_never_saved() {
    let (dir, _guard) = setup_test_env();
    env::set_var("FORMCAST_SIGNING_KEY", "super-secret");
    env::set_var("CLOUDFLARE_ACCOUNT_ID", "acct");
    env::set_var("CLOUDFLARE_DATABASE_ID", "db");
    env::set_var("CLOUDFLARE_API_TOKEN", "cf-token");

    let config = Config::load().unwrap();
    assert_eq!(config.signing_key.as_deref(), Some("super-secret"));
    assert!(config.complete_persistence().is_some());
    config.save().unwrap();

    let written = fs::read_to_string(dir.path().join("config.json")).unwrap();
    assert!(!written.contains("super-secret"));
    assert!(!written.contains("cf-token"));
    assert!(written.contains("acct"));

    for var in FORMCAST_VARS {
        env::remove_var(var);
    }
}

#[test]
fn test_server_state_follows_signing_key() {
    let (_dir, _guard) = setup_test_env();

    let config = Config::load().unwrap();
    let state = AppState::from_config(&config);
    assert!(!state.broker.is_configured());
    assert!(!state.publisher.is_configured());
    assert!(state.store.is_none());

    env::set_var("FORMCAST_SIGNING_KEY", "k");
    let config = Config::load().unwrap();
    let state = AppState::from_config(&config);
    assert!(state.broker.is_configured());
    assert!(state.publisher.is_configured());

    env::remove_var("FORMCAST_SIGNING_KEY");
}

#[test]
fn test_malformed_file_is_error() {
    let (dir, _guard) = setup_test_env();
    fs::write(dir.path().join("config.json"), "{not json").unwrap();
    assert!(Config::load().is_err());
}
