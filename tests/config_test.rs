//! Integration tests for configuration loading from disk and environment.

use std::env;
use std::fs;
use std::sync::Mutex;

use pawlink::Config;
use tempfile::TempDir;

// Global lock to prevent env var pollution between tests
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn setup_test_env() -> (TempDir, std::sync::MutexGuard<'static, ()>) {
    let guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    let temp_dir = TempDir::new().unwrap();

    env::remove_var("PAWLINK_SERVER_URL");
    env::remove_var("PAWLINK_WS_URL");
    env::remove_var("PAWLINK_USER_ID");
    env::remove_var("PAWLINK_TOKEN");
    env::set_var("PAWLINK_CONFIG_DIR", temp_dir.path());

    (temp_dir, guard)
}

#[test]
fn test_load_without_file_uses_defaults() {
    let (_dir, _guard) = setup_test_env();

    let config = Config::load().unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_load_reads_file_and_applies_env() {
    let (dir, _guard) = setup_test_env();
    fs::write(
        dir.path().join("config.json"),
        r#"{"server_url": "https://chat.example.com", "user_id": "file-user"}"#,
    )
    .unwrap();
    env::set_var("PAWLINK_USER_ID", "env-user");
    env::set_var("PAWLINK_TOKEN", "secret");

    let config = Config::load().unwrap();
    assert_eq!(config.server_url, "https://chat.example.com");
    assert_eq!(config.user_id, "env-user");
    assert_eq!(config.token.as_deref(), Some("secret"));
    assert_eq!(config.ws_url(), "wss://chat.example.com/ws");

    env::remove_var("PAWLINK_USER_ID");
    env::remove_var("PAWLINK_TOKEN");
}

#[test]
fn test_save_never_writes_token() {
    let (dir, _guard) = setup_test_env();

    let config = Config {
        user_id: "u1".to_string(),
        token: Some("secret".to_string()),
        ..Config::default()
    };
    config.save().unwrap();

    let written = fs::read_to_string(dir.path().join("config.json")).unwrap();
    assert!(written.contains("u1"));
    assert!(!written.contains("secret"));
}

#[test]
fn test_corrupt_file_falls_back_to_defaults() {
    let (dir, _guard) = setup_test_env();
    fs::write(dir.path().join("config.json"), "{ not json").unwrap();
    env::set_var("PAWLINK_SERVER_URL", "http://127.0.0.1:9999");

    let config = Config::load().unwrap();
    assert_eq!(config.server_url, "http://127.0.0.1:9999");
    assert_eq!(config.ws_url(), "ws://127.0.0.1:9999/ws");

    env::remove_var("PAWLINK_SERVER_URL");
}
