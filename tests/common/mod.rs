//! Shared test fixtures.

use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use axum::Router;
use tempfile::TempDir;

use opsd::anthropic::AnthropicClient;
use opsd::api::{AppState, create_router};
use opsd::cli::{CliConfig, CliRunner};
use opsd::config::AnthropicSettings;
use opsd::store::{Db, Store};
use opsd::turn::TurnBroker;

pub struct TestApp {
    pub router: Router,
    pub store: Store,
    // Holds backing files for the duration of the test.
    #[allow(dead_code)]
    pub temp: TempDir,
}

/// Build an app over a throwaway database, driving CLI turns through the
/// given binary.
pub async fn test_app_with_cli(cli_binary: &str) -> TestApp {
    let temp = TempDir::new().unwrap();
    let db = Db::open(&temp.path().join("test.db")).await.unwrap();
    let store = Store::new(db);

    let cli = CliRunner::new(CliConfig {
        binary: cli_binary.to_string(),
        timeout: Duration::from_secs(5),
    });
    let anthropic = AnthropicClient::new(AnthropicSettings {
        base_url: "http://127.0.0.1:1".to_string(),
        model: "claude-sonnet-4-20250514".to_string(),
        max_tokens: 8192,
        api_key: Some("test-key".to_string()),
    });
    let broker = TurnBroker::new(store.clone(), cli, anthropic);
    let router = create_router(AppState::new(store.clone(), broker));

    TestApp {
        router,
        store,
        temp,
    }
}

pub async fn test_app() -> TestApp {
    test_app_with_cli("/bin/false").await
}

/// Write an executable shell script standing in for the CLI binary.
pub fn write_fake_cli(temp: &TempDir, body: &str) -> String {
    let path = temp.path().join("fake-cli");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}
