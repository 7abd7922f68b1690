//! Common test utilities for entitle integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;
use chrono::Utc;
use serde_json::json;
use tempfile::TempDir;

use entitle_service::crypto::hmac_sha256_hex;
use entitle_service::{create_router, AppState, ServiceConfig};
use entitle_store::RocksStore;

/// Shared webhook secret used across tests.
pub const WEBHOOK_SECRET: &str = "test-webhook-secret";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Temporary directory for the database (kept alive for test duration).
    pub _temp_dir: TempDir,
    /// The operator API key for authenticated requests.
    pub api_key: String,
    /// The underlying store, for direct state assertions.
    pub store: Arc<RocksStore>,
}

impl TestHarness {
    /// Create a new test harness with a fresh database.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = Arc::new(RocksStore::open(temp_dir.path()).expect("Failed to open store"));

        let api_key = "test-api-key".to_string();

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            data_dir: temp_dir.path().to_string_lossy().to_string(),
            api_key: Some(api_key.clone()),
            provider_webhook_secret: Some(WEBHOOK_SECRET.to_string()),
            ..ServiceConfig::default()
        };

        let state = AppState::new(store.clone(), config);
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            _temp_dir: temp_dir,
            api_key,
            store,
        }
    }

    /// Sign a webhook body the way the provider does: HMAC-SHA256 over
    /// `"{ts}:{body}"`, delivered as `ts=<ts>;h1=<hex>`.
    pub fn sign_webhook(&self, body: &str, timestamp: i64) -> String {
        let signature = hmac_sha256_hex(WEBHOOK_SECRET, &format!("{timestamp}:{body}"));
        format!("ts={timestamp};h1={signature}")
    }

    /// Sign a webhook body with the current timestamp.
    pub fn sign_webhook_now(&self, body: &str) -> String {
        self.sign_webhook(body, Utc::now().timestamp())
    }

    /// Create a subscription plan via the API and return its ID.
    pub async fn create_plan(&self, body: serde_json::Value) -> String {
        let response = self
            .server
            .post("/v1/plans")
            .add_header("x-api-key", &self.api_key)
            .json(&body)
            .await;
        response.assert_status_ok();
        let plan: serde_json::Value = response.json();
        plan["id"].as_str().expect("plan id").to_string()
    }

    /// Create an account via the API and return its ID.
    pub async fn create_account(&self, body: serde_json::Value) -> String {
        let response = self
            .server
            .post("/v1/accounts")
            .add_header("x-api-key", &self.api_key)
            .json(&body)
            .await;
        response.assert_status_ok();
        let account: serde_json::Value = response.json();
        account["id"].as_str().expect("account id").to_string()
    }

    /// Fetch an account via the API.
    pub async fn get_account(&self, account_id: &str) -> serde_json::Value {
        let response = self
            .server
            .get(&format!("/v1/accounts/{account_id}"))
            .add_header("x-api-key", &self.api_key)
            .await;
        response.assert_status_ok();
        response.json()
    }

    /// Run an entitlement check.
    pub async fn check(&self, account_id: &str) -> serde_json::Value {
        let response = self
            .server
            .post(&format!("/v1/entitlements/{account_id}/check"))
            .add_header("x-api-key", &self.api_key)
            .json(&json!({}))
            .await;
        response.assert_status_ok();
        response.json()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
