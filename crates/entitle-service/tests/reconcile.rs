//! Reconciliation scanner integration tests.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use entitle_core::{Account, AccountId, AccountStatus, OrgId};
use entitle_service::provider::HttpProviderGateway;
use entitle_service::Scanner;
use entitle_store::{RocksStore, Store};

struct ScanFixture {
    store: Arc<RocksStore>,
    _temp_dir: TempDir,
    mock_server: MockServer,
}

impl ScanFixture {
    async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(temp_dir.path()).unwrap());
        let mock_server = MockServer::start().await;
        Self {
            store,
            _temp_dir: temp_dir,
            mock_server,
        }
    }

    fn scanner(&self) -> Scanner {
        let gateway = HttpProviderGateway::new(
            &self.mock_server.uri(),
            "test-provider-key",
            Duration::from_secs(2),
        )
        .unwrap();
        Scanner::new(
            self.store.clone(),
            Arc::new(gateway),
            Duration::from_secs(2),
        )
    }

    fn seed_account(&self, subscription_id: &str, status: AccountStatus) -> Account {
        let mut account = Account::new(AccountId::generate(), OrgId::generate());
        account.provider_subscription_id = Some(subscription_id.to_string());
        account.status = status;
        self.store.put_account(&account).unwrap();
        account
    }
}

#[tokio::test]
async fn drift_is_detected_and_repaired() {
    let fixture = ScanFixture::new().await;
    let account = fixture.seed_account("sub_drift", AccountStatus::Active);

    // Provider's authoritative answer: the subscription was canceled.
    Mock::given(method("GET"))
        .and(path("/subscriptions/sub_drift"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"id": "sub_drift", "status": "canceled"}
        })))
        .mount(&fixture.mock_server)
        .await;

    let report = fixture.scanner().scan().await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.drift_detected, 1);
    assert_eq!(report.repaired, 1);
    assert_eq!(report.failed, 0);

    let repaired = fixture.store.get_account(&account.id).unwrap().unwrap();
    assert_eq!(repaired.status, AccountStatus::Canceled);
}

#[tokio::test]
async fn repair_goes_through_the_webhook_mapping_path() {
    let fixture = ScanFixture::new().await;
    let account = fixture.seed_account("sub_audit", AccountStatus::Active);

    Mock::given(method("GET"))
        .and(path("/subscriptions/sub_audit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "sub_audit", "status": "past_due"
        })))
        .mount(&fixture.mock_server)
        .await;

    fixture.scanner().scan().await.unwrap();

    let repaired = fixture.store.get_account(&account.id).unwrap().unwrap();
    assert_eq!(repaired.status, AccountStatus::PastDue);

    // The repair left the same audit trail a webhook would: a guarded,
    // applied provider-event record.
    let record = fixture
        .store
        .get_provider_event(&format!("recon-sub_audit-{}", account.version))
        .unwrap()
        .unwrap();
    assert_eq!(record.account_id, Some(account.id));
    assert!(fixture
        .store
        .transaction_applied(&format!("recon:sub_audit:{}", account.version))
        .unwrap());
}

#[tokio::test]
async fn rescan_without_new_drift_is_idempotent() {
    let fixture = ScanFixture::new().await;
    let account = fixture.seed_account("sub_idem", AccountStatus::Active);

    Mock::given(method("GET"))
        .and(path("/subscriptions/sub_idem"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"id": "sub_idem", "status": "paused"}
        })))
        .mount(&fixture.mock_server)
        .await;

    let scanner = fixture.scanner();
    let first = scanner.scan().await.unwrap();
    assert_eq!(first.repaired, 1);

    // Local and remote now agree: nothing to do.
    let second = scanner.scan().await.unwrap();
    assert_eq!(second.drift_detected, 0);
    assert_eq!(second.repaired, 0);

    let repaired = fixture.store.get_account(&account.id).unwrap().unwrap();
    assert_eq!(repaired.status, AccountStatus::Paused);
}

#[tokio::test]
async fn in_sync_accounts_are_left_alone() {
    let fixture = ScanFixture::new().await;
    let account = fixture.seed_account("sub_ok", AccountStatus::Active);
    let before_version = fixture
        .store
        .get_account(&account.id)
        .unwrap()
        .unwrap()
        .version;

    Mock::given(method("GET"))
        .and(path("/subscriptions/sub_ok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"id": "sub_ok", "status": "active"}
        })))
        .mount(&fixture.mock_server)
        .await;

    let report = fixture.scanner().scan().await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.drift_detected, 0);

    let after = fixture.store.get_account(&account.id).unwrap().unwrap();
    assert_eq!(after.version, before_version);
}

#[tokio::test]
async fn per_account_failure_does_not_abort_the_sweep() {
    let fixture = ScanFixture::new().await;
    let broken = fixture.seed_account("sub_broken", AccountStatus::Active);
    let healthy = fixture.seed_account("sub_healthy", AccountStatus::Active);

    Mock::given(method("GET"))
        .and(path("/subscriptions/sub_broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&fixture.mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/subscriptions/sub_healthy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"id": "sub_healthy", "status": "canceled"}
        })))
        .mount(&fixture.mock_server)
        .await;

    let report = fixture.scanner().scan().await.unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.repaired, 1);

    let broken_after = fixture.store.get_account(&broken.id).unwrap().unwrap();
    assert_eq!(broken_after.status, AccountStatus::Active);
    let healthy_after = fixture.store.get_account(&healthy.id).unwrap().unwrap();
    assert_eq!(healthy_after.status, AccountStatus::Canceled);
}

#[tokio::test]
async fn repair_never_touches_purchased_credits() {
    let fixture = ScanFixture::new().await;
    let mut account = Account::new(AccountId::generate(), OrgId::generate());
    account.provider_subscription_id = Some("sub_credits".to_string());
    account.status = AccountStatus::Active;
    account.purchased_granted = 40;
    account.purchased_used = 15;
    account.updated_at = Utc::now();
    fixture.store.put_account(&account).unwrap();

    Mock::given(method("GET"))
        .and(path("/subscriptions/sub_credits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"id": "sub_credits", "status": "canceled"}
        })))
        .mount(&fixture.mock_server)
        .await;

    fixture.scanner().scan().await.unwrap();

    let repaired = fixture.store.get_account(&account.id).unwrap().unwrap();
    assert_eq!(repaired.status, AccountStatus::Canceled);
    assert_eq!(repaired.purchased_granted, 40);
    assert_eq!(repaired.purchased_used, 15);
}

#[tokio::test]
async fn unknown_provider_status_is_skipped_not_guessed() {
    let fixture = ScanFixture::new().await;
    let account = fixture.seed_account("sub_weird", AccountStatus::Active);

    Mock::given(method("GET"))
        .and(path("/subscriptions/sub_weird"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"id": "sub_weird", "status": "experimental_state"}
        })))
        .mount(&fixture.mock_server)
        .await;

    let report = fixture.scanner().scan().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.repaired, 0);

    let after = fixture.store.get_account(&account.id).unwrap().unwrap();
    assert_eq!(after.status, AccountStatus::Active);
}
