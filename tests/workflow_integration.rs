// ABOUTME: Integration tests for pull/push workflows against a mocked company API
// ABOUTME: Covers SyncToken tracking, per-edit outcomes, cancellation, and CSV round trips

use qbo_sync::api::ApiClient;
use qbo_sync::auth::{OAuthSettings, TokenManager};
use qbo_sync::config::{ClientCredentials, Config};
use qbo_sync::credentials::CredentialStore;
use qbo_sync::edits::{read_item_edits, read_item_edits_from};
use qbo_sync::export::write_items_csv;
use qbo_sync::storage::Paths;
use qbo_sync::sync::{CancelFlag, EditOutcome, Orchestrator};
use qbo_sync::sync_state::SyncTracker;
use qbo_sync::util::LastUpdatedFormatter;
use qbo_sync::{Credential, EntityKind, EntityVersion, Error};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const QUERY_PATH: &str = "/v3/company/123/query";
const ITEM_PATH: &str = "/v3/company/123/item";
const TOKEN_PATH: &str = "/oauth2/v1/tokens/bearer";

/// Data dir with a stored credential for realm 123.
fn workspace(dir: &Path) -> Paths {
    let paths = Paths::new(Some(dir.to_path_buf())).unwrap();
    paths.ensure_dirs().unwrap();
    CredentialStore::new(&paths)
        .save(
            "123",
            &Credential {
                access_token: "A0".into(),
                refresh_token: "R0".into(),
            },
        )
        .unwrap();
    paths
}

fn signed_in(paths: &Paths, uri: &str) -> TokenManager {
    let settings = OAuthSettings {
        client: ClientCredentials {
            client_id: "cid".into(),
            client_secret: "csecret".into(),
        },
        redirect_uri: "http://localhost:5000/callback".into(),
        scope: "com.intuit.quickbooks.accounting".into(),
        authorization_url: format!("{}/connect/oauth2", uri),
        token_url: format!("{}{}", uri, TOKEN_PATH),
    };
    let mut tokens =
        TokenManager::new(settings, CredentialStore::new(paths), Duration::from_secs(5)).unwrap();
    assert!(tokens.load_realm("123").unwrap());
    tokens
}

fn api(uri: &str) -> ApiClient {
    ApiClient::new("123".into(), Some(uri.to_string()), Duration::from_secs(5))
        .unwrap()
        .disable_throttle()
        .with_retry(0, Duration::from_millis(1))
}

fn tracker(paths: &Paths) -> SyncTracker {
    SyncTracker::load(
        paths.sync_state_file("123", EntityKind::Item).unwrap(),
        &paths.tmp_dir,
    )
    .unwrap()
}

fn item(id: &str, sync_token: &str, name: &str) -> Value {
    json!({
        "Id": id,
        "SyncToken": sync_token,
        "Name": name,
        "FullyQualifiedName": name,
        "domain": "QBO",
        "Type": "Service",
        "Active": true,
        "Taxable": false,
        "UnitPrice": 50,
        "IncomeAccountRef": {"value": "79", "name": "Sales of Product Income"},
        "MetaData": {
            "CreateTime": "2024-01-15T10:00:00-08:00",
            "LastUpdatedTime": "2024-02-01T09:30:00-08:00"
        }
    })
}

fn edits_csv(rows: &[(&str, &str)]) -> String {
    let mut csv = String::from("Id,Name,UnitPrice,Active\n");
    for (id, name) in rows {
        csv.push_str(&format!("{},{},75,true\n", id, name));
    }
    csv
}

#[tokio::test]
async fn test_pull_records_server_sync_tokens() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(QUERY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "QueryResponse": {
                "Item": [item("1", "3", "Hours"), item("2", "7", "Design")],
                "startPosition": 1,
                "maxResults": 2
            }
        })))
        .mount(&mock_server)
        .await;

    let temp = TempDir::new().unwrap();
    let dir: PathBuf = temp.path().to_path_buf();
    let uri = mock_server.uri();

    tokio::task::spawn_blocking(move || {
        let paths = workspace(&dir);
        let mut tokens = signed_in(&paths, &uri);
        let client = api(&uri);
        let mut state = tracker(&paths);

        let entities = Orchestrator::new(&client, &mut tokens)
            .pull(EntityKind::Item, &mut state)
            .unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(state.token_for("1"), 3);
        assert_eq!(state.token_for("2"), 7);
        assert_eq!(state.token_for("99"), 0);

        // Persisted, so a later process sees the same tokens.
        let reloaded = tracker(&paths);
        assert_eq!(reloaded.tokens(), state.tokens());
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_pull_with_empty_result_keeps_known_tokens() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(QUERY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"QueryResponse": {}})))
        .mount(&mock_server)
        .await;

    let temp = TempDir::new().unwrap();
    let dir: PathBuf = temp.path().to_path_buf();
    let uri = mock_server.uri();

    tokio::task::spawn_blocking(move || {
        let paths = workspace(&dir);
        let mut state = tracker(&paths);
        state.observe(&[EntityVersion::new("1", 4)]).unwrap();

        let mut tokens = signed_in(&paths, &uri);
        let client = api(&uri);
        let entities = Orchestrator::new(&client, &mut tokens)
            .pull(EntityKind::Item, &mut state)
            .unwrap();

        assert!(entities.is_empty());
        assert_eq!(state.token_for("1"), 4);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_push_reports_every_edit_in_order() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(ITEM_PATH))
        .and(body_partial_json(json!({"Id": "1", "SyncToken": "3", "sparse": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Item": item("1", "4", "Hours")
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path(ITEM_PATH))
        .and(body_partial_json(json!({"Id": "2"})))
        .respond_with(ResponseTemplate::new(400).set_body_string(
            r#"{"Fault":{"Error":[{"Message":"Stale Object Error","code":"5010"}],"type":"ValidationFault"}}"#,
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path(ITEM_PATH))
        .and(body_partial_json(json!({"Id": "3", "SyncToken": "0"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Item": item("3", "1", "Travel")
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let temp = TempDir::new().unwrap();
    let dir: PathBuf = temp.path().to_path_buf();
    let uri = mock_server.uri();

    tokio::task::spawn_blocking(move || {
        let paths = workspace(&dir);
        let mut state = tracker(&paths);
        state
            .observe(&[EntityVersion::new("1", 3), EntityVersion::new("2", 5)])
            .unwrap();

        let edits =
            read_item_edits_from(edits_csv(&[("1", "Hours"), ("2", "Design"), ("3", "Travel")]).as_bytes())
                .unwrap();

        let mut tokens = signed_in(&paths, &uri);
        let client = api(&uri);
        let mut seen = Vec::new();
        let batch = Orchestrator::new(&client, &mut tokens).apply_updates(&edits, &state, |r| {
            seen.push(r.entity_id.clone())
        });

        assert_eq!(batch.len(), 3);
        assert_eq!(seen, vec!["1", "2", "3"]);
        assert!(batch.results[0].is_success());
        match &batch.results[1].outcome {
            EditOutcome::Failed { status, body, .. } => {
                assert_eq!(*status, Some(400));
                assert!(body.contains("Stale Object Error"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(batch.results[2].is_success());
        assert_eq!(batch.results[2].sync_token, 0);

        // Success does not advance the local token.
        assert_eq!(state.token_for("1"), 3);
        assert_eq!(tracker(&paths).token_for("1"), 3);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_push_stamps_last_updated_with_offset() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(ITEM_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Item": item("1", "4", "Hours")
        })))
        .mount(&mock_server)
        .await;

    let temp = TempDir::new().unwrap();
    let dir: PathBuf = temp.path().to_path_buf();
    let uri = mock_server.uri();

    tokio::task::spawn_blocking(move || {
        let paths = workspace(&dir);
        let state = tracker(&paths);
        let edits = read_item_edits_from(edits_csv(&[("1", "Hours")]).as_bytes()).unwrap();

        let mut tokens = signed_in(&paths, &uri);
        let client = api(&uri);
        let batch = Orchestrator::new(&client, &mut tokens)
            .with_formatter(LastUpdatedFormatter::new(-480).unwrap())
            .apply_updates(&edits, &state, |_| {});
        assert!(batch.all_succeeded());
    })
    .await
    .unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    let stamp = body["MetaData"]["LastUpdatedTime"].as_str().unwrap();
    assert!(stamp.ends_with("-08:00"), "got {}", stamp);
    assert_eq!(stamp.len(), "2024-01-15T10:00:00-08:00".len());
    assert_eq!(body["UnitPrice"], json!(75));
    assert_eq!(body["Active"], json!(true));
}

#[tokio::test]
async fn test_cancel_between_edits_marks_rest_not_attempted() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(ITEM_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Item": item("1", "1", "Hours")
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let temp = TempDir::new().unwrap();
    let dir: PathBuf = temp.path().to_path_buf();
    let uri = mock_server.uri();

    tokio::task::spawn_blocking(move || {
        let paths = workspace(&dir);
        let state = tracker(&paths);
        let edits =
            read_item_edits_from(edits_csv(&[("1", "Hours"), ("2", "Design"), ("3", "Travel")]).as_bytes())
                .unwrap();

        let cancel = CancelFlag::new();
        let trigger = cancel.clone();
        let mut tokens = signed_in(&paths, &uri);
        let client = api(&uri);
        let batch = Orchestrator::new(&client, &mut tokens)
            .with_cancel(cancel)
            .apply_updates(&edits, &state, |_| trigger.cancel());

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.succeeded(), 1);
        assert_eq!(batch.not_attempted(), 2);
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_lost_authorization_stops_the_batch() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(ITEM_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#))
        .expect(1)
        .mount(&mock_server)
        .await;

    let temp = TempDir::new().unwrap();
    let dir: PathBuf = temp.path().to_path_buf();
    let uri = mock_server.uri();

    tokio::task::spawn_blocking(move || {
        let paths = workspace(&dir);
        let state = tracker(&paths);
        let edits =
            read_item_edits_from(edits_csv(&[("1", "Hours"), ("2", "Design"), ("3", "Travel")]).as_bytes())
                .unwrap();

        let mut tokens = signed_in(&paths, &uri);
        let client = api(&uri);
        let batch = Orchestrator::new(&client, &mut tokens).apply_updates(&edits, &state, |_| {});

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.failed(), 1);
        assert_eq!(batch.not_attempted(), 2);
        match &batch.results[0].outcome {
            EditOutcome::Failed { reason, .. } => {
                assert_eq!(reason, &Error::AuthExpired.to_string())
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    })
    .await
    .unwrap();
}

#[test]
fn test_exported_items_read_back_as_edits() {
    let temp = TempDir::new().unwrap();
    let paths = Paths::new(Some(temp.path().to_path_buf())).unwrap();
    paths.ensure_dirs().unwrap();
    let out = paths.export_file("123", EntityKind::Item).unwrap();

    let written = write_items_csv(
        &[item("1", "3", "Hours"), item("2", "7", "Design")],
        &out,
        &paths.tmp_dir,
    )
    .unwrap();
    assert_eq!(written, 2);

    let edits = read_item_edits(&out).unwrap();
    assert_eq!(edits.len(), 2);
    assert_eq!(edits[0].id, "1");
    assert_eq!(edits[1].name, "Design");

    let payload = edits[0]
        .to_payload(3, "2024-03-01T12:00:00-08:00")
        .unwrap();
    assert_eq!(payload["SyncToken"], json!("3"));
    assert_eq!(payload["IncomeAccountRef"], json!({"value": "79"}));
    assert_eq!(payload["Taxable"], json!(false));
}

#[test]
fn test_config_file_overrides_defaults() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("config.yaml");
    fs::write(
        &file,
        "client_id: from-file\nenvironment: production\nutc_offset_minutes: -480\nmax_retries: 5\n",
    )
    .unwrap();

    let config = Config::load(Some(&file)).unwrap();
    assert_eq!(config.client_id.as_deref(), Some("from-file"));
    assert_eq!(config.api_base(), "https://quickbooks.api.intuit.com");
    assert_eq!(config.max_retries, 5);
    assert_eq!(config.minor_version, 70);
    assert!(LastUpdatedFormatter::new(config.utc_offset_minutes).is_ok());
}

#[test]
fn test_missing_explicit_config_is_an_error() {
    let temp = TempDir::new().unwrap();
    let result = Config::load(Some(&temp.path().join("absent.yaml")));
    assert!(matches!(result, Err(Error::Config(_))));
}
