//! HTTP remote tests
//!
//! Runs `HttpRemote` against a wiremock server to check request shape,
//! page decoding and status classification.

use crate::assert_ok;
use assert_matches::assert_matches;
use crate::common::*;
use kioku::client::offline::MutationPayload;
use kioku::client::remote::{
    HttpRemote, PageQuery, ProgressSubmission, RemoteError, RemoteService, ResourceItems,
    SubmissionReceipt,
};
use kioku::client::SyncError;
use kioku::shared::{AppConfig, ConfigError, Resource};
use pretty_assertions::assert_eq;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn remote_for(server: &MockServer) -> HttpRemote {
    let config = assert_ok!(AppConfig::builder()
        .server_url(server.uri())
        .api_token("secret-token")
        .build());
    assert_ok!(HttpRemote::new(&config))
}

#[tokio::test]
async fn test_fetch_page_decodes_envelope() {
    let server = MockServer::start().await;
    let body = json!({
        "items": [subject(1, ts(3, 0)), subject(2, ts(4, 0))],
        "next_page_cursor": "2",
        "total_count": 5,
        "data_updated_at": ts(4, 0),
    });
    Mock::given(method("GET"))
        .and(path("/subjects"))
        .and(query_param("per_page", "2"))
        .and(query_param("page_after_id", "0"))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(&server)
        .await;

    let remote = remote_for(&server).await;
    let query = PageQuery {
        updated_after: None,
        page_after: Some("0".to_string()),
        page_size: 2,
    };
    let page = assert_ok!(remote.fetch_page(Resource::Subjects, &query).await);

    assert_eq!(page.items.ids(), vec![1, 2]);
    assert_eq!(page.next_page_cursor.as_deref(), Some("2"));
    assert_eq!(page.total_count, Some(5));
    assert_eq!(page.data_updated_at, Some(ts(4, 0)));
}

#[tokio::test]
async fn test_updated_after_filter_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/voice_actors"))
        .and(query_param("updated_after", ts(5, 0).to_rfc3339()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let remote = remote_for(&server).await;
    let query = PageQuery {
        updated_after: Some(ts(5, 0)),
        page_after: None,
        page_size: 500,
    };
    let page = assert_ok!(remote.fetch_page(Resource::VoiceActors, &query).await);
    assert_eq!(page.items, ResourceItems::VoiceActors(Vec::new()));
    assert_eq!(page.next_page_cursor, None);
}

#[tokio::test]
async fn test_review_submission_carries_idempotency_key() {
    let server = MockServer::start().await;
    let key = Uuid::new_v4();
    let receipt = SubmissionReceipt {
        assignment: assignment(440, 2, ts(6, 0)),
        review_statistic: None,
    };
    Mock::given(method("POST"))
        .and(path("/reviews"))
        .and(header("Idempotency-Key", key.to_string().as_str()))
        .respond_with(ResponseTemplate::new(201).set_body_json(&receipt))
        .expect(1)
        .mount(&server)
        .await;

    let remote = remote_for(&server).await;
    let submission = ProgressSubmission {
        idempotency_key: key,
        subject_id: 440,
        assignment_id: Some(4400),
        payload: MutationPayload::review_grade(0, 1, ts(5, 30)),
    };
    let returned = assert_ok!(remote.submit(&submission).await);
    assert_eq!(returned, receipt);
}

#[tokio::test]
async fn test_lesson_start_without_assignment_is_rejected_locally() {
    let server = MockServer::start().await;
    let remote = remote_for(&server).await;
    let submission = ProgressSubmission {
        idempotency_key: Uuid::new_v4(),
        subject_id: 9,
        assignment_id: None,
        payload: MutationPayload::lesson_start(ts(5, 0)),
    };

    let error = remote.submit(&submission).await.unwrap_err();
    assert_matches!(error, RemoteError::Validation { status: None, .. });
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_status_codes_map_to_error_classes() {
    let cases = [
        (401, "auth"),
        (409, "conflict"),
        (422, "validation"),
        (429, "network"),
        (503, "network"),
    ];

    for (status, expected) in cases {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&server)
            .await;

        let remote = remote_for(&server).await;
        let error = remote.fetch_user().await.unwrap_err();
        let class = match error {
            RemoteError::Auth { .. } => "auth",
            RemoteError::Conflict { .. } => "conflict",
            RemoteError::Validation { .. } => "validation",
            RemoteError::Network(_) => "network",
            RemoteError::Decode(_) => "decode",
        };
        assert_eq!(class, expected, "HTTP {}", status);
    }
}

#[tokio::test]
async fn test_garbled_body_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .mount(&server)
        .await;

    let remote = remote_for(&server).await;
    let error = remote.fetch_user().await.unwrap_err();
    assert_matches!(error, RemoteError::Decode(_));
    assert!(error.is_transient());
}

#[tokio::test]
async fn test_missing_token_is_config_error() {
    let config = AppConfig {
        server_url: Some("https://example.invalid".to_string()),
        api_token: None,
        database_path: None,
    };
    assert_matches!(
        HttpRemote::new(&config).err(),
        Some(SyncError::Config(ConfigError::MissingValue("api_token")))
    );
}
