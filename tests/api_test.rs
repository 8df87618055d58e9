//! Chat list REST client and unread snapshot seeding.

use pawlink::{ChatApi, ChatId, RealtimeClient, SessionConfig};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn offline_client() -> RealtimeClient {
    RealtimeClient::new(SessionConfig::new("ws://127.0.0.1:1/ws"))
}

#[tokio::test]
async fn test_fetch_chats_sends_bearer_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/chats/user/u1"))
        .and(header("Authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 1, "name": "general", "hasUnread": false},
            {"id": "2", "name": "random", "hasUnread": true}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let api = ChatApi::new(&server.uri(), Some("tok".to_string())).unwrap();
    let chats = api.fetch_chats("u1").await.unwrap();

    assert_eq!(chats.len(), 2);
    assert_eq!(chats[0].id, ChatId::from(1_u64));
    assert!(!chats[0].has_unread);
    assert_eq!(chats[1].id.as_str(), "2");
    assert!(chats[1].has_unread);
}

#[tokio::test]
async fn test_load_unread_snapshot_initializes_engine() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/chats/user/u1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 1, "hasUnread": false},
            {"id": 2, "hasUnread": true},
            {"id": 3}
        ])))
        .mount(&server)
        .await;

    let api = ChatApi::new(&server.uri(), None).unwrap();
    let client = offline_client();
    client.unread().set("99", true);

    let count = client.load_unread_snapshot(&api, "u1").await.unwrap();

    assert_eq!(count, 3);
    assert!(client.unread().has_unread_messages());
    assert!(client.unread().get(2_u64));
    assert!(!client.unread().get("1"));
    // The snapshot replaces local state entirely.
    assert!(!client.unread().get("99"));
}

#[tokio::test]
async fn test_fetch_chats_error_status_leaves_engine_untouched() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/chats/user/u1"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&server)
        .await;

    let api = ChatApi::new(&server.uri(), Some("expired".to_string())).unwrap();
    let client = offline_client();

    let err = client.load_unread_snapshot(&api, "u1").await.unwrap_err();
    assert!(err.to_string().contains("401"));
    assert_eq!(client.unread().snapshot().revision(), 0);
}

#[tokio::test]
async fn test_fetch_chats_rejects_non_array_body() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/chats/user/u1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "nope"})))
        .mount(&server)
        .await;

    let api = ChatApi::new(&server.uri(), None).unwrap();
    assert!(api.fetch_chats("u1").await.is_err());
}
