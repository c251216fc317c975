use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use transcode_reconciler::error::TranscodeError;
use transcode_reconciler::remote::{
    CachePolicy, EncodingFilter, JobStatus, RemoteClient, RemoteClientConfig, TranscodeApi,
};

fn client(server: &MockServer, timeout: Duration) -> RemoteClient {
    RemoteClient::new(
        "cloud-1",
        "access",
        "secret",
        RemoteClientConfig {
            api_url: format!("{}/v2", server.uri()),
            timeout,
            get_retries: 1,
        },
    )
    .unwrap()
}

fn video_json(id: &str, status: &str) -> serde_json::Value {
    json!({"id": id, "status": status, "extname": ".mp4", "duration": 1500})
}

#[tokio::test]
async fn requests_are_signed_with_account_fields() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/videos/v1.json"))
        .and(query_param("cloud_id", "cloud-1"))
        .and(query_param("access_key", "access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(video_json("v1", "success")))
        .expect(1)
        .mount(&server)
        .await;

    let video = client(&server, Duration::from_secs(5))
        .get_video("v1", CachePolicy::Cached)
        .await
        .unwrap();

    assert_eq!(video.status, JobStatus::Success);
    assert_eq!(video.duration, Some(1500));

    let requests = server.received_requests().await.unwrap();
    let query = requests[0].url.query().unwrap_or_default().to_string();
    assert!(query.contains("signature="));
    assert!(query.contains("timestamp="));
    assert!(!query.contains("secret"));
}

#[tokio::test]
async fn error_envelope_becomes_remote_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/videos/missing.json"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(json!({"error": "RecordNotFound", "message": "Couldn't find Video"})),
        )
        .mount(&server)
        .await;

    let err = client(&server, Duration::from_secs(5))
        .get_video("missing", CachePolicy::Cached)
        .await
        .unwrap_err();

    match err {
        TranscodeError::Remote { code, message } => {
            assert_eq!(code, "RecordNotFound");
            assert_eq!(message, "Couldn't find Video");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn non_success_status_without_envelope_is_remote_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/profiles.json"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = client(&server, Duration::from_secs(5))
        .list_profiles(CachePolicy::Cached)
        .await
        .unwrap_err();

    assert!(matches!(err, TranscodeError::Remote { ref code, .. } if code == "503"));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn reads_are_memoized_until_refreshed_or_cleared() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/encodings.json"))
        .and(query_param("video_id", "v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "e1", "video_id": "v1", "profile_id": "p1", "status": "processing"}
        ])))
        .expect(3)
        .mount(&server)
        .await;

    let client = client(&server, Duration::from_secs(5));
    let filter = EncodingFilter::for_video("v1");

    client.list_encodings(&filter, CachePolicy::Cached).await.unwrap();
    client.list_encodings(&filter, CachePolicy::Cached).await.unwrap();
    assert_eq!(client.cached_responses(), 1);

    client.list_encodings(&filter, CachePolicy::Refresh).await.unwrap();

    client.clear_cache();
    assert_eq!(client.cached_responses(), 0);
    let encodings = client.list_encodings(&filter, CachePolicy::Cached).await.unwrap();
    assert_eq!(encodings[0].id, "e1");
}

#[tokio::test]
async fn get_is_retried_once_after_a_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/videos/v1.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(video_json("v1", "processing"))
                .set_delay(Duration::from_secs(2)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/videos/v1.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(video_json("v1", "success")))
        .mount(&server)
        .await;

    let video = client(&server, Duration::from_millis(300))
        .get_video("v1", CachePolicy::Refresh)
        .await
        .unwrap();

    assert_eq!(video.status, JobStatus::Success);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn submissions_are_never_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/videos.json"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(video_json("v1", "processing"))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let err = client(&server, Duration::from_millis(300))
        .submit("http://example.com/a.mov", &["p1".to_string()], None)
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn submit_sends_a_signed_form() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/videos.json"))
        .and(body_string_contains("profiles=p1%2Cp2"))
        .and(body_string_contains("state_update_url="))
        .and(body_string_contains("signature="))
        .respond_with(ResponseTemplate::new(201).set_body_json(video_json("v9", "processing")))
        .expect(1)
        .mount(&server)
        .await;

    let video = client(&server, Duration::from_secs(5))
        .submit(
            "http://example.com/a.mov",
            &["p1".to_string(), "p2".to_string()],
            Some("https://media.example.com/callback/f1".to_string()),
        )
        .await
        .unwrap();

    assert_eq!(video.id, "v9");
}

#[tokio::test]
async fn submit_without_profiles_fails_before_any_request() {
    let server = MockServer::start().await;

    let err = client(&server, Duration::from_secs(5))
        .submit("http://example.com/a.mov", &[], None)
        .await
        .unwrap_err();

    assert!(matches!(err, TranscodeError::Validation(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_reports_whether_anything_was_deleted() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v2/videos/v1.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"deleted": true})))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v2/encodings/e1.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"deleted": false})))
        .mount(&server)
        .await;

    let client = client(&server, Duration::from_secs(5));
    assert!(client.delete_video("v1").await.unwrap());
    assert!(!client.delete_encoding("e1").await.unwrap());
}

#[test]
fn blank_credentials_are_rejected() {
    let err = RemoteClient::new("cloud", "", "secret", RemoteClientConfig::default())
        .err()
        .unwrap();
    assert!(matches!(err, TranscodeError::Configuration(_)));
}
