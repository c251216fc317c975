mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{test_settings, FakeHost, FakeStore, FILE_ID};
use transcode_reconciler::orchestrator::JobOrchestrator;
use transcode_reconciler::remote::{CachePolicy, RemoteClient, RemoteClientConfig, TranscodeApi};
use transcode_reconciler::store::{AssociationStore, CompletionMarker};
use transcode_reconciler::worker::{ReconcileWorker, RetryPolicy};

#[tokio::test]
async fn pass_leaves_no_memoized_responses_behind() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/videos/v1.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "v1", "status": "processing"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/encodings.json"))
        .and(query_param("video_id", "v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "e1", "video_id": "v1", "profile_id": "p1", "status": "processing"}
        ])))
        .mount(&server)
        .await;

    let client = Arc::new(
        RemoteClient::new(
            "cloud-1",
            "access",
            "secret",
            RemoteClientConfig {
                api_url: format!("{}/v2", server.uri()),
                timeout: Duration::from_secs(5),
                get_retries: 1,
            },
        )
        .unwrap(),
    );
    let store = Arc::new(FakeStore::new());
    store.track(FILE_ID, "v1").await.unwrap();
    let orchestrator = Arc::new(JobOrchestrator::new(
        client.clone(),
        store.clone(),
        Arc::new(FakeHost::with_source_file()),
        test_settings(),
    ));

    client.get_video("v1", CachePolicy::Cached).await.unwrap();
    assert_eq!(client.cached_responses(), 1);

    let worker = ReconcileWorker::new(
        orchestrator,
        Duration::from_secs(60),
        RetryPolicy {
            max_attempts: 1,
            base_backoff: Duration::from_millis(1),
        },
    );
    let summary = worker.run_pass().await;

    assert_eq!(summary.files, 1);
    assert_eq!(summary.errors, 0);
    assert_eq!(summary.materialized, 0);
    assert_eq!(client.cached_responses(), 0);
    let association = store.get(FILE_ID, "v1").await.unwrap().unwrap();
    assert_eq!(association.marker, CompletionMarker::Tracking);
}
