use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use sessionwire_protocol::{ErrorKind, RunRequest};
use sessionwire_transport_client::{SubmitOptions, Target};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::client;

fn accepted(run_id: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"runId": run_id}))
}

#[tokio::test]
async fn submits_and_decodes_acknowledgement() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/runs"))
        .respond_with(accepted("live-1"))
        .expect(1)
        .mount(&server)
        .await;

    let accepted = client(&server.uri(), Target::Live)
        .run_sync(&RunRequest::live(json!({"idea": "x"})), &SubmitOptions::default())
        .await
        .unwrap();

    assert_eq!("live-1", accepted.run_id);
    assert_eq!(None, accepted.total_events);
}

#[tokio::test]
async fn transient_5xx_is_retried_with_the_same_idempotency_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/runs"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/runs"))
        .respond_with(accepted("live-2"))
        .expect(1)
        .mount(&server)
        .await;

    let accepted = client(&server.uri(), Target::Live)
        .run_sync(&RunRequest::live(json!({"idea": "y"})), &SubmitOptions::default())
        .await
        .unwrap();
    assert_eq!("live-2", accepted.run_id);

    let requests = server.received_requests().await.unwrap();
    let keys: Vec<_> = requests
        .iter()
        .map(|r| r.headers.get("idempotency-key").unwrap().to_str().unwrap().to_string())
        .collect();
    assert_eq!(3, keys.len());
    assert!(keys.iter().all(|k| k == &keys[0]));
    assert_eq!(64, keys[0].len());
}

#[tokio::test]
async fn caller_supplied_idempotency_key_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/runs"))
        .and(header("idempotency-key", "caller-key-1"))
        .respond_with(accepted("live-3"))
        .expect(1)
        .mount(&server)
        .await;

    let options = SubmitOptions {
        idempotency_key: Some("caller-key-1".to_string()),
        ..SubmitOptions::default()
    };
    client(&server.uri(), Target::Live)
        .run_sync(&RunRequest::live(json!({})), &options)
        .await
        .unwrap();
}

#[tokio::test]
async fn exhausted_retries_surface_the_last_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/runs"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": {"message": "db down"}})))
        .expect(3)
        .mount(&server)
        .await;

    let err = client(&server.uri(), Target::Live)
        .run_sync(&RunRequest::live(json!({})), &SubmitOptions::default())
        .await
        .unwrap_err();

    assert_eq!(ErrorKind::ServerError, err.kind);
    assert_eq!(Some(500), err.status);
    assert_eq!("db down", err.message);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let cases = [
        (400, json!({"error": {"field": "input", "message": "empty"}}), ErrorKind::BadInput),
        (401, json!({}), ErrorKind::Unauthorized),
        (403, json!({}), ErrorKind::Unauthorized),
        (413, json!({"max": 4096}), ErrorKind::LimitExceeded),
        (501, json!({}), ErrorKind::ServerError),
    ];
    for (status, body, kind) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/runs"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server.uri(), Target::Live)
            .run_sync(&RunRequest::live(json!({})), &SubmitOptions::default())
            .await
            .unwrap_err();
        assert_eq!(kind, err.kind, "status {status}");
        assert_eq!(Some(status), err.status);
    }
}

#[tokio::test]
async fn rate_limit_reports_retry_after_without_retrying() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/runs"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "12"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server.uri(), Target::Live)
        .run_sync(&RunRequest::live(json!({})), &SubmitOptions::default())
        .await
        .unwrap_err();

    assert_eq!(ErrorKind::RateLimited, err.kind);
    assert_eq!(Some(12), err.retry_after_seconds);
}

#[tokio::test]
async fn slow_response_times_out_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/runs"))
        .respond_with(accepted("late").set_delay(Duration::from_millis(500)))
        .expect(1)
        .mount(&server)
        .await;

    let options = SubmitOptions {
        timeout: Some(Duration::from_millis(50)),
        ..SubmitOptions::default()
    };
    let err = client(&server.uri(), Target::Live)
        .run_sync(&RunRequest::live(json!({})), &options)
        .await
        .unwrap_err();

    assert_eq!(ErrorKind::Timeout, err.kind);
}

#[tokio::test]
async fn connection_refused_is_a_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(&format!("http://{addr}"), Target::Live)
        .run_sync(&RunRequest::live(json!({})), &SubmitOptions::default())
        .await
        .unwrap_err();

    assert_eq!(ErrorKind::NetworkError, err.kind);
    assert!(err.is_retryable());
}
