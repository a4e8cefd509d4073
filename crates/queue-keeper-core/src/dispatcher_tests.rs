use super::*;
use std::collections::HashMap;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[test]
fn signs_payload_with_hmac_sha256() {
    let signature = sign_payload(SignatureScheme::HmacSha256, "secret", b"{\"hello\":\"world\"}");
    assert!(signature.starts_with("hmac-sha256="));
    assert_eq!(signature.len(), "hmac-sha256=".len() + 64);
}

#[test]
fn signature_is_deterministic_for_same_input() {
    let a = sign_payload(SignatureScheme::HmacSha256, "secret", b"payload");
    let b = sign_payload(SignatureScheme::HmacSha256, "secret", b"payload");
    assert_eq!(a, b);
}

#[test]
fn unsupported_signing_scheme_is_rejected() {
    let err = "sha1".parse::<SignatureScheme>().unwrap_err();
    assert!(matches!(err, DispatchError::UnsupportedScheme(_)));
    assert!(!err.is_transient());
}

#[test]
fn classify_2xx_is_success() {
    assert_eq!(
        classify_response(200, None),
        DispatchOutcome::Success { status: 200 }
    );
    assert_eq!(
        classify_response(204, None),
        DispatchOutcome::Success { status: 204 }
    );
}

#[test]
fn classify_retryable_4xx_is_retry() {
    match classify_response(429, Some(5)) {
        DispatchOutcome::Retry { retry_after, .. } => {
            assert_eq!(retry_after, Some(StdDuration::from_secs(5)));
        }
        other => panic!("expected retry, got {other:?}"),
    }
}

#[test]
fn classify_other_4xx_is_discard() {
    assert!(matches!(
        classify_response(404, None),
        DispatchOutcome::Discard { status: 404, .. }
    ));
}

#[test]
fn classify_5xx_is_retry() {
    assert!(matches!(
        classify_response(503, None),
        DispatchOutcome::Retry { status: Some(503), .. }
    ));
}

#[tokio::test]
async fn dispatch_sends_signature_header_and_reports_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header_exists("X-Convoy-Signature"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dispatcher = HttpDispatcher::new().unwrap();
    let outcome = dispatcher
        .dispatch(
            &format!("{}/hook", server.uri()),
            "secret",
            "hmac-sha256",
            b"{}",
            &HashMap::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::Success { status: 200 });
}

#[tokio::test]
async fn dispatch_rejects_an_unsupported_signing_scheme_without_a_request() {
    let dispatcher = HttpDispatcher::new().unwrap();
    let err = dispatcher
        .dispatch("https://example.test/hook", "secret", "sha1", b"{}", &HashMap::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::UnsupportedScheme(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn dispatch_surfaces_retry_after_on_429() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&server)
        .await;

    let dispatcher = HttpDispatcher::new().unwrap();
    let outcome = dispatcher
        .dispatch(&server.uri(), "secret", "hmac-sha256", b"{}", &HashMap::new())
        .await
        .unwrap();

    match outcome {
        DispatchOutcome::Retry { retry_after, .. } => {
            assert_eq!(retry_after, Some(StdDuration::from_secs(7)));
        }
        other => panic!("expected retry, got {other:?}"),
    }
}
