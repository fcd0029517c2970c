//! Signature and canonical-payload tests against a live mock endpoint.

mod common;

use common::*;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer};

use fisca_webhooks::canonical::to_canonical_bytes;
use fisca_webhooks::DeliveryStatus;

/// The delivered body is the canonical serialization of the payload and
/// the signature header verifies against an independently computed
/// HMAC-SHA256 over `{timestamp}.{body}`.
#[tokio::test]
async fn test_delivery_is_signed_and_canonical() {
    let server = MockServer::start().await;
    let capture = CaptureResponder::new();
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(capture.clone())
        .mount(&server)
        .await;

    let h = harness();
    let sub = subscription(TENANT_A, &format!("{}/hook", server.uri()), &["filing.submitted"]);
    h.store.insert_subscription(sub).await;

    // Key order here is deliberately not sorted.
    let data = json!({"zone": "DE", "amount": 1250.75, "filing_id": "f-42"});
    let ids = h.delivery.trigger(TENANT_A, "filing.submitted", &data).await;
    assert_eq!(ids.len(), 1);

    wait_for_delivery(&h.store, TENANT_A, ids[0], 5000, |d| {
        d.status == DeliveryStatus::Success
    })
    .await;

    let requests = capture.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];

    // Body is canonical: reparsing and re-canonicalizing reproduces the
    // exact bytes a verifier would sign.
    let body_json = request.body_json();
    assert_eq!(to_canonical_bytes(&body_json), request.body);

    // Independent verifier accepts the signature.
    assert!(verify_captured_signature(request, SECRET_1));

    // Wrong secret does not.
    assert!(!verify_captured_signature(request, "whsec_wrong"));
}

/// All engine headers are present on the wire.
#[tokio::test]
async fn test_delivery_headers() {
    let server = MockServer::start().await;
    let capture = CaptureResponder::new();
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(capture.clone())
        .mount(&server)
        .await;

    let h = harness();
    let sub = subscription(TENANT_A, &format!("{}/hook", server.uri()), &["invoice.issued"]);
    let sub_id = sub.id;
    h.store.insert_subscription(sub).await;

    let ids = h
        .delivery
        .trigger(TENANT_A, "invoice.issued", &json!({"invoice_id": "inv-9"}))
        .await;
    wait_for_delivery(&h.store, TENANT_A, ids[0], 5000, |d| {
        d.status == DeliveryStatus::Success
    })
    .await;

    let request = &capture.requests()[0];
    assert_eq!(request.header("content-type"), Some("application/json"));
    assert_eq!(request.header("x-webhook-id"), Some(sub_id.to_string().as_str()));
    assert!(request.header("x-webhook-signature").unwrap().starts_with("sha256="));
    assert!(request
        .header("x-webhook-timestamp")
        .unwrap()
        .parse::<i64>()
        .is_ok());
    assert!(request
        .header("user-agent")
        .unwrap()
        .starts_with("fisca-webhooks/"));
}

/// Subscription static headers ride along but cannot shadow engine
/// headers.
#[tokio::test]
async fn test_custom_headers_sent_but_never_override() {
    let server = MockServer::start().await;
    let capture = CaptureResponder::new();
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(capture.clone())
        .mount(&server)
        .await;

    let h = harness();
    let mut sub = subscription(TENANT_A, &format!("{}/hook", server.uri()), &["company.updated"]);
    sub.headers.insert("X-Erp-Token".to_string(), "tok-123".to_string());
    sub.headers.insert("X-Webhook-Signature".to_string(), "spoofed".to_string());
    h.store.insert_subscription(sub).await;

    let ids = h
        .delivery
        .trigger(TENANT_A, "company.updated", &json!({}))
        .await;
    wait_for_delivery(&h.store, TENANT_A, ids[0], 5000, |d| {
        d.status == DeliveryStatus::Success
    })
    .await;

    let request = &capture.requests()[0];
    assert_eq!(request.header("x-erp-token"), Some("tok-123"));
    // Engine signature wins over the spoofed static header.
    assert!(request.header("x-webhook-signature").unwrap().starts_with("sha256="));
    assert!(verify_captured_signature(request, SECRET_1));
}

/// A subscription without a usable secret is an internal fault: the
/// attempt fails before any network call and the fault lands on the
/// ledger record.
#[tokio::test]
async fn test_empty_secret_is_recorded_fault_without_network_call() {
    let server = MockServer::start().await;
    let counter = CountingResponder::new();
    Mock::given(method("POST"))
        .respond_with(counter.clone())
        .mount(&server)
        .await;

    let h = harness();
    let mut sub = subscription(TENANT_A, &format!("{}/hook", server.uri()), &["filing.rejected"]);
    sub.secret_encrypted = String::new();
    h.store.insert_subscription(sub).await;

    let ids = h
        .delivery
        .trigger(TENANT_A, "filing.rejected", &json!({}))
        .await;
    let delivery = wait_for_delivery(&h.store, TENANT_A, ids[0], 5000, |d| {
        d.status == DeliveryStatus::Failed
    })
    .await;

    assert!(delivery.error.unwrap().contains("signing failed"));
    assert_eq!(delivery.status_code, None);
    assert_eq!(counter.count(), 0, "endpoint must not be called");
}
