//! Event publisher to delivery engine bridge.

mod common;

use common::*;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer};

use fisca_webhooks::{spawn_event_consumer, BusinessEvent, DeliveryStatus, EventPublisher};

/// An event published on the channel flows through the consumer into a
/// signed delivery.
#[tokio::test]
async fn test_published_event_reaches_endpoint() {
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

    let (publisher, receiver) = EventPublisher::new(16);
    let consumer = spawn_event_consumer(h.delivery.clone(), receiver);

    publisher.publish(BusinessEvent::new(
        TENANT_A,
        "filing.submitted",
        json!({"filing_id": "f-2026-q2"}),
    ));

    // Wait for the ledger entry to appear and resolve.
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    let delivery = loop {
        let page = h
            .delivery
            .list_deliveries(TENANT_A, Default::default(), 10, 0)
            .await
            .unwrap();
        if let Some(d) = page
            .items
            .into_iter()
            .find(|d| d.status == DeliveryStatus::Success)
        {
            break d;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "published event never delivered"
        );
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    };

    assert_eq!(delivery.event, "filing.submitted");
    assert_eq!(delivery.payload["data"]["filing_id"], "f-2026-q2");
    assert!(verify_captured_signature(&capture.requests()[0], SECRET_1));

    drop(publisher);
    let _ = consumer.await;
}

/// Events for tenants or event types without subscriptions are consumed
/// quietly.
#[tokio::test]
async fn test_published_event_without_subscribers_is_noop() {
    let h = harness();
    let (publisher, receiver) = EventPublisher::new(16);
    let consumer = spawn_event_consumer(h.delivery.clone(), receiver);

    publisher.publish(BusinessEvent::new(
        TENANT_A,
        "payment.recorded",
        json!({"amount": 5}),
    ));

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(delivery_count(&h.store, TENANT_A).await, 0);

    drop(publisher);
    let _ = consumer.await;
}
