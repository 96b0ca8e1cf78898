//! Exercises the webhook sender against in-process HTTP receivers: header
//! set, signature, and outcome classification.

mod common;

use chrono::Utc;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use openpayflow::models::Event;
use openpayflow::webhooks::sender::{self, DeliveryOutcome};
use openpayflow::webhooks::signature;

const SECRET: &str = "whsec_sender_test";

fn test_event() -> Event {
    Event {
        id: Uuid::new_v4(),
        event_type: "payment.created".to_string(),
        payload: json!({
            "paymentSnapshot": { "amount": 1999, "currency": "USD" },
            "correlationId": "corr-1",
        }),
        created_at: Utc::now(),
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .expect("client")
}

#[tokio::test]
async fn delivers_on_2xx_with_signed_body_and_headers() {
    let receiver = common::spawn_receiver(0).await;
    let event = test_event();
    let delivery_id = Uuid::new_v4();

    let outcome = sender::send_webhook(
        &client(),
        &receiver.url,
        SECRET,
        &event,
        delivery_id,
        Duration::from_secs(5),
    )
    .await;

    assert_eq!(outcome, DeliveryOutcome::Delivered { status: 200 });
    assert_eq!(receiver.hits(), 1);

    let captured = receiver.captured().await;
    let request = &captured[0];

    assert_eq!(
        request.headers.get("content-type").unwrap(),
        "application/json"
    );
    assert_eq!(request.headers.get("user-agent").unwrap(), "OpenPayFlow/1.0");
    assert_eq!(
        request.headers.get("x-openpayflow-event-type").unwrap(),
        "payment.created"
    );
    assert_eq!(
        request
            .headers
            .get("x-openpayflow-delivery-id")
            .unwrap()
            .to_str()
            .unwrap(),
        delivery_id.to_string()
    );

    // The signature verifies against the exact received bytes.
    let signature_header = request
        .headers
        .get("x-openpayflow-signature")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(signature_header.starts_with("sha256="));
    assert!(signature::verify(SECRET, &request.body, signature_header));
    assert!(!signature::verify("wrong-secret", &request.body, signature_header));

    // Body shape: {id, type, created, data}.
    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["id"], event.id.to_string());
    assert_eq!(body["type"], "payment.created");
    assert_eq!(body["created"], event.created_at.timestamp());
    assert_eq!(body["data"]["paymentSnapshot"]["amount"], 1999);
}

#[tokio::test]
async fn classifies_non_2xx_as_http_failure() {
    let receiver = common::spawn_receiver(usize::MAX).await;
    let event = test_event();

    let outcome = sender::send_webhook(
        &client(),
        &receiver.url,
        SECRET,
        &event,
        Uuid::new_v4(),
        Duration::from_secs(5),
    )
    .await;

    assert_eq!(outcome.error_string().as_deref(), Some("http:500"));
}

#[tokio::test]
async fn classifies_slow_receiver_as_timeout() {
    let receiver = common::spawn_receiver_with_delay(0, 2_000).await;
    let event = test_event();

    let outcome = sender::send_webhook(
        &client(),
        &receiver.url,
        SECRET,
        &event,
        Uuid::new_v4(),
        Duration::from_millis(200),
    )
    .await;

    match outcome {
        DeliveryOutcome::Failed { kind, .. } => assert_eq!(kind, "timeout"),
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn classifies_unreachable_host_as_transport_failure() {
    let event = test_event();

    // Nothing listens here; the bind-then-drop keeps the port closed.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let outcome = sender::send_webhook(
        &client(),
        &format!("http://{}/hook", addr),
        SECRET,
        &event,
        Uuid::new_v4(),
        Duration::from_secs(2),
    )
    .await;

    match outcome {
        DeliveryOutcome::Failed { kind, .. } => assert_eq!(kind, "transport"),
        other => panic!("expected transport failure, got {:?}", other),
    }
}

#[tokio::test]
async fn recovers_after_transient_failures() {
    let receiver = common::spawn_receiver(3).await;
    let event = test_event();
    let delivery_id = Uuid::new_v4();

    let mut outcomes = Vec::new();
    for _ in 0..4 {
        outcomes.push(
            sender::send_webhook(
                &client(),
                &receiver.url,
                SECRET,
                &event,
                delivery_id,
                Duration::from_secs(5),
            )
            .await,
        );
    }

    assert_eq!(outcomes[0].error_string().as_deref(), Some("http:500"));
    assert_eq!(outcomes[1].error_string().as_deref(), Some("http:500"));
    assert_eq!(outcomes[2].error_string().as_deref(), Some("http:500"));
    assert_eq!(outcomes[3], DeliveryOutcome::Delivered { status: 200 });
    assert_eq!(receiver.hits(), 4);
}
