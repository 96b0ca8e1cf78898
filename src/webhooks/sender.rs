//! Outbound webhook POST: build the payload, sign it, classify the result.
//!
//! Deliberately store-free so the attempt mechanics can be exercised against
//! plain HTTP receivers; the scheduler owns persistence.

use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use uuid::Uuid;

use super::signature;
use crate::models::Event;

pub const USER_AGENT_VALUE: &str = "OpenPayFlow/1.0";
pub const SIGNATURE_HEADER: &str = "X-OpenPayFlow-Signature";
pub const EVENT_TYPE_HEADER: &str = "X-OpenPayFlow-Event-Type";
pub const DELIVERY_ID_HEADER: &str = "X-OpenPayFlow-Delivery-Id";

/// Wire shape of a webhook body. `created` is the event time in unix
/// seconds; the signature is over the exact serialized bytes.
#[derive(Debug, Serialize)]
pub struct WebhookBody<'a> {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: &'a str,
    pub created: i64,
    pub data: &'a JsonValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { status: u16 },
    Failed { kind: &'static str, detail: String },
}

impl DeliveryOutcome {
    /// `<kind>:<detail>` form persisted on the delivery row.
    pub fn error_string(&self) -> Option<String> {
        match self {
            DeliveryOutcome::Delivered { .. } => None,
            DeliveryOutcome::Failed { kind, detail } => Some(format!("{}:{}", kind, detail)),
        }
    }
}

pub async fn send_webhook(
    client: &Client,
    url: &str,
    secret: &str,
    event: &Event,
    delivery_id: Uuid,
    timeout: Duration,
) -> DeliveryOutcome {
    let body = WebhookBody {
        id: event.id,
        event_type: &event.event_type,
        created: event.created_at.timestamp(),
        data: &event.payload,
    };
    let bytes = match serde_json::to_vec(&body) {
        Ok(bytes) => bytes,
        Err(e) => {
            return DeliveryOutcome::Failed {
                kind: "serialize",
                detail: e.to_string(),
            }
        }
    };

    let signature = signature::signature_header(secret, &bytes);

    let result = client
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .header(USER_AGENT, USER_AGENT_VALUE)
        .header(SIGNATURE_HEADER, signature)
        .header(EVENT_TYPE_HEADER, &event.event_type)
        .header(DELIVERY_ID_HEADER, delivery_id.to_string())
        .timeout(timeout)
        .body(bytes)
        .send()
        .await;

    match result {
        Ok(response) if response.status().is_success() => DeliveryOutcome::Delivered {
            status: response.status().as_u16(),
        },
        Ok(response) => DeliveryOutcome::Failed {
            kind: "http",
            detail: response.status().as_u16().to_string(),
        },
        Err(e) if e.is_timeout() => DeliveryOutcome::Failed {
            kind: "timeout",
            detail: format!("no response within {}ms", timeout.as_millis()),
        },
        Err(e) => DeliveryOutcome::Failed {
            kind: "transport",
            detail: e.without_url().to_string(),
        },
    }
}
