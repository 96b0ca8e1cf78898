//! Razorpay adapter over the Orders and Refunds APIs.
//!
//! A created order requires checkout-side action and never self-resolves;
//! it is surfaced as `RequiresAction` and left to reconciliation.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;

use super::{
    GatewayFault, GatewayKind, GatewayPaymentRequest, GatewayPaymentResponse,
    GatewayPaymentStatus, GatewayRefundRequest, GatewayRefundResponse, GatewayRefundStatus,
    GatewayStatusResponse, PaymentGateway, GATEWAY_TIMEOUT_SECS,
};

const BASE_URL: &str = "https://api.razorpay.com";

pub struct RazorpayGateway {
    client: Client,
    key_id: String,
    key_secret: String,
    base_url: String,
}

impl RazorpayGateway {
    pub fn new(key_id: String, key_secret: String) -> Result<Self, GatewayFault> {
        Self::with_base_url(key_id, key_secret, BASE_URL.to_string())
    }

    pub fn with_base_url(
        key_id: String,
        key_secret: String,
        base_url: String,
    ) -> Result<Self, GatewayFault> {
        let client = Client::builder()
            .timeout(Duration::from_secs(GATEWAY_TIMEOUT_SECS))
            .build()
            .map_err(GatewayFault::transport)?;
        Ok(Self {
            client,
            key_id,
            key_secret,
            base_url,
        })
    }

    async fn post(&self, path: &str, body: &JsonValue) -> Result<JsonValue, GatewayFault> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(body)
            .send()
            .await
            .map_err(GatewayFault::transport)?;
        self.handle_response(response).await
    }

    async fn get(&self, path: &str) -> Result<JsonValue, GatewayFault> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await
            .map_err(GatewayFault::transport)?;
        self.handle_response(response).await
    }

    async fn handle_response(
        &self,
        response: reqwest::Response,
    ) -> Result<JsonValue, GatewayFault> {
        let status = response.status();
        if status.is_success() {
            response.json().await.map_err(GatewayFault::parse)
        } else {
            let body: JsonValue = response.json().await.unwrap_or(JsonValue::Null);
            let code = body["error"]["code"].as_str().map(|s| s.to_string());
            let message = body["error"]["description"]
                .as_str()
                .unwrap_or("razorpay request failed")
                .to_string();
            Err(GatewayFault::api(status.as_u16(), code, message))
        }
    }
}

fn map_payment_status(status: &str) -> GatewayPaymentStatus {
    match status {
        "captured" => GatewayPaymentStatus::Succeeded,
        "authorized" => GatewayPaymentStatus::Processing,
        "created" | "attempted" => GatewayPaymentStatus::RequiresAction,
        _ => GatewayPaymentStatus::Failed,
    }
}

fn map_refund_status(status: &str) -> GatewayRefundStatus {
    match status {
        "processed" => GatewayRefundStatus::Succeeded,
        "pending" | "created" => GatewayRefundStatus::Pending,
        _ => GatewayRefundStatus::Failed,
    }
}

/// Razorpay notes accept flat string values only.
fn notes_from_metadata(metadata: &JsonValue) -> JsonValue {
    let mut notes = serde_json::Map::new();
    if let Some(map) = metadata.as_object() {
        for (key, value) in map {
            let rendered = match value {
                JsonValue::String(s) => s.clone(),
                JsonValue::Number(n) => n.to_string(),
                JsonValue::Bool(b) => b.to_string(),
                _ => continue,
            };
            notes.insert(key.clone(), JsonValue::String(rendered));
        }
    }
    JsonValue::Object(notes)
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Razorpay
    }

    async fn create_payment(
        &self,
        request: GatewayPaymentRequest,
    ) -> Result<GatewayPaymentResponse, GatewayFault> {
        let body = json!({
            "amount": request.amount,
            "currency": request.currency,
            "notes": notes_from_metadata(&request.metadata),
        });

        let raw = self.post("/v1/orders", &body).await?;

        let provider_payment_id = raw["id"]
            .as_str()
            .ok_or_else(|| {
                GatewayFault::api(502, None, "razorpay response missing order id".to_string())
            })?
            .to_string();

        // Orders are born "created"; the payer completes them on the
        // checkout side.
        let status = map_payment_status(raw["status"].as_str().unwrap_or("created"));

        Ok(GatewayPaymentResponse {
            provider_payment_id,
            status,
            client_secret: None,
            next_action: Some(json!({ "type": "razorpay_checkout", "orderId": raw["id"] })),
            raw,
        })
    }

    async fn refund_payment(
        &self,
        request: GatewayRefundRequest,
    ) -> Result<GatewayRefundResponse, GatewayFault> {
        let mut body = serde_json::Map::new();
        if let Some(amount) = request.amount {
            body.insert("amount".to_string(), json!(amount));
        }
        if let Some(metadata) = &request.metadata {
            body.insert("notes".to_string(), notes_from_metadata(metadata));
        }

        let raw = self
            .post(
                &format!("/v1/payments/{}/refund", request.provider_payment_id),
                &JsonValue::Object(body),
            )
            .await?;

        let provider_refund_id = raw["id"]
            .as_str()
            .ok_or_else(|| {
                GatewayFault::api(502, None, "razorpay response missing refund id".to_string())
            })?
            .to_string();
        let status = map_refund_status(raw["status"].as_str().unwrap_or(""));

        Ok(GatewayRefundResponse {
            provider_refund_id,
            status,
            raw,
        })
    }

    async fn get_payment_status(
        &self,
        provider_payment_id: &str,
    ) -> Result<GatewayStatusResponse, GatewayFault> {
        let raw = self
            .get(&format!("/v1/payments/{}", provider_payment_id))
            .await?;

        Ok(GatewayStatusResponse {
            status: map_payment_status(raw["status"].as_str().unwrap_or("")),
            amount: raw["amount"].as_i64(),
            currency: raw["currency"].as_str().map(|s| s.to_uppercase()),
            metadata: match &raw["notes"] {
                JsonValue::Null => None,
                v => Some(v.clone()),
            },
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(map_payment_status("captured"), GatewayPaymentStatus::Succeeded);
        assert_eq!(map_payment_status("authorized"), GatewayPaymentStatus::Processing);
        assert_eq!(map_payment_status("created"), GatewayPaymentStatus::RequiresAction);
        assert_eq!(map_payment_status("failed"), GatewayPaymentStatus::Failed);
    }

    #[test]
    fn refund_status_mapping() {
        assert_eq!(map_refund_status("processed"), GatewayRefundStatus::Succeeded);
        assert_eq!(map_refund_status("pending"), GatewayRefundStatus::Pending);
        assert_eq!(map_refund_status("failed"), GatewayRefundStatus::Failed);
    }

    #[test]
    fn notes_keep_primitives_only() {
        let notes = notes_from_metadata(&json!({"a": "x", "b": 2, "c": {"deep": true}}));
        assert_eq!(notes["a"], "x");
        assert_eq!(notes["b"], "2");
        assert!(notes.get("c").is_none());
    }
}
