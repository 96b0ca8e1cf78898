//! Stripe adapter over the PaymentIntents API.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;
use std::time::Duration;

use super::{
    GatewayFault, GatewayKind, GatewayPaymentRequest, GatewayPaymentResponse,
    GatewayPaymentStatus, GatewayRefundRequest, GatewayRefundResponse, GatewayRefundStatus,
    GatewayStatusResponse, PaymentGateway, GATEWAY_TIMEOUT_SECS,
};

const BASE_URL: &str = "https://api.stripe.com";

pub struct StripeGateway {
    client: Client,
    secret_key: String,
    base_url: String,
}

impl StripeGateway {
    pub fn new(secret_key: String) -> Result<Self, GatewayFault> {
        Self::with_base_url(secret_key, BASE_URL.to_string())
    }

    pub fn with_base_url(secret_key: String, base_url: String) -> Result<Self, GatewayFault> {
        let client = Client::builder()
            .timeout(Duration::from_secs(GATEWAY_TIMEOUT_SECS))
            .build()
            .map_err(GatewayFault::transport)?;
        Ok(Self {
            client,
            secret_key,
            base_url,
        })
    }

    /// Stripe takes form-encoded bodies; nested keys use bracket syntax.
    async fn post_form(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<JsonValue, GatewayFault> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.secret_key))
            .form(form)
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
            .header("Authorization", format!("Bearer {}", self.secret_key))
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
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("stripe request failed")
                .to_string();
            Err(GatewayFault::api(status.as_u16(), code, message))
        }
    }
}

fn map_payment_status(status: &str) -> GatewayPaymentStatus {
    match status {
        "succeeded" => GatewayPaymentStatus::Succeeded,
        "processing" => GatewayPaymentStatus::Processing,
        "requires_action" | "requires_confirmation" => GatewayPaymentStatus::RequiresAction,
        _ => GatewayPaymentStatus::Failed,
    }
}

fn map_refund_status(status: &str) -> GatewayRefundStatus {
    match status {
        "succeeded" => GatewayRefundStatus::Succeeded,
        "pending" => GatewayRefundStatus::Pending,
        _ => GatewayRefundStatus::Failed,
    }
}

/// Flatten metadata primitives into `metadata[key]` form fields.
fn metadata_form_fields(metadata: &JsonValue, form: &mut Vec<(String, String)>) {
    if let Some(map) = metadata.as_object() {
        for (key, value) in map {
            let rendered = match value {
                JsonValue::String(s) => s.clone(),
                JsonValue::Number(n) => n.to_string(),
                JsonValue::Bool(b) => b.to_string(),
                _ => continue,
            };
            form.push((format!("metadata[{}]", key), rendered));
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Stripe
    }

    async fn create_payment(
        &self,
        request: GatewayPaymentRequest,
    ) -> Result<GatewayPaymentResponse, GatewayFault> {
        let mut form = vec![
            ("amount".to_string(), request.amount.to_string()),
            ("currency".to_string(), request.currency.to_lowercase()),
            ("confirm".to_string(), "true".to_string()),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
            (
                "automatic_payment_methods[allow_redirects]".to_string(),
                "never".to_string(),
            ),
        ];
        if let Some(customer) = &request.customer_id {
            form.push(("customer".to_string(), customer.clone()));
        }
        if let Some(method) = &request.method_id {
            form.push(("payment_method".to_string(), method.clone()));
        }
        metadata_form_fields(&request.metadata, &mut form);

        let raw = self.post_form("/v1/payment_intents", &form).await?;

        let provider_payment_id = raw["id"]
            .as_str()
            .ok_or_else(|| {
                GatewayFault::api(502, None, "stripe response missing intent id".to_string())
            })?
            .to_string();
        let status = map_payment_status(raw["status"].as_str().unwrap_or(""));

        Ok(GatewayPaymentResponse {
            provider_payment_id,
            status,
            client_secret: raw["client_secret"].as_str().map(|s| s.to_string()),
            next_action: match &raw["next_action"] {
                JsonValue::Null => None,
                v => Some(v.clone()),
            },
            raw,
        })
    }

    async fn refund_payment(
        &self,
        request: GatewayRefundRequest,
    ) -> Result<GatewayRefundResponse, GatewayFault> {
        let mut form = vec![(
            "payment_intent".to_string(),
            request.provider_payment_id.clone(),
        )];
        if let Some(amount) = request.amount {
            form.push(("amount".to_string(), amount.to_string()));
        }
        if let Some(reason) = &request.reason {
            form.push(("reason".to_string(), reason.clone()));
        }
        if let Some(metadata) = &request.metadata {
            metadata_form_fields(metadata, &mut form);
        }

        let raw = self.post_form("/v1/refunds", &form).await?;

        let provider_refund_id = raw["id"]
            .as_str()
            .ok_or_else(|| {
                GatewayFault::api(502, None, "stripe response missing refund id".to_string())
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
            .get(&format!("/v1/payment_intents/{}", provider_payment_id))
            .await?;

        Ok(GatewayStatusResponse {
            status: map_payment_status(raw["status"].as_str().unwrap_or("")),
            amount: raw["amount"].as_i64(),
            currency: raw["currency"].as_str().map(|s| s.to_uppercase()),
            metadata: match &raw["metadata"] {
                JsonValue::Null => None,
                v => Some(v.clone()),
            },
            raw,
        })
    }
}
