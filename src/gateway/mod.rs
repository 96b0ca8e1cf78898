//! Gateway port: the only outward integration point.

pub mod mock;
pub mod razorpay;
pub mod stripe;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::Config;

pub use mock::{MockGateway, MockGatewayConfig};
pub use razorpay::RazorpayGateway;
pub use stripe::StripeGateway;

/// Per-call timeout applied by every adapter.
pub const GATEWAY_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    Stripe,
    Razorpay,
    Mock,
}

impl GatewayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayKind::Stripe => "stripe",
            GatewayKind::Razorpay => "razorpay",
            GatewayKind::Mock => "mock",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stripe" => Some(GatewayKind::Stripe),
            "razorpay" => Some(GatewayKind::Razorpay),
            "mock" => Some(GatewayKind::Mock),
            _ => None,
        }
    }
}

impl std::fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform failure signal from any adapter.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct GatewayFault {
    pub message: String,
    pub provider_code: Option<String>,
    pub http_status: Option<u16>,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl GatewayFault {
    pub fn api(http_status: u16, provider_code: Option<String>, message: String) -> Self {
        Self {
            message,
            provider_code,
            http_status: Some(http_status),
            cause: None,
        }
    }

    pub fn transport(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "gateway request timed out".to_string()
        } else {
            "gateway request failed".to_string()
        };
        Self {
            message,
            provider_code: None,
            http_status: None,
            cause: Some(Box::new(err)),
        }
    }

    pub fn parse(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            message: "failed to parse gateway response".to_string(),
            provider_code: None,
            http_status: None,
            cause: Some(Box::new(err)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayPaymentStatus {
    Succeeded,
    Processing,
    RequiresAction,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayRefundStatus {
    Succeeded,
    Pending,
    Failed,
}

#[derive(Debug, Clone)]
pub struct GatewayPaymentRequest {
    pub amount: i64,
    /// Upper-case ISO-4217; adapters lower-case it where their API requires.
    pub currency: String,
    pub metadata: JsonValue,
    pub customer_id: Option<String>,
    pub method_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GatewayPaymentResponse {
    pub provider_payment_id: String,
    pub status: GatewayPaymentStatus,
    pub client_secret: Option<String>,
    pub next_action: Option<JsonValue>,
    pub raw: JsonValue,
}

#[derive(Debug, Clone)]
pub struct GatewayRefundRequest {
    pub provider_payment_id: String,
    pub amount: Option<i64>,
    pub reason: Option<String>,
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Clone)]
pub struct GatewayRefundResponse {
    pub provider_refund_id: String,
    pub status: GatewayRefundStatus,
    pub raw: JsonValue,
}

#[derive(Debug, Clone)]
pub struct GatewayStatusResponse {
    pub status: GatewayPaymentStatus,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub metadata: Option<JsonValue>,
    pub raw: JsonValue,
}

/// Capability set required of every adapter. Adapters are stateless across
/// calls and constructed once per process.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn kind(&self) -> GatewayKind;

    async fn create_payment(
        &self,
        request: GatewayPaymentRequest,
    ) -> Result<GatewayPaymentResponse, GatewayFault>;

    async fn refund_payment(
        &self,
        request: GatewayRefundRequest,
    ) -> Result<GatewayRefundResponse, GatewayFault>;

    async fn get_payment_status(
        &self,
        provider_payment_id: &str,
    ) -> Result<GatewayStatusResponse, GatewayFault>;

    async fn health_check(&self) -> bool {
        true
    }
}

/// Maps enabled gateway kinds to adapters, built once at startup.
pub struct GatewayRegistry {
    gateways: HashMap<GatewayKind, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn from_config(config: &Config) -> Result<Self, String> {
        let mut gateways: HashMap<GatewayKind, Arc<dyn PaymentGateway>> = HashMap::new();

        if config.enable_mock {
            let mock = MockGateway::new(MockGatewayConfig {
                success_rate: config.mock_success_rate,
                average_latency_ms: config.mock_average_latency_ms,
                enable_chaos: config.mock_enable_chaos,
                chaos_rate: config.mock_chaos_rate,
            });
            gateways.insert(GatewayKind::Mock, Arc::new(mock));
        }

        if config.enable_stripe {
            let secret_key = config
                .stripe_secret_key
                .clone()
                .ok_or_else(|| "STRIPE_SECRET_KEY missing".to_string())?;
            let stripe = StripeGateway::new(secret_key).map_err(|e| e.to_string())?;
            gateways.insert(GatewayKind::Stripe, Arc::new(stripe));
        }

        if config.enable_razorpay {
            let key_id = config
                .razorpay_key_id
                .clone()
                .ok_or_else(|| "RAZORPAY_KEY_ID missing".to_string())?;
            let key_secret = config
                .razorpay_key_secret
                .clone()
                .ok_or_else(|| "RAZORPAY_KEY_SECRET missing".to_string())?;
            let razorpay = RazorpayGateway::new(key_id, key_secret).map_err(|e| e.to_string())?;
            gateways.insert(GatewayKind::Razorpay, Arc::new(razorpay));
        }

        Ok(Self { gateways })
    }

    pub fn get(&self, kind: GatewayKind) -> Option<Arc<dyn PaymentGateway>> {
        self.gateways.get(&kind).cloned()
    }

    pub fn is_enabled(&self, kind: GatewayKind) -> bool {
        self.gateways.contains_key(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trip() {
        for kind in [GatewayKind::Stripe, GatewayKind::Razorpay, GatewayKind::Mock] {
            assert_eq!(GatewayKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(GatewayKind::parse("paypal"), None);
    }

    #[test]
    fn kind_wire_form_is_lowercase() {
        let json = serde_json::to_string(&GatewayKind::Razorpay).unwrap();
        assert_eq!(json, "\"razorpay\"");
        let parsed: GatewayKind = serde_json::from_str("\"mock\"").unwrap();
        assert_eq!(parsed, GatewayKind::Mock);
    }

    #[test]
    fn fault_carries_provider_details() {
        let fault = GatewayFault::api(402, Some("card_declined".to_string()), "declined".into());
        assert_eq!(fault.http_status, Some(402));
        assert_eq!(fault.provider_code.as_deref(), Some("card_declined"));
        assert_eq!(fault.to_string(), "declined");
    }
}
