//! Mock gateway for development and testing.
//!
//! The only adapter with observable state: it keeps its own payments and
//! refunds in memory so tests can assert on them. Success rate, latency and
//! chaos injection are tunable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    GatewayFault, GatewayKind, GatewayPaymentRequest, GatewayPaymentResponse,
    GatewayPaymentStatus, GatewayRefundRequest, GatewayRefundResponse, GatewayRefundStatus,
    GatewayStatusResponse, PaymentGateway,
};

#[derive(Debug, Clone)]
pub struct MockGatewayConfig {
    pub success_rate: f64,
    pub average_latency_ms: u64,
    pub enable_chaos: bool,
    pub chaos_rate: f64,
}

impl Default for MockGatewayConfig {
    fn default() -> Self {
        Self {
            success_rate: 1.0,
            average_latency_ms: 100,
            enable_chaos: false,
            chaos_rate: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockPayment {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub status: GatewayPaymentStatus,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MockRefund {
    pub id: String,
    pub payment_id: String,
    pub amount: i64,
    pub status: GatewayRefundStatus,
    pub created_at: DateTime<Utc>,
}

pub struct MockGateway {
    config: MockGatewayConfig,
    payments: RwLock<HashMap<String, MockPayment>>,
    refunds: RwLock<HashMap<String, MockRefund>>,
}

impl MockGateway {
    pub fn new(config: MockGatewayConfig) -> Self {
        Self {
            config,
            payments: RwLock::new(HashMap::new()),
            refunds: RwLock::new(HashMap::new()),
        }
    }

    async fn simulate_latency(&self) {
        if self.config.average_latency_ms == 0 {
            return;
        }
        // Jitter the configured average by ±50%.
        let avg = self.config.average_latency_ms;
        let latency = {
            let mut rng = rand::thread_rng();
            rng.gen_range(avg / 2..=avg + avg / 2)
        };
        tokio::time::sleep(Duration::from_millis(latency)).await;
    }

    /// Random rolls are taken before any await so the RNG never crosses a
    /// suspension point.
    fn roll(&self) -> MockRoll {
        let mut rng = rand::thread_rng();
        MockRoll {
            chaos: self.config.enable_chaos && rng.gen_bool(self.config.chaos_rate.clamp(0.0, 1.0)),
            success: rng.gen_bool(self.config.success_rate.clamp(0.0, 1.0)),
        }
    }

    pub async fn payment(&self, provider_payment_id: &str) -> Option<MockPayment> {
        self.payments.read().await.get(provider_payment_id).cloned()
    }

    pub async fn refund(&self, provider_refund_id: &str) -> Option<MockRefund> {
        self.refunds.read().await.get(provider_refund_id).cloned()
    }
}

struct MockRoll {
    chaos: bool,
    success: bool,
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Mock
    }

    async fn create_payment(
        &self,
        request: GatewayPaymentRequest,
    ) -> Result<GatewayPaymentResponse, GatewayFault> {
        let roll = self.roll();
        self.simulate_latency().await;

        if roll.chaos {
            return Err(GatewayFault::api(
                503,
                Some("gateway_unavailable".to_string()),
                "mock gateway chaos: service unavailable".to_string(),
            ));
        }
        if !roll.success {
            return Err(GatewayFault::api(
                502,
                Some("card_declined".to_string()),
                "mock gateway declined the payment".to_string(),
            ));
        }

        let id = format!("mock_pi_{}", Uuid::new_v4().simple());
        let payment = MockPayment {
            id: id.clone(),
            amount: request.amount,
            currency: request.currency.clone(),
            status: GatewayPaymentStatus::Succeeded,
            metadata: request.metadata.clone(),
            created_at: Utc::now(),
        };
        self.payments.write().await.insert(id.clone(), payment);

        let raw = json!({
            "id": id,
            "amount": request.amount,
            "currency": request.currency,
            "status": "succeeded",
        });

        tracing::debug!(provider_payment_id = %id, "Mock payment processed");

        Ok(GatewayPaymentResponse {
            provider_payment_id: id,
            status: GatewayPaymentStatus::Succeeded,
            client_secret: None,
            next_action: None,
            raw,
        })
    }

    async fn refund_payment(
        &self,
        request: GatewayRefundRequest,
    ) -> Result<GatewayRefundResponse, GatewayFault> {
        let roll = self.roll();
        self.simulate_latency().await;

        if roll.chaos {
            return Err(GatewayFault::api(
                503,
                Some("gateway_unavailable".to_string()),
                "mock gateway chaos: service unavailable".to_string(),
            ));
        }

        let payment = self
            .payments
            .read()
            .await
            .get(&request.provider_payment_id)
            .cloned()
            .ok_or_else(|| {
                GatewayFault::api(
                    404,
                    Some("resource_missing".to_string()),
                    format!("no such payment: {}", request.provider_payment_id),
                )
            })?;

        let id = format!("mock_re_{}", Uuid::new_v4().simple());
        let amount = request.amount.unwrap_or(payment.amount);
        let status = if roll.success {
            GatewayRefundStatus::Succeeded
        } else {
            GatewayRefundStatus::Failed
        };

        let refund = MockRefund {
            id: id.clone(),
            payment_id: request.provider_payment_id.clone(),
            amount,
            status,
            created_at: Utc::now(),
        };
        self.refunds.write().await.insert(id.clone(), refund);

        let raw = json!({
            "id": id,
            "paymentId": request.provider_payment_id,
            "amount": amount,
            "status": if roll.success { "succeeded" } else { "failed" },
        });

        Ok(GatewayRefundResponse {
            provider_refund_id: id,
            status,
            raw,
        })
    }

    async fn get_payment_status(
        &self,
        provider_payment_id: &str,
    ) -> Result<GatewayStatusResponse, GatewayFault> {
        self.simulate_latency().await;

        let payment = self
            .payments
            .read()
            .await
            .get(provider_payment_id)
            .cloned()
            .ok_or_else(|| {
                GatewayFault::api(
                    404,
                    Some("resource_missing".to_string()),
                    format!("no such payment: {}", provider_payment_id),
                )
            })?;

        let raw = json!({
            "id": payment.id,
            "amount": payment.amount,
            "currency": payment.currency,
        });

        Ok(GatewayStatusResponse {
            status: payment.status,
            amount: Some(payment.amount),
            currency: Some(payment.currency),
            metadata: Some(payment.metadata),
            raw,
        })
    }
}
