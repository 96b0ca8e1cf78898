//! Data access: free functions over the pool, with `_tx` variants taking an
//! open transaction where the caller owns atomicity.

pub mod deliveries;
pub mod endpoints;
pub mod events;
pub mod merchants;
pub mod outbox;
pub mod payments;
pub mod refunds;

use crate::gateway::GatewayKind;
use crate::models::{AttemptStatus, DeliveryStatus, PaymentStatus, RefundStatus};

fn decode_err(message: String) -> sqlx::Error {
    sqlx::Error::Decode(message.into())
}

pub(crate) fn parse_payment_status(s: &str) -> Result<PaymentStatus, sqlx::Error> {
    PaymentStatus::from_db(s).ok_or_else(|| decode_err(format!("unknown payment status: {}", s)))
}

pub(crate) fn parse_attempt_status(s: &str) -> Result<AttemptStatus, sqlx::Error> {
    AttemptStatus::from_db(s).ok_or_else(|| decode_err(format!("unknown attempt status: {}", s)))
}

pub(crate) fn parse_refund_status(s: &str) -> Result<RefundStatus, sqlx::Error> {
    RefundStatus::from_db(s).ok_or_else(|| decode_err(format!("unknown refund status: {}", s)))
}

pub(crate) fn parse_delivery_status(s: &str) -> Result<DeliveryStatus, sqlx::Error> {
    DeliveryStatus::from_db(s).ok_or_else(|| decode_err(format!("unknown delivery status: {}", s)))
}

pub(crate) fn parse_gateway_kind(s: &str) -> Result<GatewayKind, sqlx::Error> {
    GatewayKind::parse(s).ok_or_else(|| decode_err(format!("unknown gateway: {}", s)))
}

/// True when the error is a unique-constraint violation on the named
/// constraint.
pub(crate) fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.code().as_deref() == Some("23505") && db.constraint() == Some(constraint)
        }
        _ => false,
    }
}
