//! Payment gateway integration.

mod midtrans;

pub use midtrans::MidtransGateway;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha512};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("unsupported bank code: {0}")]
    UnsupportedBank(String),

    #[error("gateway rejected charge: {code} {message}")]
    Rejected { code: String, message: String },

    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Virtual-account charge result.
#[derive(Clone, Debug)]
pub struct VaCharge {
    pub transaction_id: String,
    pub bank: String,
    pub va_number: Option<String>,
    pub bill_key: Option<String>,
    pub biller_code: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a virtual-account payment for `order_number`.
    async fn charge_va(
        &self,
        order_number: &str,
        amount: i64,
        bank_code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<VaCharge, GatewayError>;

    /// Best-effort cancel of a pending gateway transaction.
    async fn cancel_transaction(&self, order_number: &str) -> Result<(), GatewayError>;

    /// Validate a webhook notification signature.
    fn verify_signature(
        &self,
        order_number: &str,
        status_code: &str,
        gross_amount: &str,
        signature_key: &str,
    ) -> bool;
}

/// Signature scheme shared by the real client and test doubles:
/// `SHA512(order_id + status_code + gross_amount + server_key)`, hex-encoded.
pub fn notification_signature(
    order_number: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
) -> String {
    let mut hasher = Sha512::new();
    hasher.update(order_number.as_bytes());
    hasher.update(status_code.as_bytes());
    hasher.update(gross_amount.as_bytes());
    hasher.update(server_key.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_stable_and_key_sensitive() {
        let a = notification_signature("ORD-20250101-1", "200", "10000.00", "key-1");
        let b = notification_signature("ORD-20250101-1", "200", "10000.00", "key-1");
        let c = notification_signature("ORD-20250101-1", "200", "10000.00", "key-2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 128);
    }
}
