//! Midtrans Core API client.
//!
//! Charges go to `/v2/charge` with Basic auth (server key as username, empty
//! password). Bank transfers cover bca/bni/bri/cimb/permata; mandiri uses the
//! echannel bill-payment flow and returns bill key + biller code instead of a
//! VA number.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;

use super::{notification_signature, GatewayError, PaymentGateway, VaCharge};

pub struct MidtransGateway {
    client: reqwest::Client,
    base_url: String,
    server_key: String,
}

impl MidtransGateway {
    pub fn new(base_url: impl Into<String>, server_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            server_key: server_key.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    status_code: String,
    #[serde(default)]
    status_message: String,
    #[serde(default)]
    transaction_id: String,
    #[serde(default)]
    va_numbers: Vec<VaNumber>,
    #[serde(default)]
    permata_va_number: Option<String>,
    #[serde(default)]
    bill_key: Option<String>,
    #[serde(default)]
    biller_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VaNumber {
    bank: String,
    va_number: String,
}

#[derive(Debug, Deserialize)]
struct CancelResponse {
    status_code: String,
    #[serde(default)]
    status_message: String,
}

#[async_trait]
impl PaymentGateway for MidtransGateway {
    async fn charge_va(
        &self,
        order_number: &str,
        amount: i64,
        bank_code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<VaCharge, GatewayError> {
        // Midtrans expiry is whole minutes, minimum one.
        let expiry_minutes = ((expires_at - Utc::now()).num_minutes()).max(1);

        let mut body = json!({
            "transaction_details": {
                "order_id": order_number,
                "gross_amount": amount,
            },
            "custom_expiry": {
                "expiry_duration": expiry_minutes,
                "unit": "minute",
            },
        });
        match bank_code {
            "bca" | "bni" | "bri" | "cimb" | "permata" => {
                body["payment_type"] = json!("bank_transfer");
                body["bank_transfer"] = json!({ "bank": bank_code });
            }
            "mandiri" => {
                body["payment_type"] = json!("echannel");
                body["echannel"] = json!({
                    "bill_info1": "Payment:",
                    "bill_info2": "Online purchase",
                });
            }
            other => return Err(GatewayError::UnsupportedBank(other.to_string())),
        }

        let resp: ChargeResponse = self
            .client
            .post(format!("{}/v2/charge", self.base_url))
            .basic_auth(&self.server_key, None::<&str>)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if resp.status_code != "200" && resp.status_code != "201" {
            tracing::error!(
                order_number,
                code = %resp.status_code,
                message = %resp.status_message,
                "charge rejected"
            );
            return Err(GatewayError::Rejected {
                code: resp.status_code,
                message: resp.status_message,
            });
        }

        let mut charge = VaCharge {
            transaction_id: resp.transaction_id,
            bank: bank_code.to_string(),
            va_number: None,
            bill_key: None,
            biller_code: None,
            expires_at: Utc::now() + Duration::minutes(expiry_minutes),
        };
        if let Some(va) = resp.va_numbers.into_iter().next() {
            charge.bank = va.bank;
            charge.va_number = Some(va.va_number);
        } else if let Some(va) = resp.permata_va_number {
            charge.bank = "permata".to_string();
            charge.va_number = Some(va);
        } else if let Some(bill_key) = resp.bill_key {
            charge.bank = "mandiri".to_string();
            charge.bill_key = Some(bill_key);
            charge.biller_code = resp.biller_code;
        }

        tracing::info!(
            order_number,
            bank = %charge.bank,
            va = charge.va_number.as_deref().unwrap_or("-"),
            "va payment created"
        );
        Ok(charge)
    }

    async fn cancel_transaction(&self, order_number: &str) -> Result<(), GatewayError> {
        let resp: CancelResponse = self
            .client
            .post(format!("{}/v2/{}/cancel", self.base_url, order_number))
            .basic_auth(&self.server_key, None::<&str>)
            .send()
            .await?
            .json()
            .await?;

        // 407 means the transaction already expired upstream, which is the
        // outcome we wanted anyway.
        if resp.status_code != "200" && resp.status_code != "201" && resp.status_code != "407" {
            return Err(GatewayError::Rejected {
                code: resp.status_code,
                message: resp.status_message,
            });
        }
        tracing::info!(order_number, "gateway transaction cancelled");
        Ok(())
    }

    fn verify_signature(
        &self,
        order_number: &str,
        status_code: &str,
        gross_amount: &str,
        signature_key: &str,
    ) -> bool {
        let expected = notification_signature(order_number, status_code, gross_amount, &self.server_key);
        signature_key == expected
    }
}
