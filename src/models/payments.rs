//! Wire shapes of the payment provider and their canonical form.
//!
//! The provider has answered with two envelope layouts over time: a flat
//! object with snake_case fields, and an object wrapping a PascalCase
//! `response`. Both are accepted everywhere (initiation, status queries and
//! the webhook) and folded into [`CanonicalStatus`] by
//! [`StatusEnvelope::normalize`]. Nothing outside this module and the gateway
//! client ever sees the raw envelopes.

use serde::{Deserialize, Serialize};

use super::transactions::TransactionStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProviderStatus {
    Queued,
    Success,
    Failed,
}

impl ProviderStatus {
    /// Unknown values map to `Queued` so that they can never terminate a
    /// transaction.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SUCCESS" | "SUCCESSFUL" | "COMPLETED" => ProviderStatus::Success,
            "FAILED" | "FAILURE" | "CANCELLED" | "CANCELED" => ProviderStatus::Failed,
            "QUEUED" | "QUEUE" | "PENDING" => ProviderStatus::Queued,
            other => {
                log::warn!("Unknown provider status '{}', treating as queued.", other);
                ProviderStatus::Queued
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct CanonicalStatus {
    pub status: ProviderStatus,
    pub success: bool,
    pub provider_reference: Option<String>,
}

impl CanonicalStatus {
    /// Terminal status this report moves a pending transaction to, if any.
    pub fn outcome(&self) -> Option<TransactionStatus> {
        match (self.status, self.success) {
            (ProviderStatus::Success, true) => Some(TransactionStatus::Completed),
            (ProviderStatus::Success, false) | (ProviderStatus::Failed, _) => {
                Some(TransactionStatus::Failed)
            }
            (ProviderStatus::Queued, _) => None,
        }
    }
}

/// Result of a successful collection or payout initiation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayReceipt {
    pub reference: String,
    pub provider_status: CanonicalStatus,
    pub checkout_request_id: Option<String>,
}

/// A normalized provider message: the canonical status plus the correlation
/// fields it carried.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderNotice {
    pub reference: Option<String>,
    pub checkout_request_id: Option<String>,
    pub status: CanonicalStatus,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FlatStatus {
    pub reference: Option<String>,
    #[serde(alias = "externalReference", alias = "ExternalReference")]
    pub external_reference: Option<String>,
    pub status: String,
    pub success: Option<bool>,
    #[serde(alias = "providerReference")]
    pub provider_reference: Option<String>,
    #[serde(rename = "CheckoutRequestID", alias = "checkout_request_id")]
    pub checkout_request_id: Option<String>,
    pub message: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NestedStatus {
    pub external_reference: Option<String>,
    pub status: String,
    pub result_code: Option<i64>,
    pub result_desc: Option<String>,
    pub mpesa_receipt_number: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NestedEnvelope {
    pub response: NestedStatus,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum StatusEnvelope {
    Nested(NestedEnvelope),
    Flat(FlatStatus),
}

impl StatusEnvelope {
    /// Human readable text the provider attached, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            StatusEnvelope::Flat(flat) => flat.message.as_deref(),
            StatusEnvelope::Nested(nested) => nested.response.result_desc.as_deref(),
        }
    }

    /// The provider's own success flag, when it sent one.
    pub fn explicit_success(&self) -> Option<bool> {
        match self {
            StatusEnvelope::Flat(flat) => flat.success,
            StatusEnvelope::Nested(nested) => nested.response.result_code.map(|code| code == 0),
        }
    }

    pub fn normalize(self) -> ProviderNotice {
        match self {
            StatusEnvelope::Flat(flat) => {
                let status = ProviderStatus::parse(&flat.status);
                let success = flat
                    .success
                    .unwrap_or(status == ProviderStatus::Success);

                ProviderNotice {
                    reference: flat.external_reference.or(flat.reference),
                    checkout_request_id: flat.checkout_request_id,
                    status: CanonicalStatus {
                        status,
                        success,
                        provider_reference: flat.provider_reference,
                    },
                }
            }
            StatusEnvelope::Nested(NestedEnvelope { response }) => {
                let status = ProviderStatus::parse(&response.status);
                let success = response
                    .result_code
                    .map(|code| code == 0)
                    .unwrap_or(status == ProviderStatus::Success);

                if let Some(desc) = &response.result_desc {
                    log::debug!("Provider result description: {}", desc);
                }

                ProviderNotice {
                    reference: response.external_reference,
                    checkout_request_id: response.checkout_request_id,
                    status: CanonicalStatus {
                        status,
                        success,
                        provider_reference: response.mpesa_receipt_number,
                    },
                }
            }
        }
    }
}
