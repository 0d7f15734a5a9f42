use crate::models::payments::{CanonicalStatus, GatewayReceipt, StatusEnvelope};
use crate::settings;

use super::{external_reference, format_phone_number, whole_units, GatewayError, PaymentGateway};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;
use std::time::Duration;

pub struct PayHeroApi {
    url: String,
    username: String,
    password: String,
    channel_id: u32,
    provider: String,
    network_code: String,
    callback_url: String,
    client: reqwest::Client,
}

impl PayHeroApi {
    pub fn new(settings: &settings::PayHero) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(Self {
            url: settings.url.trim_end_matches('/').to_string(),
            username: settings.username.clone(),
            password: settings.password.clone(),
            channel_id: settings.channel_id,
            provider: settings.provider.clone(),
            network_code: settings.network_code.clone(),
            callback_url: settings.callback_url.clone(),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.url, path)
    }

    async fn post_initiation(
        &self,
        path: &str,
        reference: String,
        payload: serde_json::Value,
    ) -> Result<GatewayReceipt, GatewayError> {
        let response = self
            .client
            .post(self.endpoint(path))
            .basic_auth(&self.username, Some(&self.password))
            .json(&payload)
            .send()
            .await?;

        let envelope = read_envelope(response).await?;
        let message = envelope.message().map(str::to_string);
        let refused = envelope.explicit_success() == Some(false);
        let notice = envelope.normalize();

        if refused || (!notice.status.success && notice.status.outcome().is_some()) {
            return Err(GatewayError::Rejected(message.unwrap_or_else(|| {
                format!("Provider refused {} request {}", path, reference)
            })));
        }

        log::info!(
            "PayHero accepted {} request {} ({:?}).",
            path,
            reference,
            notice.status.status
        );

        Ok(GatewayReceipt {
            reference,
            provider_status: notice.status,
            checkout_request_id: notice.checkout_request_id,
        })
    }
}

/// Turns a provider response into an envelope, surfacing the provider's own
/// message for non-2xx answers.
async fn read_envelope(response: reqwest::Response) -> Result<StatusEnvelope, GatewayError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        log::warn!("PayHero answered {}: {}", status, body);
        return Err(GatewayError::Rejected(
            provider_message(&body).unwrap_or_else(|| format!("Provider answered {}", status)),
        ));
    }

    serde_json::from_str(&body).map_err(|e| GatewayError::MalformedResponse(e.to_string()))
}

fn provider_message(body: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["message", "error_message", "error"] {
            if let Some(message) = value.get(key).and_then(|m| m.as_str()) {
                return Some(message.to_string());
            }
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[async_trait]
impl PaymentGateway for PayHeroApi {
    async fn initiate_collection(
        &self,
        amount: Decimal,
        phone_number: &str,
        owner_id: i64,
    ) -> Result<GatewayReceipt, GatewayError> {
        let phone_number = format_phone_number(phone_number)?;
        let amount = whole_units(amount)?;
        let reference = external_reference(owner_id);

        let payload = json!({
            "amount": amount,
            "phone_number": phone_number,
            "channel_id": self.channel_id,
            "external_reference": reference,
            "provider": self.provider,
            "callback_url": self.callback_url,
        });

        self.post_initiation("payments", reference, payload).await
    }

    async fn initiate_payout(
        &self,
        amount: Decimal,
        phone_number: &str,
        owner_id: i64,
    ) -> Result<GatewayReceipt, GatewayError> {
        let phone_number = format_phone_number(phone_number)?;
        let amount = whole_units(amount)?;
        let reference = external_reference(owner_id);

        let payload = json!({
            "amount": amount,
            "phone_number": phone_number,
            "network_code": self.network_code,
            "external_reference": reference,
            "callback_url": self.callback_url,
            "channel": "mobile",
            "channel_id": self.channel_id,
        });

        self.post_initiation("withdraw", reference, payload).await
    }

    async fn query_status(&self, reference: &str) -> Result<CanonicalStatus, GatewayError> {
        let response = self
            .client
            .get(self.endpoint("transaction-status"))
            .query(&[("reference", reference)])
            .basic_auth(&self.username, Some(&self.password))
            .header("Cache-Control", "no-cache")
            .send()
            .await?;

        Ok(read_envelope(response).await?.normalize().status)
    }
}
