//! Payment webhook handling
//!
//! Deliveries are authenticated with a hex HMAC-SHA256 of the raw body under
//! the shared webhook secret. The signature is checked before the body is
//! parsed; only then is the event mapped onto the user's subscription row.

use crate::config::BillingConfig;
use crate::db::models::{Subscription, SubscriptionStatus};
use crate::db::store::SubscriptionUpdate;
use crate::db::SubscriptionStore;
use crate::errors::{AppError, Result};
use crate::metrics;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

fn keyed(secret: &[u8]) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(secret).map_err(|e| AppError::Configuration {
        message: format!("unusable webhook secret: {}", e),
    })
}

/// Hex HMAC-SHA256 of `body`
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String> {
    let mut mac = keyed(secret)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex signature, optionally prefixed `sha256=`
pub fn verify_signature(secret: &[u8], body: &[u8], signature: &str) -> Result<()> {
    let signature = signature.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let expected = hex::decode(signature).map_err(|_| AppError::InvalidSignature)?;

    let mut mac = keyed(secret)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| AppError::InvalidSignature)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    #[serde(alias = "user_id")]
    pub user_id: Uuid,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "customer_id")]
    pub customer_id: Option<String>,
    #[serde(default, alias = "current_period_end")]
    pub current_period_end: Option<DateTime<Utc>>,
}

/// Payment provider event
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

impl WebhookEvent {
    /// Subscription change implied by the event, `None` for event types
    /// that do not affect access
    pub fn subscription_update(&self) -> Option<SubscriptionUpdate> {
        let status = match self.event_type.as_str() {
            "subscription.created" | "subscription.updated" => self
                .data
                .status
                .clone()
                .map(SubscriptionStatus::from)
                .unwrap_or(SubscriptionStatus::Active),
            "subscription.cancelled" | "subscription.canceled" => SubscriptionStatus::Cancelled,
            "payment.succeeded" => SubscriptionStatus::Active,
            "payment.failed" => SubscriptionStatus::PastDue,
            _ => return None,
        };

        Some(SubscriptionUpdate {
            user_id: self.data.user_id,
            status,
            provider_customer_id: self.data.customer_id.clone(),
            current_period_end: self.data.current_period_end,
        })
    }
}

/// Verifies and applies payment webhook deliveries
#[derive(Clone)]
pub struct PaymentWebhook {
    secret: Option<Vec<u8>>,
    store: Arc<dyn SubscriptionStore>,
}

impl PaymentWebhook {
    pub fn new(config: &BillingConfig, store: Arc<dyn SubscriptionStore>) -> Self {
        let secret = config
            .webhook_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| s.as_bytes().to_vec());
        if secret.is_none() {
            warn!("Payment webhook secret not configured; deliveries will be rejected");
        }
        Self { secret, store }
    }

    /// Verify `signature` over `body`, then apply the event.
    /// Returns the updated subscription, or `None` for ignored event types.
    pub async fn handle(&self, signature: Option<&str>, body: &[u8]) -> Result<Option<Subscription>> {
        let secret = self.secret.as_deref().ok_or_else(|| AppError::Configuration {
            message: "billing.webhook_secret is not set".to_string(),
        })?;
        let signature = signature.ok_or(AppError::InvalidSignature)?;
        verify_signature(secret, body, signature)?;

        let event: WebhookEvent = serde_json::from_slice(body).map_err(|e| AppError::InvalidFormat {
            message: format!("webhook payload: {}", e),
        })?;

        let Some(update) = event.subscription_update() else {
            info!(event = %event.event_type, "Ignoring webhook event");
            metrics::record_webhook(&event.event_type, false);
            return Ok(None);
        };

        let subscription = self.store.upsert_subscription(update).await?;
        info!(
            event = %event.event_type,
            user_id = %subscription.user_id,
            status = %subscription.status,
            "Subscription updated from webhook"
        );
        metrics::record_webhook(&event.event_type, true);
        Ok(Some(subscription))
    }
}
