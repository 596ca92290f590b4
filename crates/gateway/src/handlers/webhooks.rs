//! Payment provider webhook

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde::Serialize;

use crate::AppState;
use nexora_common::errors::Result;

#[derive(Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

/// Receives the raw body so the signature is checked over the exact bytes
/// the provider signed
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>> {
    let signature = headers
        .get(state.config.billing.signature_header.as_str())
        .and_then(|v| v.to_str().ok());

    state.webhook.handle(signature, &body).await?;

    Ok(Json(WebhookAck { received: true }))
}
