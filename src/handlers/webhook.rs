//! Inbound statement webhook and the operator-triggered recheck.

use crate::error::AppError;
use crate::middleware::auth::{verify_webhook_secret, AuthActor};
use crate::services::ingestor::WebhookStatementPayload;
use crate::AppState;
use axum::{extract::State, http::HeaderMap, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

/// The automation service posts new statements here. The raw body is parsed
/// after the shared secret check so unauthenticated garbage never reaches the
/// ingestor.
pub async fn statement_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<serde_json::Value>, AppError> {
    verify_webhook_secret(&headers, &state.config.webhook_secret)?;

    let payload: WebhookStatementPayload = serde_json::from_str(&body)
        .map_err(|e| AppError::Validation(format!("invalid webhook payload: {e}")))?;

    let report = state.ingestor.ingest(&body, &payload).await?;
    Ok(Json(json!({ "message": "success", "data": report })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecheckBody {
    pub account_id: Uuid,
    /// When set, only this missed statement is re-ingested.
    pub external_id: Option<String>,
    /// Pull statements around this time from the automation service.
    pub of_date_time: Option<DateTime<Utc>>,
}

pub async fn recheck(
    State(state): State<AppState>,
    _auth: AuthActor,
    Json(body): Json<RecheckBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let of_date_time = body.of_date_time.unwrap_or_else(Utc::now);
    let report = state
        .ingestor
        .recheck(body.account_id, body.external_id.as_deref(), of_date_time)
        .await?;
    Ok(Json(json!({ "message": "success", "data": report })))
}
