//! HTTP client for the bank-automation service.
//!
//! Every request carries `Authorization: Bearer <apiKey>` plus a `Sign` header
//! computed over the exact payload string. Responses are never trusted to
//! mutate ledger state directly; callers re-read the provider or wait for the
//! webhook confirmation.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Hard timeout for every gateway call. On expiry the outcome is unknown and
/// transfers are never retried automatically.
const GATEWAY_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("gateway request timed out")]
    Timeout,
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("gateway returned {status_code}: {body}")]
    Status { status_code: u16, body: String },
    #[error("unparseable gateway response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Timeouts leave the provider-side outcome unknown; callers must not
    /// treat them as definite failures.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, GatewayError::Timeout)
    }
}

/// The provider's signing scheme, preserved exactly:
/// `SHA256(lower(payload) + unixSeconds + lower(apiKey))`, hex-encoded.
pub fn sign_payload(payload: &str, unix_secs: i64, api_key: &str) -> String {
    use sha2::{Digest, Sha256};
    let input = format!(
        "{}{}{}",
        payload.to_lowercase(),
        unix_secs,
        api_key.to_lowercase()
    );
    hex::encode(Sha256::digest(input.as_bytes()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalance {
    pub available_balance: BigDecimal,
    pub account_balance: BigDecimal,
    #[serde(default)]
    pub daily_limit: Option<BigDecimal>,
    #[serde(default)]
    pub remaining_limit: Option<BigDecimal>,
}

/// One statement row as reported by the provider. Amount is signed: positive
/// for money in, negative for money out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalStatement {
    pub id: String,
    pub amount: BigDecimal,
    #[serde(default)]
    pub from_bank_code: Option<String>,
    #[serde(default)]
    pub from_account_number: Option<String>,
    pub transfer_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementPage {
    pub statements: Vec<ExternalStatement>,
    #[serde(default)]
    pub total: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferAck {
    pub success: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterAccountResponse {
    external_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAccountRequest {
    pub bank_code: String,
    pub account_number: String,
    pub device_id: String,
    pub pin: String,
    pub webhook_url: String,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AccountPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BankGatewayClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl BankGatewayClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self::with_timeout(base_url, api_key, GATEWAY_TIMEOUT)
    }

    /// Same client with a caller-chosen timeout. Tests shrink it so a server
    /// that never answers trips the timeout path without the full wait.
    pub fn with_timeout(base_url: String, api_key: String, timeout: Duration) -> Self {
        let http = Client::builder().timeout(timeout).build().unwrap_or_default();
        Self {
            http,
            base_url,
            api_key,
        }
    }

    fn unix_now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, GatewayError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let payload = serde_json::to_string(body)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let ts = Self::unix_now();
        let sign = sign_payload(&payload, ts, &self.api_key);

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Sign", sign)
            .header("Timestamp", ts.to_string())
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::Request(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status_code: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await.map_err(GatewayError::Request)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }

    /// Register an operator account with the automation service; returns the
    /// provider's opaque id for the account.
    pub async fn register_account(
        &self,
        req: &RegisterAccountRequest,
    ) -> Result<String, GatewayError> {
        let resp: RegisterAccountResponse = self.post("/accounts/register", req).await?;
        Ok(resp.external_id)
    }

    pub async fn update_account(
        &self,
        external_id: &str,
        patch: &AccountPatch,
    ) -> Result<(), GatewayError> {
        let _: serde_json::Value = self
            .post(&format!("/accounts/{external_id}/update"), patch)
            .await?;
        Ok(())
    }

    pub async fn enable_account(
        &self,
        external_id: &str,
        enabled: bool,
    ) -> Result<(), GatewayError> {
        let _: serde_json::Value = self
            .post(
                &format!("/accounts/{external_id}/enable"),
                &serde_json::json!({ "enabled": enabled }),
            )
            .await?;
        Ok(())
    }

    pub async fn delete_account(&self, external_id: &str) -> Result<(), GatewayError> {
        let _: serde_json::Value = self
            .post(
                &format!("/accounts/{external_id}/delete"),
                &serde_json::json!({}),
            )
            .await?;
        Ok(())
    }

    pub async fn get_account_balance(
        &self,
        account_number: &str,
    ) -> Result<AccountBalance, GatewayError> {
        self.post(
            "/accounts/balance",
            &serde_json::json!({ "accountNumber": account_number }),
        )
        .await
    }

    pub async fn list_statements(
        &self,
        account_number: &str,
        of_date_time: DateTime<Utc>,
        page: i64,
        limit: i64,
    ) -> Result<Vec<ExternalStatement>, GatewayError> {
        let page: StatementPage = self
            .post(
                "/statements/list",
                &serde_json::json!({
                    "accountNumber": account_number,
                    "ofDateTime": of_date_time,
                    "page": page,
                    "limit": limit,
                }),
            )
            .await?;
        Ok(page.statements)
    }

    pub async fn transfer(
        &self,
        from_account_number: &str,
        to_account_number: &str,
        amount: &BigDecimal,
        bank_code: &str,
        pin: &str,
    ) -> Result<TransferAck, GatewayError> {
        self.post(
            "/transfer",
            &serde_json::json!({
                "fromAccountNumber": from_account_number,
                "toAccountNumber": to_account_number,
                "amount": amount,
                "bankCode": bank_code,
                "pin": pin,
            }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_sign_payload_known_vector() {
        // sha256("abc" + "0" + "key") computed independently
        let sign = sign_payload("ABC", 0, "KEY");
        assert_eq!(sign, sign_payload("abc", 0, "key"));
        assert_eq!(sign.len(), 64);
        assert!(sign.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_sign_payload_lowercases_inputs_not_timestamp() {
        let a = sign_payload("{\"A\":1}", 1700000000, "Secret");
        let b = sign_payload("{\"a\":1}", 1700000000, "secret");
        assert_eq!(a, b);
        let c = sign_payload("{\"a\":1}", 1700000001, "secret");
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_transfer_success() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("POST", "/transfer")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": true}"#)
            .create_async()
            .await;

        let client = BankGatewayClient::new(server.url(), "test-key".to_string());
        let ack = client
            .transfer(
                "111",
                "222",
                &BigDecimal::from_str("400.00").unwrap(),
                "004",
                "123456",
            )
            .await
            .unwrap();

        assert!(ack.success);
        assert!(ack.reason.is_none());
    }

    #[tokio::test]
    async fn test_transfer_definite_failure() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("POST", "/transfer")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": false, "reason": "insufficient funds"}"#)
            .create_async()
            .await;

        let client = BankGatewayClient::new(server.url(), "test-key".to_string());
        let ack = client
            .transfer(
                "111",
                "222",
                &BigDecimal::from_str("400.00").unwrap(),
                "004",
                "123456",
            )
            .await
            .unwrap();

        assert!(!ack.success);
        assert_eq!(ack.reason.as_deref(), Some("insufficient funds"));
    }

    #[tokio::test]
    async fn test_non_2xx_surfaces_status_and_body() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("POST", "/accounts/balance")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let client = BankGatewayClient::new(server.url(), "test-key".to_string());
        let err = client.get_account_balance("111").await.unwrap_err();

        match err {
            GatewayError::Status { status_code, body } => {
                assert_eq!(status_code, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("expected Status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unparseable_body_is_invalid_response() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("POST", "/accounts/balance")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let client = BankGatewayClient::new(server.url(), "test-key".to_string());
        let err = client.get_account_balance("111").await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidResponse(_)));
    }

    #[test]
    fn test_timeout_is_ambiguous() {
        assert!(GatewayError::Timeout.is_ambiguous());
        assert!(!GatewayError::Status {
            status_code: 500,
            body: String::new()
        }
        .is_ambiguous());
    }
}
