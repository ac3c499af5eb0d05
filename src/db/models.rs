//! Row models. Statuses are stored as strings; the domain enums in
//! `crate::domain` own parsing and the legal transitions.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub member_code: String,
    pub username: String,
    pub status: String,
    pub credit: BigDecimal,
    pub bank_code: Option<String>,
    pub bank_account_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BankAccount {
    pub id: Uuid,
    pub bank_code: String,
    pub account_number: String,
    pub display_name: String,
    pub balance: BigDecimal,
    pub priority_id: Option<Uuid>,
    pub status: String,
    pub connection_status: String,
    pub auto_credit: bool,
    pub is_main_withdraw: bool,
    pub auto_withdraw_flag: bool,
    pub auto_withdraw_credit_flag: bool,
    pub auto_withdraw_confirm_flag: bool,
    pub auto_withdraw_min: BigDecimal,
    pub auto_withdraw_max: BigDecimal,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BankStatement {
    pub id: Uuid,
    pub account_id: Uuid,
    pub external_id: String,
    pub amount: BigDecimal,
    pub statement_type: String,
    pub from_bank_code: Option<String>,
    pub from_account_number: Option<String>,
    pub transfer_at: DateTime<Utc>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BankTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub member_code: String,
    pub transfer_type: String,
    pub from_account_id: Option<Uuid>,
    pub to_account_id: Option<Uuid>,
    pub to_account_number: Option<String>,
    pub credit_amount: BigDecimal,
    pub paid_amount: Option<BigDecimal>,
    pub over_amount: BigDecimal,
    pub bonus_amount: BigDecimal,
    pub bank_charge_amount: BigDecimal,
    pub before_amount: Option<BigDecimal>,
    pub after_amount: Option<BigDecimal>,
    pub statement_external_id: Option<String>,
    pub transfer_at: DateTime<Utc>,
    pub status: String,
    pub status_detail: Option<String>,
    pub is_auto_credit: bool,
    pub created_by_id: Option<Uuid>,
    pub created_by_username: Option<String>,
    pub confirmed_by_id: Option<Uuid>,
    pub confirmed_by_username: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub canceled_by_id: Option<Uuid>,
    pub canceled_by_username: Option<String>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub cancel_remark: Option<String>,
    pub removed_by_id: Option<Uuid>,
    pub removed_by_username: Option<String>,
    pub removed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberStatement {
    pub id: i64,
    pub user_id: Uuid,
    pub statement_type: String,
    pub before_balance: BigDecimal,
    pub amount: BigDecimal,
    pub after_balance: BigDecimal,
    pub info: Option<String>,
    pub transfer_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookLog {
    pub id: Uuid,
    pub external_id: Option<String>,
    pub raw_body: String,
    pub payload: Option<serde_json::Value>,
    pub status: String,
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}
