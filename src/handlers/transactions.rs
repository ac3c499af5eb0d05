//! Transaction endpoints: creation, listing and the operator-driven
//! transitions.

use crate::db::queries::{self, TransactionFilter};
use crate::domain::TransferType;
use crate::error::AppError;
use crate::middleware::auth::AuthActor;
use crate::services::engine::{
    ConfirmCreditWithdrawInput, ConfirmDepositInput, ConfirmTransferWithdrawInput,
    CreateBonusInput, CreateCreditBackInput, CreateDepositInput, CreateWithdrawInput,
};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionBody {
    pub transfer_type: String,
    pub member_code: String,
    pub amount: BigDecimal,
    /// Deposit only: the operator account the member was told to pay into.
    pub to_account_id: Option<Uuid>,
    pub is_auto_credit: Option<bool>,
    /// Bonus and credit-back.
    pub reason: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Json(body): Json<CreateTransactionBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let transfer_type =
        TransferType::from_str(&body.transfer_type).map_err(AppError::Validation)?;

    match transfer_type {
        TransferType::Deposit => {
            let to_account_id = body.to_account_id.ok_or_else(|| {
                AppError::Validation("toAccountId is required for deposits".to_string())
            })?;
            let tx = state
                .engine
                .create_deposit(
                    CreateDepositInput {
                        member_code: body.member_code,
                        amount: body.amount,
                        to_account_id,
                        is_auto_credit: body.is_auto_credit.unwrap_or(false),
                    },
                    &actor,
                )
                .await?;
            Ok(Json(json!({ "message": "success", "data": tx })))
        }
        TransferType::Withdraw => {
            let tx = state
                .engine
                .create_withdraw(
                    CreateWithdrawInput {
                        member_code: body.member_code,
                        amount: body.amount,
                    },
                    &actor,
                )
                .await?;
            let outcome = state.auto_withdraw.run(&tx).await?;
            // Re-read: the orchestrator may have moved the transaction on.
            let tx = queries::get_transaction(&state.db, tx.id).await?;
            Ok(Json(json!({
                "message": "success",
                "data": tx,
                "autoWithdraw": outcome,
            })))
        }
        TransferType::Bonus => {
            let reason = body
                .reason
                .ok_or_else(|| AppError::Validation("reason is required for bonuses".to_string()))?;
            let tx = state
                .engine
                .create_bonus(
                    CreateBonusInput {
                        member_code: body.member_code,
                        amount: body.amount,
                        reason,
                    },
                    &actor,
                )
                .await?;
            Ok(Json(json!({ "message": "success", "data": tx })))
        }
        TransferType::GetCreditBack => {
            let tx = state
                .engine
                .create_credit_back(
                    CreateCreditBackInput {
                        member_code: body.member_code,
                        amount: body.amount,
                        reason: body.reason,
                    },
                    &actor,
                )
                .await?;
            Ok(Json(json!({ "message": "success", "data": tx })))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionListQuery {
    pub user_id: Option<Uuid>,
    pub transfer_type: Option<String>,
    pub status: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list(
    State(state): State<AppState>,
    _auth: AuthActor,
    Query(query): Query<TransactionListQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let filter = TransactionFilter {
        user_id: query.user_id,
        transfer_type: query.transfer_type,
        status: query.status,
        from_date: query.from_date,
        to_date: query.to_date,
        limit: query.limit.unwrap_or(20).clamp(1, 100),
        offset: query.offset.unwrap_or(0).max(0),
    };

    let (rows, total) = queries::list_transactions(&state.db, &filter).await?;
    Ok(Json(json!({
        "message": "success",
        "list": rows,
        "total": total,
    })))
}

pub async fn get(
    State(state): State<AppState>,
    _auth: AuthActor,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let tx = queries::get_transaction(&state.db, id)
        .await
        .map_err(|e| AppError::not_found_or_db(e, format!("Transaction {id} not found")))?;
    Ok(Json(json!({ "message": "success", "data": tx })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmDepositBody {
    pub transfer_at: Option<DateTime<Utc>>,
    pub bonus_amount: Option<BigDecimal>,
    pub paid_amount: Option<BigDecimal>,
}

pub async fn confirm_deposit(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
    Json(body): Json<ConfirmDepositBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let tx = state
        .engine
        .confirm_deposit(
            id,
            ConfirmDepositInput {
                transfer_at: body.transfer_at,
                bonus_amount: body.bonus_amount,
                paid_amount: body.paid_amount,
                statement_external_id: None,
            },
            &actor,
        )
        .await?;
    Ok(Json(json!({ "message": "success", "data": tx })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelBody {
    pub cancel_remark: String,
}

pub async fn cancel(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
    Json(body): Json<CancelBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let existing = queries::get_transaction(&state.db, id)
        .await
        .map_err(|e| AppError::not_found_or_db(e, format!("Transaction {id} not found")))?;
    let transfer_type =
        TransferType::from_str(&existing.transfer_type).map_err(AppError::Internal)?;

    let tx = match transfer_type {
        TransferType::Deposit => {
            state
                .engine
                .cancel_deposit(id, &body.cancel_remark, &actor)
                .await?
        }
        TransferType::Withdraw => {
            state
                .engine
                .cancel_withdraw(id, &body.cancel_remark, &actor)
                .await?
        }
        TransferType::Bonus | TransferType::GetCreditBack => {
            return Err(AppError::Conflict(
                "Adjustments cannot be canceled; remove them instead".to_string(),
            ))
        }
    };
    Ok(Json(json!({ "message": "success", "data": tx })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmCreditWithdrawBody {
    pub from_account_id: Uuid,
    pub bank_charge_amount: Option<BigDecimal>,
}

pub async fn confirm_credit_withdraw(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
    Json(body): Json<ConfirmCreditWithdrawBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let tx = state
        .engine
        .confirm_credit_withdraw(
            id,
            ConfirmCreditWithdrawInput {
                from_account_id: body.from_account_id,
                bank_charge_amount: body.bank_charge_amount,
            },
            &actor,
        )
        .await?;
    Ok(Json(json!({ "message": "success", "data": tx })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmTransferWithdrawBody {
    pub from_account_id: Option<Uuid>,
    pub bank_charge_amount: Option<BigDecimal>,
}

pub async fn confirm_transfer_withdraw(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
    Json(body): Json<ConfirmTransferWithdrawBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let tx = state
        .engine
        .confirm_transfer_withdraw(
            id,
            ConfirmTransferWithdrawInput {
                from_account_id: body.from_account_id,
                bank_charge_amount: body.bank_charge_amount,
            },
            &actor,
        )
        .await?;
    Ok(Json(json!({ "message": "success", "data": tx })))
}

pub async fn remove(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let tx = state.engine.remove_transaction(id, &actor).await?;
    Ok(Json(json!({ "message": "success", "data": tx })))
}
