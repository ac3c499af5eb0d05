//! Automatic withdrawal orchestration.
//!
//! Runs after a withdrawal is created: pick a source account under lock and
//! credit-confirm in one unit of work, call the automation service with no
//! database locks held, then classify the outcome in a second unit of work.
//! A gateway timeout leaves the provider-side outcome unknown, so the
//! withdrawal stays pending and is never retried automatically.

use crate::db::models::BankTransaction;
use crate::db::queries;
use crate::domain::money;
use crate::domain::AuditActor;
use crate::error::AppError;
use crate::gateway::client::BankGatewayClient;
use crate::services::engine::{
    ConfirmCreditWithdrawInput, ConfirmTransferWithdrawInput, TransactionEngine,
};
use bigdecimal::BigDecimal;
use serde::Serialize;
use sqlx::PgPool;
use std::str::FromStr;

const CFG_AUTO_WITHDRAW: &str = "autoWithdraw";
const CFG_MIN_AMOUNT: &str = "minAutoWithdrawAmount";
const CFG_MAX_AMOUNT: &str = "maxAutoWithdrawAmount";
const CFG_PIN: &str = "autoWithdrawPin";
const CFG_ESTIMATED_FEE: &str = "estimatedTransferFee";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome", content = "detail")]
pub enum AutoWithdrawOutcome {
    /// No gate passed; the withdrawal stays where manual review picks it up.
    Skipped(String),
    /// Source account assigned but the transfer could not be attempted; an
    /// operator sends the money.
    CreditConfirmed,
    /// Transfer accepted by the automation service; the statement webhook
    /// finishes the withdrawal.
    TransferSent,
    /// Transfer accepted and the withdrawal auto-confirmed through to
    /// finished, debiting the source account.
    Confirmed,
    /// Definite provider failure; the withdrawal is parked as failed.
    Failed(String),
    /// Timeout: outcome unknown, withdrawal left pending for the operator.
    Ambiguous,
}

#[derive(Clone)]
pub struct AutoWithdrawOrchestrator {
    pool: PgPool,
    engine: TransactionEngine,
    gateway: BankGatewayClient,
}

impl AutoWithdrawOrchestrator {
    pub fn new(pool: PgPool, engine: TransactionEngine, gateway: BankGatewayClient) -> Self {
        Self {
            pool,
            engine,
            gateway,
        }
    }

    async fn config_amount(&self, key: &str) -> Result<Option<BigDecimal>, AppError> {
        match queries::get_config_value(&self.pool, key).await? {
            Some(v) => BigDecimal::from_str(&v)
                .map(Some)
                .map_err(|_| AppError::Internal(format!("invalid {key} config value: {v}"))),
            None => Ok(None),
        }
    }

    pub async fn run(&self, tx: &BankTransaction) -> Result<AutoWithdrawOutcome, AppError> {
        let enabled = queries::get_config_value(&self.pool, CFG_AUTO_WITHDRAW)
            .await?
            .map(|v| v == "true")
            .unwrap_or(false);
        if !enabled {
            return Ok(AutoWithdrawOutcome::Skipped(
                "automatic withdrawals disabled".to_string(),
            ));
        }

        if let Some(min) = self.config_amount(CFG_MIN_AMOUNT).await? {
            if tx.credit_amount < min {
                return Ok(AutoWithdrawOutcome::Skipped(format!(
                    "amount below automatic minimum {min}"
                )));
            }
        }
        if let Some(max) = self.config_amount(CFG_MAX_AMOUNT).await? {
            if tx.credit_amount > max {
                return Ok(AutoWithdrawOutcome::Skipped(format!(
                    "amount above automatic maximum {max}"
                )));
            }
        }

        let Some(to_account_number) = tx.to_account_number.clone() else {
            return Ok(AutoWithdrawOutcome::Skipped(
                "member has no registered bank account".to_string(),
            ));
        };
        let user = queries::get_user(&self.pool, tx.user_id).await?;
        let Some(member_bank_code) = user.bank_code else {
            return Ok(AutoWithdrawOutcome::Skipped(
                "member has no registered bank code".to_string(),
            ));
        };

        let fee = self
            .config_amount(CFG_ESTIMATED_FEE)
            .await?
            .unwrap_or_else(money::zero);

        // Unit of work 1: choose a source account under lock and assign it.
        let mut db_tx = self.pool.begin().await?;
        let Some(account) =
            queries::select_auto_withdraw_account(&mut db_tx, tx.user_id, &tx.credit_amount, &fee)
                .await?
        else {
            db_tx.rollback().await?;
            return Ok(AutoWithdrawOutcome::Skipped(
                "no eligible source account".to_string(),
            ));
        };
        if !account.auto_withdraw_credit_flag {
            db_tx.rollback().await?;
            return Ok(AutoWithdrawOutcome::Skipped(format!(
                "account {} does not allow automatic credit confirmation",
                account.account_number
            )));
        }

        self.engine
            .confirm_credit_withdraw_in(
                &mut db_tx,
                tx.id,
                ConfirmCreditWithdrawInput {
                    from_account_id: account.id,
                    bank_charge_amount: Some(fee.clone()),
                },
                &AuditActor::system(),
            )
            .await?;
        db_tx.commit().await?;

        let Some(pin) = queries::get_config_value(&self.pool, CFG_PIN).await? else {
            self.engine
                .set_status_detail(tx.id, "automatic transfer skipped: no pin configured")
                .await?;
            return Ok(AutoWithdrawOutcome::CreditConfirmed);
        };

        // The gateway call runs without any row locks held.
        let result = self
            .gateway
            .transfer(
                &account.account_number,
                &to_account_number,
                &tx.credit_amount,
                &member_bank_code,
                &pin,
            )
            .await;

        // Unit of work 2: classify the outcome.
        match result {
            Ok(ack) if ack.success => {
                if account.auto_withdraw_confirm_flag {
                    self.engine
                        .confirm_transfer_withdraw(
                            tx.id,
                            ConfirmTransferWithdrawInput::default(),
                            &AuditActor::system(),
                        )
                        .await?;
                    tracing::info!("withdraw {} transferred and auto-confirmed", tx.id);
                    Ok(AutoWithdrawOutcome::Confirmed)
                } else {
                    self.engine
                        .set_status_detail(tx.id, "transfer sent, awaiting statement")
                        .await?;
                    tracing::info!("withdraw {} transfer accepted by gateway", tx.id);
                    Ok(AutoWithdrawOutcome::TransferSent)
                }
            }
            Ok(ack) => {
                let reason = ack.reason.unwrap_or_else(|| "transfer rejected".to_string());
                self.engine
                    .fail_withdraw(tx.id, &format!("gateway rejected transfer: {reason}"))
                    .await?;
                tracing::warn!("withdraw {} rejected by gateway: {}", tx.id, reason);
                Ok(AutoWithdrawOutcome::Failed(reason))
            }
            Err(e) if e.is_ambiguous() => {
                self.engine
                    .set_status_detail(tx.id, "gateway timeout, transfer outcome unknown")
                    .await?;
                tracing::warn!("withdraw {} gateway timeout, leaving pending", tx.id);
                Ok(AutoWithdrawOutcome::Ambiguous)
            }
            Err(e) => {
                let detail = format!("gateway error: {e}");
                self.engine.fail_withdraw(tx.id, &detail).await?;
                tracing::warn!("withdraw {} failed: {}", tx.id, detail);
                Ok(AutoWithdrawOutcome::Failed(detail))
            }
        }
    }
}
