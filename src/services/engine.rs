//! Transaction engine: creates, confirms, cancels and removes the movements
//! against member wallets.
//!
//! Every public operation runs inside a single unit of work. The `_in`
//! variants run against a caller-supplied connection so the webhook ingestor
//! and matcher can fold a confirmation into their own transaction. Status
//! transitions are validated against the edges in `TxStatus`.

use crate::clock::Clock;
use crate::db::models::{BankTransaction, User};
use crate::db::queries;
use crate::domain::money;
use crate::domain::{AuditActor, TransferType, TxStatus};
use crate::error::AppError;
use crate::services::ledger::{self, LedgerEntry};
use crate::services::notifier::{CreditNotification, Notifier};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

// Member-statement type labels.
const MS_DEPOSIT: &str = "deposit";
const MS_BONUS: &str = "bonus";
const MS_WITHDRAW: &str = "withdraw";
const MS_WITHDRAW_REFUND: &str = "withdraw_refund";
const MS_DEPOSIT_REVERSAL: &str = "deposit_reversal";
const MS_CREDIT_BACK: &str = "getcreditback";

/// Config key: minimum credited amount that triggers a notification.
const CFG_NOTIFY_START_CREDIT: &str = "notifyStartCredit";

#[derive(Debug, Clone)]
pub struct CreateDepositInput {
    pub member_code: String,
    pub amount: BigDecimal,
    pub to_account_id: Uuid,
    pub is_auto_credit: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ConfirmDepositInput {
    /// Bank-reported transfer time; defaults to the transaction's own.
    pub transfer_at: Option<DateTime<Utc>>,
    pub bonus_amount: Option<BigDecimal>,
    /// Observed statement amount; may exceed credit_amount for deposits.
    pub paid_amount: Option<BigDecimal>,
    /// External id of the settling statement, when confirmed by match.
    pub statement_external_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateWithdrawInput {
    pub member_code: String,
    pub amount: BigDecimal,
}

#[derive(Debug, Clone)]
pub struct ConfirmCreditWithdrawInput {
    pub from_account_id: Uuid,
    pub bank_charge_amount: Option<BigDecimal>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfirmTransferWithdrawInput {
    /// Override the source account chosen at credit confirmation.
    pub from_account_id: Option<Uuid>,
    pub bank_charge_amount: Option<BigDecimal>,
}

#[derive(Debug, Clone)]
pub struct CreateBonusInput {
    pub member_code: String,
    pub amount: BigDecimal,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct CreateCreditBackInput {
    pub member_code: String,
    pub amount: BigDecimal,
    pub reason: Option<String>,
}

#[derive(Clone)]
pub struct TransactionEngine {
    pool: PgPool,
    clock: Arc<dyn Clock>,
    notifier: Notifier,
}

impl TransactionEngine {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>, notifier: Notifier) -> Self {
        Self {
            pool,
            clock,
            notifier,
        }
    }

    fn parse_status(tx: &BankTransaction) -> Result<TxStatus, AppError> {
        TxStatus::from_str(&tx.status).map_err(AppError::Internal)
    }

    /// Every confirm/cancel path is bound to one transfer type; the status
    /// machines overlap (a withdraw and an auto-credit deposit both sit in
    /// pending_credit), so status alone does not identify the pipeline.
    fn ensure_type(tx: &BankTransaction, expected: TransferType) -> Result<(), AppError> {
        if tx.transfer_type != expected.as_str() {
            return Err(AppError::Conflict(format!(
                "Transaction {} is a {}, not a {}",
                tx.id, tx.transfer_type, expected
            )));
        }
        Ok(())
    }

    fn ensure_transition(
        tx: &BankTransaction,
        current: TxStatus,
        next: TxStatus,
    ) -> Result<(), AppError> {
        if !current.can_transition_to(next) {
            return Err(AppError::Conflict(format!(
                "Transaction {} cannot move from {} to {}",
                tx.id, current, next
            )));
        }
        Ok(())
    }

    async fn active_user_by_member_code(&self, member_code: &str) -> Result<User, AppError> {
        let user = queries::get_user_by_member_code(&self.pool, member_code)
            .await
            .map_err(|e| AppError::not_found_or_db(e, format!("Member {member_code} not found")))?;
        if user.status != "active" {
            return Err(AppError::Conflict(format!(
                "Member {member_code} is not active"
            )));
        }
        Ok(user)
    }

    // -- deposits -----------------------------------------------------------

    /// Insert a pending deposit. No balance change happens until confirmation.
    pub async fn create_deposit(
        &self,
        input: CreateDepositInput,
        actor: &AuditActor,
    ) -> Result<BankTransaction, AppError> {
        if !money::is_positive(&input.amount) {
            return Err(AppError::Validation("amount must be positive".to_string()));
        }
        let user = self.active_user_by_member_code(&input.member_code).await?;

        let status = if input.is_auto_credit {
            TxStatus::PendingCredit
        } else {
            TxStatus::Pending
        };
        let now = self.clock.now();

        let mut db_tx = self.pool.begin().await?;
        let row = queries::insert_transaction(
            &mut db_tx,
            &new_transaction(
                user.id,
                &user.member_code,
                TransferType::Deposit,
                &money::round2(&input.amount),
                status,
                now,
                actor,
                NewTransactionExtras {
                    to_account_id: Some(input.to_account_id),
                    is_auto_credit: input.is_auto_credit,
                    ..Default::default()
                },
            ),
        )
        .await?;
        queries::insert_transaction_action(
            &mut db_tx,
            row.id,
            "create",
            None,
            Some(actor.id),
            Some(&actor.username),
        )
        .await?;
        db_tx.commit().await?;

        tracing::info!(
            "deposit {} created for member {} amount {}",
            row.id,
            row.member_code,
            row.credit_amount
        );
        Ok(row)
    }

    /// Confirm a deposit in its own unit of work.
    pub async fn confirm_deposit(
        &self,
        tx_id: Uuid,
        input: ConfirmDepositInput,
        actor: &AuditActor,
    ) -> Result<BankTransaction, AppError> {
        let mut db_tx = self.pool.begin().await?;
        let row = self.confirm_deposit_in(&mut db_tx, tx_id, input, actor).await?;
        db_tx.commit().await?;

        self.maybe_notify(&row).await;
        Ok(row)
    }

    /// Confirm a deposit inside the caller's unit of work. The caller is
    /// responsible for committing and then calling `maybe_notify`.
    pub async fn confirm_deposit_in(
        &self,
        conn: &mut PgConnection,
        tx_id: Uuid,
        input: ConfirmDepositInput,
        actor: &AuditActor,
    ) -> Result<BankTransaction, AppError> {
        let tx = queries::lock_transaction(conn, tx_id)
            .await
            .map_err(|e| AppError::not_found_or_db(e, format!("Transaction {tx_id} not found")))?;
        Self::ensure_type(&tx, TransferType::Deposit)?;
        let current = Self::parse_status(&tx)?;
        if !matches!(current, TxStatus::Pending | TxStatus::PendingCredit) {
            return Err(AppError::Conflict(format!(
                "Transaction {} is {} and cannot be confirmed",
                tx.id, current
            )));
        }
        Self::ensure_transition(&tx, current, TxStatus::Finished)?;

        let pre_image = serde_json::to_value(&tx)
            .map_err(|e| AppError::Internal(e.to_string()))?;

        let bonus = money::round2(&input.bonus_amount.unwrap_or_else(money::zero));
        if money::is_negative(&bonus) {
            return Err(AppError::Validation("bonus must not be negative".to_string()));
        }
        let transfer_at = input.transfer_at.unwrap_or(tx.transfer_at);
        let paid = input
            .paid_amount
            .map(|p| money::round2(&p))
            .unwrap_or_else(|| tx.credit_amount.clone());
        if paid < tx.credit_amount {
            return Err(AppError::Conflict(format!(
                "Paid amount {} is below requested {}",
                paid, tx.credit_amount
            )));
        }
        // Surplus is recorded, never credited to the member.
        let over = money::round2(&(&paid - &tx.credit_amount));

        let mut entries = vec![LedgerEntry {
            statement_type: MS_DEPOSIT.to_string(),
            amount: tx.credit_amount.clone(),
            info: Some(format!("deposit {}", tx.id)),
            transfer_at,
        }];
        if money::is_positive(&bonus) {
            // Bonus rides on the deposit's transfer time.
            entries.push(LedgerEntry {
                statement_type: MS_BONUS.to_string(),
                amount: bonus.clone(),
                info: Some(format!("deposit bonus {}", tx.id)),
                transfer_at,
            });
        }

        let posted = ledger::post_member_entries(conn, tx.user_id, &entries).await?;
        let now = self.clock.now();

        let row = sqlx::query_as::<_, BankTransaction>(
            "UPDATE bank_transactions
             SET status = 'finished', before_amount = $2, after_amount = $3,
                 bonus_amount = $4, paid_amount = $5, over_amount = $6,
                 statement_external_id = COALESCE($7, statement_external_id),
                 transfer_at = $8, confirmed_by_id = $9, confirmed_by_username = $10,
                 confirmed_at = $11, updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(tx.id)
        .bind(&posted.before)
        .bind(&posted.after)
        .bind(&bonus)
        .bind(&paid)
        .bind(&over)
        .bind(&input.statement_external_id)
        .bind(transfer_at)
        .bind(actor.id)
        .bind(&actor.username)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;

        queries::insert_transaction_action(
            conn,
            tx.id,
            "confirm_deposit",
            Some(&pre_image),
            Some(actor.id),
            Some(&actor.username),
        )
        .await?;

        tracing::info!(
            "deposit {} confirmed for member {}: credit {} bonus {}",
            row.id,
            row.member_code,
            row.credit_amount,
            row.bonus_amount
        );
        Ok(row)
    }

    /// Cancel a deposit that never reached the wallet.
    pub async fn cancel_deposit(
        &self,
        tx_id: Uuid,
        remark: &str,
        actor: &AuditActor,
    ) -> Result<BankTransaction, AppError> {
        let mut db_tx = self.pool.begin().await?;
        let tx = queries::lock_transaction(&mut db_tx, tx_id)
            .await
            .map_err(|e| AppError::not_found_or_db(e, format!("Transaction {tx_id} not found")))?;
        Self::ensure_type(&tx, TransferType::Deposit)?;
        let current = Self::parse_status(&tx)?;
        if !matches!(current, TxStatus::Pending | TxStatus::PendingCredit) {
            return Err(AppError::Conflict(format!(
                "Deposit {} is {} and cannot be canceled",
                tx.id, current
            )));
        }
        let pre_image =
            serde_json::to_value(&tx).map_err(|e| AppError::Internal(e.to_string()))?;

        let row = self
            .mark_canceled(&mut db_tx, tx.id, remark, actor)
            .await?;
        queries::insert_transaction_action(
            &mut db_tx,
            tx.id,
            "cancel",
            Some(&pre_image),
            Some(actor.id),
            Some(&actor.username),
        )
        .await?;
        db_tx.commit().await?;
        Ok(row)
    }

    /// Compensate a finished transaction: reverse the credited amounts and
    /// mark the row removed.
    pub async fn remove_transaction(
        &self,
        tx_id: Uuid,
        actor: &AuditActor,
    ) -> Result<BankTransaction, AppError> {
        let mut db_tx = self.pool.begin().await?;
        let tx = queries::lock_transaction(&mut db_tx, tx_id)
            .await
            .map_err(|e| AppError::not_found_or_db(e, format!("Transaction {tx_id} not found")))?;
        let current = Self::parse_status(&tx)?;
        Self::ensure_transition(&tx, current, TxStatus::Removed)?;

        let pre_image =
            serde_json::to_value(&tx).map_err(|e| AppError::Internal(e.to_string()))?;

        let transfer_type =
            TransferType::from_str(&tx.transfer_type).map_err(AppError::Internal)?;
        let reversal = match transfer_type {
            TransferType::Deposit | TransferType::Bonus => {
                money::round2(&(-(&tx.credit_amount + &tx.bonus_amount)))
            }
            TransferType::GetCreditBack => money::round2(&tx.credit_amount),
            TransferType::Withdraw => {
                return Err(AppError::Conflict(format!(
                    "Withdraw {} cannot be removed; cancel it before transfer instead",
                    tx.id
                )))
            }
        };
        let now = self.clock.now();
        ledger::post_member_entries(
            &mut db_tx,
            tx.user_id,
            &[LedgerEntry {
                statement_type: MS_DEPOSIT_REVERSAL.to_string(),
                amount: reversal,
                info: Some(format!("removal of {}", tx.id)),
                transfer_at: now,
            }],
        )
        .await?;

        let row = sqlx::query_as::<_, BankTransaction>(
            "UPDATE bank_transactions
             SET status = 'removed', removed_by_id = $2, removed_by_username = $3,
                 removed_at = $4, updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(tx.id)
        .bind(actor.id)
        .bind(&actor.username)
        .bind(now)
        .fetch_one(&mut *db_tx)
        .await?;

        queries::insert_transaction_action(
            &mut db_tx,
            tx.id,
            "remove",
            Some(&pre_image),
            Some(actor.id),
            Some(&actor.username),
        )
        .await?;
        db_tx.commit().await?;

        tracing::info!("transaction {} removed, wallet compensated", tx.id);
        Ok(row)
    }

    // -- withdrawals --------------------------------------------------------

    /// Create a withdrawal, debiting the wallet immediately so the member
    /// cannot double-spend while the request is in review.
    pub async fn create_withdraw(
        &self,
        input: CreateWithdrawInput,
        actor: &AuditActor,
    ) -> Result<BankTransaction, AppError> {
        if !money::is_positive(&input.amount) {
            return Err(AppError::Validation("amount must be positive".to_string()));
        }
        let user = self.active_user_by_member_code(&input.member_code).await?;
        let amount = money::round2(&input.amount);
        let now = self.clock.now();

        let mut db_tx = self.pool.begin().await?;
        // post_member_entries rejects a balance that would go negative.
        ledger::post_member_entries(
            &mut db_tx,
            user.id,
            &[LedgerEntry {
                statement_type: MS_WITHDRAW.to_string(),
                amount: -&amount,
                info: Some(format!("withdraw request for {}", user.member_code)),
                transfer_at: now,
            }],
        )
        .await?;

        let row = queries::insert_transaction(
            &mut db_tx,
            &new_transaction(
                user.id,
                &user.member_code,
                TransferType::Withdraw,
                &amount,
                TxStatus::PendingCredit,
                now,
                actor,
                NewTransactionExtras {
                    to_account_number: user.bank_account_number.clone(),
                    ..Default::default()
                },
            ),
        )
        .await?;
        queries::insert_transaction_action(
            &mut db_tx,
            row.id,
            "create",
            None,
            Some(actor.id),
            Some(&actor.username),
        )
        .await?;
        db_tx.commit().await?;

        tracing::info!(
            "withdraw {} created for member {} amount {}",
            row.id,
            row.member_code,
            row.credit_amount
        );
        Ok(row)
    }

    pub async fn confirm_credit_withdraw(
        &self,
        tx_id: Uuid,
        input: ConfirmCreditWithdrawInput,
        actor: &AuditActor,
    ) -> Result<BankTransaction, AppError> {
        let mut db_tx = self.pool.begin().await?;
        let row = self
            .confirm_credit_withdraw_in(&mut db_tx, tx_id, input, actor)
            .await?;
        db_tx.commit().await?;
        Ok(row)
    }

    pub async fn confirm_credit_withdraw_in(
        &self,
        conn: &mut PgConnection,
        tx_id: Uuid,
        input: ConfirmCreditWithdrawInput,
        actor: &AuditActor,
    ) -> Result<BankTransaction, AppError> {
        let tx = queries::lock_transaction(conn, tx_id)
            .await
            .map_err(|e| AppError::not_found_or_db(e, format!("Transaction {tx_id} not found")))?;
        Self::ensure_type(&tx, TransferType::Withdraw)?;
        let current = Self::parse_status(&tx)?;
        if current != TxStatus::PendingCredit {
            return Err(AppError::Conflict(format!(
                "Withdraw {} is {} and cannot be credit-confirmed",
                tx.id, current
            )));
        }
        let pre_image =
            serde_json::to_value(&tx).map_err(|e| AppError::Internal(e.to_string()))?;
        let charge = money::round2(&input.bank_charge_amount.unwrap_or_else(money::zero));

        let row = sqlx::query_as::<_, BankTransaction>(
            "UPDATE bank_transactions
             SET status = 'pending_transfer', from_account_id = $2,
                 bank_charge_amount = $3, confirmed_by_id = $4,
                 confirmed_by_username = $5, confirmed_at = $6, updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(tx.id)
        .bind(input.from_account_id)
        .bind(&charge)
        .bind(actor.id)
        .bind(&actor.username)
        .bind(self.clock.now())
        .fetch_one(&mut *conn)
        .await?;

        queries::insert_transaction_action(
            conn,
            tx.id,
            "confirm_credit_withdraw",
            Some(&pre_image),
            Some(actor.id),
            Some(&actor.username),
        )
        .await?;
        Ok(row)
    }

    /// Manual transfer confirmation: finishes the withdrawal and debits the
    /// source account by amount + charge.
    pub async fn confirm_transfer_withdraw(
        &self,
        tx_id: Uuid,
        input: ConfirmTransferWithdrawInput,
        actor: &AuditActor,
    ) -> Result<BankTransaction, AppError> {
        let mut db_tx = self.pool.begin().await?;
        let row = self
            .confirm_transfer_withdraw_in(&mut db_tx, tx_id, input, actor)
            .await?;
        db_tx.commit().await?;
        Ok(row)
    }

    pub async fn confirm_transfer_withdraw_in(
        &self,
        conn: &mut PgConnection,
        tx_id: Uuid,
        input: ConfirmTransferWithdrawInput,
        actor: &AuditActor,
    ) -> Result<BankTransaction, AppError> {
        // Lock order must match the ingestor (account before transaction); a
        // statement webhook racing this confirm would otherwise deadlock. The
        // unlocked read only resolves the account; status is checked again
        // once the row lock is held.
        let preview = queries::get_transaction_in(conn, tx_id)
            .await
            .map_err(|e| AppError::not_found_or_db(e, format!("Transaction {tx_id} not found")))?;
        let from_account_id = input
            .from_account_id
            .or(preview.from_account_id)
            .ok_or_else(|| {
                AppError::Conflict(format!("Withdraw {tx_id} has no source account"))
            })?;
        queries::lock_account(conn, from_account_id).await.map_err(|e| {
            AppError::not_found_or_db(e, format!("Bank account {from_account_id} not found"))
        })?;

        let tx = queries::lock_transaction(conn, tx_id)
            .await
            .map_err(|e| AppError::not_found_or_db(e, format!("Transaction {tx_id} not found")))?;
        Self::ensure_type(&tx, TransferType::Withdraw)?;
        let current = Self::parse_status(&tx)?;
        if current != TxStatus::PendingTransfer {
            return Err(AppError::Conflict(format!(
                "Withdraw {} is {} and cannot be transfer-confirmed",
                tx.id, current
            )));
        }
        let pre_image =
            serde_json::to_value(&tx).map_err(|e| AppError::Internal(e.to_string()))?;

        let charge = input
            .bank_charge_amount
            .map(|c| money::round2(&c))
            .unwrap_or_else(|| tx.bank_charge_amount.clone());

        sqlx::query(
            "UPDATE bank_transactions
             SET from_account_id = $2, bank_charge_amount = $3, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(tx.id)
        .bind(from_account_id)
        .bind(&charge)
        .execute(&mut *conn)
        .await?;

        let debit = money::round2(&(&tx.credit_amount + &charge));
        ledger::apply_account_delta(conn, from_account_id, &-debit).await?;

        let row = self.finish_withdraw_row(conn, tx.id, actor).await?;
        queries::insert_transaction_action(
            conn,
            tx.id,
            "confirm_transfer_withdraw",
            Some(&pre_image),
            Some(actor.id),
            Some(&actor.username),
        )
        .await?;
        Ok(row)
    }

    /// Statement-driven finalisation: the ingestor already applied the bank
    /// delta from the statement, so no account debit happens here.
    pub async fn finish_withdraw_from_statement_in(
        &self,
        conn: &mut PgConnection,
        tx_id: Uuid,
        statement_external_id: &str,
    ) -> Result<BankTransaction, AppError> {
        let actor = AuditActor::system();
        let tx = queries::lock_transaction(conn, tx_id)
            .await
            .map_err(|e| AppError::not_found_or_db(e, format!("Transaction {tx_id} not found")))?;
        Self::ensure_type(&tx, TransferType::Withdraw)?;
        let current = Self::parse_status(&tx)?;
        if current != TxStatus::PendingTransfer {
            return Err(AppError::Conflict(format!(
                "Withdraw {} is {} and cannot be finalised",
                tx.id, current
            )));
        }
        let pre_image =
            serde_json::to_value(&tx).map_err(|e| AppError::Internal(e.to_string()))?;

        sqlx::query(
            "UPDATE bank_transactions
             SET statement_external_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(tx.id)
        .bind(statement_external_id)
        .execute(&mut *conn)
        .await?;

        let row = self.finish_withdraw_row(conn, tx.id, &actor).await?;
        queries::insert_transaction_action(
            conn,
            tx.id,
            "finish_withdraw_statement",
            Some(&pre_image),
            Some(actor.id),
            Some(&actor.username),
        )
        .await?;
        Ok(row)
    }

    async fn finish_withdraw_row(
        &self,
        conn: &mut PgConnection,
        tx_id: Uuid,
        actor: &AuditActor,
    ) -> Result<BankTransaction, AppError> {
        let row = sqlx::query_as::<_, BankTransaction>(
            "UPDATE bank_transactions
             SET status = 'finished', confirmed_by_id = $2, confirmed_by_username = $3,
                 confirmed_at = $4, updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(tx_id)
        .bind(actor.id)
        .bind(&actor.username)
        .bind(self.clock.now())
        .fetch_one(&mut *conn)
        .await?;
        Ok(row)
    }

    /// Cancel a withdrawal from any non-final state, refunding the member.
    pub async fn cancel_withdraw(
        &self,
        tx_id: Uuid,
        remark: &str,
        actor: &AuditActor,
    ) -> Result<BankTransaction, AppError> {
        let mut db_tx = self.pool.begin().await?;
        let tx = queries::lock_transaction(&mut db_tx, tx_id)
            .await
            .map_err(|e| AppError::not_found_or_db(e, format!("Transaction {tx_id} not found")))?;
        Self::ensure_type(&tx, TransferType::Withdraw)?;
        let current = Self::parse_status(&tx)?;
        Self::ensure_transition(&tx, current, TxStatus::Canceled)?;

        let pre_image =
            serde_json::to_value(&tx).map_err(|e| AppError::Internal(e.to_string()))?;

        ledger::post_member_entries(
            &mut db_tx,
            tx.user_id,
            &[LedgerEntry {
                statement_type: MS_WITHDRAW_REFUND.to_string(),
                amount: tx.credit_amount.clone(),
                info: Some(format!("cancellation of {}", tx.id)),
                transfer_at: self.clock.now(),
            }],
        )
        .await?;

        let row = self.mark_canceled(&mut db_tx, tx.id, remark, actor).await?;
        queries::insert_transaction_action(
            &mut db_tx,
            tx.id,
            "cancel",
            Some(&pre_image),
            Some(actor.id),
            Some(&actor.username),
        )
        .await?;
        db_tx.commit().await?;

        tracing::info!("withdraw {} canceled, member refunded", tx.id);
        Ok(row)
    }

    /// Definite gateway failure: park the withdrawal for operator resolution
    /// without touching any account balance.
    pub async fn fail_withdraw(
        &self,
        tx_id: Uuid,
        detail: &str,
    ) -> Result<BankTransaction, AppError> {
        let actor = AuditActor::system();
        let mut db_tx = self.pool.begin().await?;
        let tx = queries::lock_transaction(&mut db_tx, tx_id)
            .await
            .map_err(|e| AppError::not_found_or_db(e, format!("Transaction {tx_id} not found")))?;
        Self::ensure_type(&tx, TransferType::Withdraw)?;
        let current = Self::parse_status(&tx)?;
        Self::ensure_transition(&tx, current, TxStatus::Failed)?;
        let pre_image =
            serde_json::to_value(&tx).map_err(|e| AppError::Internal(e.to_string()))?;

        let row = sqlx::query_as::<_, BankTransaction>(
            "UPDATE bank_transactions
             SET status = 'failed', status_detail = $2, updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(tx.id)
        .bind(detail)
        .fetch_one(&mut *db_tx)
        .await?;

        queries::insert_transaction_action(
            &mut db_tx,
            tx.id,
            "fail",
            Some(&pre_image),
            Some(actor.id),
            Some(&actor.username),
        )
        .await?;
        db_tx.commit().await?;
        Ok(row)
    }

    /// Attach gateway detail without changing status (ambiguous outcomes).
    pub async fn set_status_detail(&self, tx_id: Uuid, detail: &str) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE bank_transactions SET status_detail = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(tx_id)
        .bind(detail)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_canceled(
        &self,
        conn: &mut PgConnection,
        tx_id: Uuid,
        remark: &str,
        actor: &AuditActor,
    ) -> Result<BankTransaction, AppError> {
        let row = sqlx::query_as::<_, BankTransaction>(
            "UPDATE bank_transactions
             SET status = 'canceled', cancel_remark = $2, canceled_by_id = $3,
                 canceled_by_username = $4, canceled_at = $5, updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(tx_id)
        .bind(remark)
        .bind(actor.id)
        .bind(&actor.username)
        .bind(self.clock.now())
        .fetch_one(&mut *conn)
        .await?;
        Ok(row)
    }

    // -- bonus --------------------------------------------------------------

    /// Direct credit; created already finished.
    pub async fn create_bonus(
        &self,
        input: CreateBonusInput,
        actor: &AuditActor,
    ) -> Result<BankTransaction, AppError> {
        if !money::is_positive(&input.amount) {
            return Err(AppError::Validation("amount must be positive".to_string()));
        }
        let user = self.active_user_by_member_code(&input.member_code).await?;
        let amount = money::round2(&input.amount);
        let now = self.clock.now();

        let mut db_tx = self.pool.begin().await?;
        let posted = ledger::post_member_entries(
            &mut db_tx,
            user.id,
            &[LedgerEntry {
                statement_type: MS_BONUS.to_string(),
                amount: amount.clone(),
                info: Some(input.reason.clone()),
                transfer_at: now,
            }],
        )
        .await?;

        let mut tx = new_transaction(
            user.id,
            &user.member_code,
            TransferType::Bonus,
            &amount,
            TxStatus::Finished,
            now,
            actor,
            NewTransactionExtras::default(),
        );
        tx.before_amount = Some(posted.before.clone());
        tx.after_amount = Some(posted.after.clone());

        let row = queries::insert_transaction(&mut db_tx, &tx).await?;
        queries::insert_transaction_action(
            &mut db_tx,
            row.id,
            "create",
            None,
            Some(actor.id),
            Some(&actor.username),
        )
        .await?;
        db_tx.commit().await?;
        Ok(row)
    }

    /// Pull credit back out of a member wallet. Created directly finished,
    /// like a bonus with the opposite sign; removal restores the credit.
    pub async fn create_credit_back(
        &self,
        input: CreateCreditBackInput,
        actor: &AuditActor,
    ) -> Result<BankTransaction, AppError> {
        if !money::is_positive(&input.amount) {
            return Err(AppError::Validation("amount must be positive".to_string()));
        }
        let user = self.active_user_by_member_code(&input.member_code).await?;
        let amount = money::round2(&input.amount);
        let now = self.clock.now();

        let mut db_tx = self.pool.begin().await?;
        let posted = ledger::post_member_entries(
            &mut db_tx,
            user.id,
            &[LedgerEntry {
                statement_type: MS_CREDIT_BACK.to_string(),
                amount: -&amount,
                info: input.reason.clone(),
                transfer_at: now,
            }],
        )
        .await?;

        let mut tx = new_transaction(
            user.id,
            &user.member_code,
            TransferType::GetCreditBack,
            &amount,
            TxStatus::Finished,
            now,
            actor,
            NewTransactionExtras::default(),
        );
        tx.before_amount = Some(posted.before.clone());
        tx.after_amount = Some(posted.after.clone());

        let row = queries::insert_transaction(&mut db_tx, &tx).await?;
        queries::insert_transaction_action(
            &mut db_tx,
            row.id,
            "create",
            None,
            Some(actor.id),
            Some(&actor.username),
        )
        .await?;
        db_tx.commit().await?;
        Ok(row)
    }

    // -- notifications ------------------------------------------------------

    /// Queue a credit notification when the finished deposit reaches the
    /// configured threshold. Failures here never affect the ledger.
    pub async fn maybe_notify(&self, tx: &BankTransaction) {
        if tx.status != TxStatus::Finished.as_str()
            || tx.transfer_type != TransferType::Deposit.as_str()
        {
            return;
        }

        let threshold = match queries::get_config_value(&self.pool, CFG_NOTIFY_START_CREDIT).await
        {
            Ok(Some(v)) => match BigDecimal::from_str(&v) {
                Ok(t) => t,
                Err(_) => {
                    tracing::warn!("invalid {} config value: {}", CFG_NOTIFY_START_CREDIT, v);
                    return;
                }
            },
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("could not read notify threshold: {}", e);
                return;
            }
        };

        let total = &tx.credit_amount + &tx.bonus_amount;
        if total < threshold {
            return;
        }

        let account = match tx.to_account_id {
            Some(id) => queries::get_account(&self.pool, id)
                .await
                .map(|a| a.account_number)
                .unwrap_or_default(),
            None => String::new(),
        };

        self.notifier.enqueue(CreditNotification {
            member_code: tx.member_code.clone(),
            amount: money::round2(&total),
            account,
            timestamp: tx.confirmed_at.unwrap_or(tx.transfer_at),
        });
    }
}

#[derive(Debug, Default)]
struct NewTransactionExtras {
    to_account_id: Option<Uuid>,
    to_account_number: Option<String>,
    is_auto_credit: bool,
}

#[allow(clippy::too_many_arguments)]
fn new_transaction(
    user_id: Uuid,
    member_code: &str,
    transfer_type: TransferType,
    amount: &BigDecimal,
    status: TxStatus,
    transfer_at: DateTime<Utc>,
    actor: &AuditActor,
    extras: NewTransactionExtras,
) -> BankTransaction {
    BankTransaction {
        id: Uuid::new_v4(),
        user_id,
        member_code: member_code.to_string(),
        transfer_type: transfer_type.as_str().to_string(),
        from_account_id: None,
        to_account_id: extras.to_account_id,
        to_account_number: extras.to_account_number,
        credit_amount: amount.clone(),
        paid_amount: None,
        over_amount: money::zero(),
        bonus_amount: money::zero(),
        bank_charge_amount: money::zero(),
        before_amount: None,
        after_amount: None,
        statement_external_id: None,
        transfer_at,
        status: status.as_str().to_string(),
        status_detail: None,
        is_auto_credit: extras.is_auto_credit,
        created_by_id: Some(actor.id),
        created_by_username: Some(actor.username.clone()),
        confirmed_by_id: None,
        confirmed_by_username: None,
        confirmed_at: None,
        canceled_by_id: None,
        canceled_by_username: None,
        canceled_at: None,
        cancel_remark: None,
        removed_by_id: None,
        removed_by_username: None,
        removed_at: None,
        created_at: transfer_at,
        updated_at: transfer_at,
        deleted_at: None,
    }
}
