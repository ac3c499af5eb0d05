//! Statement-to-transaction matching.
//!
//! A deposit statement settles at most one pending deposit; a withdraw
//! statement finalises at most one withdrawal awaiting transfer. Candidate
//! selection is deterministic: closest transfer time wins, then closest
//! amount, then earliest creation. Runs inside the ingestor's unit of work so
//! a crash leaves either both the statement and the confirmation or neither.

use crate::db::models::{BankStatement, BankTransaction};
use crate::db::queries;
use crate::domain::money;
use crate::domain::{AuditActor, StatementStatus, StatementType};
use crate::error::AppError;
use crate::services::engine::{ConfirmDepositInput, TransactionEngine};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use std::str::FromStr;
use uuid::Uuid;

/// Half-width of the transfer-time window a candidate must fall in.
pub const MATCH_WINDOW_SECS: i64 = 30 * 60;

/// How the operator names the deposit an unknown statement should settle.
#[derive(Debug, Clone, Copy)]
pub enum ManualMatchTarget {
    Transaction(Uuid),
    User(Uuid),
}

#[derive(Clone)]
pub struct StatementMatcher {
    engine: TransactionEngine,
}

impl StatementMatcher {
    pub fn new(engine: TransactionEngine) -> Self {
        Self { engine }
    }

    /// Try to settle a freshly ingested statement. Returns the confirmed
    /// transaction when a match was found; the statement stays pending
    /// otherwise.
    pub async fn match_statement_in(
        &self,
        conn: &mut PgConnection,
        statement: &BankStatement,
    ) -> Result<Option<BankTransaction>, AppError> {
        let statement_type =
            StatementType::from_str(&statement.statement_type).map_err(AppError::Internal)?;

        // A statement already referenced by a transaction can never settle
        // another one.
        let references =
            queries::count_transactions_for_statement(conn, &statement.external_id).await?;
        if references > 0 {
            return Ok(None);
        }

        match statement_type {
            StatementType::Deposit => self.match_deposit_in(conn, statement).await,
            StatementType::Withdraw => self.match_withdraw_in(conn, statement).await,
        }
    }

    async fn match_deposit_in(
        &self,
        conn: &mut PgConnection,
        statement: &BankStatement,
    ) -> Result<Option<BankTransaction>, AppError> {
        let candidates = queries::find_deposit_candidates(
            conn,
            statement.account_id,
            &statement.amount,
            statement.from_bank_code.as_deref(),
            statement.from_account_number.as_deref(),
            statement.transfer_at,
            MATCH_WINDOW_SECS,
        )
        .await?;

        let Some(candidate) =
            pick_candidate(&candidates, &statement.amount, statement.transfer_at)
        else {
            return Ok(None);
        };
        let candidate_id = candidate.id;

        let confirmed = self
            .engine
            .confirm_deposit_in(
                conn,
                candidate_id,
                ConfirmDepositInput {
                    transfer_at: Some(statement.transfer_at),
                    bonus_amount: None,
                    paid_amount: Some(statement.amount.clone()),
                    statement_external_id: Some(statement.external_id.clone()),
                },
                &AuditActor::system(),
            )
            .await?;

        self.mark_statement_confirmed(conn, statement, confirmed.id)
            .await?;
        Ok(Some(confirmed))
    }

    async fn match_withdraw_in(
        &self,
        conn: &mut PgConnection,
        statement: &BankStatement,
    ) -> Result<Option<BankTransaction>, AppError> {
        let Some(to_account_number) = statement.from_account_number.as_deref() else {
            return Ok(None);
        };
        // Statement amounts are negative for money out.
        let amount = money::round2(&statement.amount.clone().abs());

        let candidates = queries::find_withdraw_candidates(
            conn,
            to_account_number,
            &amount,
            statement.transfer_at,
            MATCH_WINDOW_SECS,
        )
        .await?;

        let Some(candidate) = pick_candidate(&candidates, &amount, statement.transfer_at) else {
            return Ok(None);
        };
        let candidate_id = candidate.id;

        // The ingestor already applied the statement delta to the operator
        // account, so finalisation touches only the transaction row.
        let finished = self
            .engine
            .finish_withdraw_from_statement_in(conn, candidate_id, &statement.external_id)
            .await?;

        self.mark_statement_confirmed(conn, statement, finished.id)
            .await?;
        Ok(Some(finished))
    }

    /// Operator-driven resolution of an unknown statement, either against a
    /// chosen pending deposit or against a member (picking their best open
    /// deposit). Runs its own unit of work.
    pub async fn match_statement_manual(
        &self,
        pool: &PgPool,
        statement_id: Uuid,
        target: ManualMatchTarget,
        actor: &AuditActor,
    ) -> Result<BankTransaction, AppError> {
        let mut db_tx = pool.begin().await?;

        let statement = queries::lock_statement(&mut db_tx, statement_id)
            .await
            .map_err(|e| {
                AppError::not_found_or_db(e, format!("Statement {statement_id} not found"))
            })?;
        if statement.status != StatementStatus::Pending.as_str() {
            return Err(AppError::Conflict(format!(
                "Statement {} is {}, only pending statements can be matched",
                statement.id, statement.status
            )));
        }
        if statement.statement_type != StatementType::Deposit.as_str() {
            return Err(AppError::Validation(
                "Only deposit statements can be matched manually".to_string(),
            ));
        }
        let references =
            queries::count_transactions_for_statement(&mut db_tx, &statement.external_id).await?;
        if references > 0 {
            return Err(AppError::Conflict(format!(
                "Statement {} already settles a transaction",
                statement.id
            )));
        }

        let transaction_id = match target {
            ManualMatchTarget::Transaction(id) => id,
            ManualMatchTarget::User(user_id) => {
                let candidates = queries::find_user_pending_deposits(
                    &mut db_tx,
                    user_id,
                    &statement.amount,
                )
                .await?;
                pick_candidate(&candidates, &statement.amount, statement.transfer_at)
                    .map(|tx| tx.id)
                    .ok_or_else(|| {
                        AppError::NotFound(format!(
                            "No open deposit for user {user_id} fits this statement"
                        ))
                    })?
            }
        };

        let confirmed = self
            .engine
            .confirm_deposit_in(
                &mut db_tx,
                transaction_id,
                ConfirmDepositInput {
                    transfer_at: Some(statement.transfer_at),
                    bonus_amount: None,
                    paid_amount: Some(statement.amount.clone()),
                    statement_external_id: Some(statement.external_id.clone()),
                },
                actor,
            )
            .await?;

        self.mark_statement_confirmed(&mut db_tx, &statement, confirmed.id)
            .await?;
        db_tx.commit().await?;

        self.engine.maybe_notify(&confirmed).await;
        Ok(confirmed)
    }

    /// Park a pending statement the operator has judged unrelated to any
    /// member movement. Balance deltas already applied are left alone.
    pub async fn ignore_statement(
        &self,
        pool: &PgPool,
        statement_id: Uuid,
        actor: &AuditActor,
    ) -> Result<(), AppError> {
        let mut db_tx = pool.begin().await?;
        let statement = queries::lock_statement(&mut db_tx, statement_id)
            .await
            .map_err(|e| {
                AppError::not_found_or_db(e, format!("Statement {statement_id} not found"))
            })?;
        if statement.status != StatementStatus::Pending.as_str() {
            return Err(AppError::Conflict(format!(
                "Statement {} is {}, only pending statements can be ignored",
                statement.id, statement.status
            )));
        }
        let pre_image =
            serde_json::to_value(&statement).map_err(|e| AppError::Internal(e.to_string()))?;

        queries::update_statement_status(
            &mut db_tx,
            statement.id,
            StatementStatus::Ignored.as_str(),
        )
        .await?;
        queries::insert_statement_action(
            &mut db_tx,
            statement.id,
            "ignore",
            Some(&pre_image),
            Some(actor.id),
            Some(&actor.username),
        )
        .await?;
        db_tx.commit().await?;
        Ok(())
    }

    async fn mark_statement_confirmed(
        &self,
        conn: &mut PgConnection,
        statement: &BankStatement,
        transaction_id: Uuid,
    ) -> Result<(), AppError> {
        let pre_image =
            serde_json::to_value(statement).map_err(|e| AppError::Internal(e.to_string()))?;
        queries::update_statement_status(conn, statement.id, StatementStatus::Confirmed.as_str())
            .await?;
        queries::insert_statement_action(
            conn,
            statement.id,
            "match",
            Some(&pre_image),
            None,
            None,
        )
        .await?;
        tracing::info!(
            "statement {} matched to transaction {}",
            statement.external_id,
            transaction_id
        );
        Ok(())
    }
}

/// Deterministic candidate selection: smallest transfer-time distance to the
/// statement, then smallest amount gap, then earliest creation.
pub fn pick_candidate<'a>(
    candidates: &'a [BankTransaction],
    statement_amount: &BigDecimal,
    statement_transfer_at: DateTime<Utc>,
) -> Option<&'a BankTransaction> {
    let amount = money::round2(&statement_amount.clone().abs());
    candidates.iter().min_by(|a, b| {
        let time_a = (a.transfer_at - statement_transfer_at).num_seconds().abs();
        let time_b = (b.transfer_at - statement_transfer_at).num_seconds().abs();
        time_a
            .cmp(&time_b)
            .then_with(|| {
                let gap_a = (&amount - &a.credit_amount).abs();
                let gap_b = (&amount - &b.credit_amount).abs();
                gap_a.cmp(&gap_b)
            })
            .then_with(|| a.created_at.cmp(&b.created_at))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tx(
        amount: &str,
        transfer_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> BankTransaction {
        BankTransaction {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            member_code: "M1".to_string(),
            transfer_type: "deposit".to_string(),
            from_account_id: None,
            to_account_id: None,
            to_account_number: None,
            credit_amount: BigDecimal::from_str(amount).unwrap(),
            paid_amount: None,
            over_amount: money::zero(),
            bonus_amount: money::zero(),
            bank_charge_amount: money::zero(),
            before_amount: None,
            after_amount: None,
            statement_external_id: None,
            transfer_at,
            status: "pending".to_string(),
            status_detail: None,
            is_auto_credit: false,
            created_by_id: None,
            created_by_username: None,
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
            created_at,
            updated_at: created_at,
            deleted_at: None,
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_pick_prefers_closest_transfer_time() {
        let candidates = vec![
            tx("500.00", at(-600), at(0)),
            tx("500.00", at(-60), at(1)),
            tx("500.00", at(300), at(2)),
        ];
        let picked =
            pick_candidate(&candidates, &BigDecimal::from_str("500.00").unwrap(), at(0)).unwrap();
        assert_eq!(picked.transfer_at, at(-60));
    }

    #[test]
    fn test_pick_breaks_time_tie_on_amount_gap() {
        let candidates = vec![
            tx("450.00", at(-120), at(0)),
            tx("500.00", at(120), at(1)),
        ];
        let picked =
            pick_candidate(&candidates, &BigDecimal::from_str("500.00").unwrap(), at(0)).unwrap();
        assert_eq!(picked.credit_amount, BigDecimal::from_str("500.00").unwrap());
    }

    #[test]
    fn test_pick_breaks_full_tie_on_created_at() {
        let first = tx("500.00", at(60), at(0));
        let first_id = first.id;
        let candidates = vec![tx("500.00", at(-60), at(5)), first];
        let picked =
            pick_candidate(&candidates, &BigDecimal::from_str("500.00").unwrap(), at(0)).unwrap();
        assert_eq!(picked.id, first_id);
    }

    #[test]
    fn test_pick_handles_negative_statement_amount() {
        let candidates = vec![tx("500.00", at(0), at(0))];
        let picked =
            pick_candidate(&candidates, &BigDecimal::from_str("-500.00").unwrap(), at(0))
                .unwrap();
        assert_eq!(picked.credit_amount, BigDecimal::from_str("500.00").unwrap());
    }

    #[test]
    fn test_pick_empty_is_none() {
        assert!(pick_candidate(&[], &BigDecimal::from_str("500.00").unwrap(), at(0)).is_none());
    }
}
