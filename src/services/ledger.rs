//! Ledger primitives shared by every balance-affecting operation.
//!
//! All helpers expect to run inside the caller's unit of work and lock the
//! affected row before computing the new value. For a given user the
//! member-statement rows ordered by id form an unbroken before/after chain
//! whose head equals the denormalised `users.credit`.

use crate::db::models::MemberStatement;
use crate::db::queries;
use crate::domain::money;
use crate::error::AppError;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

/// One ledger line to append for a member. Amount is signed.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub statement_type: String,
    pub amount: BigDecimal,
    pub info: Option<String>,
    pub transfer_at: DateTime<Utc>,
}

/// Result of posting entries: the wallet balance before the first entry and
/// after the last.
#[derive(Debug)]
pub struct PostedBalance {
    pub before: BigDecimal,
    pub after: BigDecimal,
    pub statements: Vec<MemberStatement>,
}

/// Lock the user row, append one member statement per entry keeping the
/// chain intact, and update the denormalised credit. Fails with Conflict if
/// any intermediate balance would go negative.
pub async fn post_member_entries(
    conn: &mut PgConnection,
    user_id: Uuid,
    entries: &[LedgerEntry],
) -> Result<PostedBalance, AppError> {
    let user = queries::lock_user(conn, user_id)
        .await
        .map_err(|e| AppError::not_found_or_db(e, format!("User {user_id} not found")))?;

    let before = money::round2(&user.credit);
    let mut running = before.clone();
    let mut statements = Vec::with_capacity(entries.len());

    for entry in entries {
        let amount = money::round2(&entry.amount);
        let next = money::round2(&(&running + &amount));
        if money::is_negative(&next) {
            return Err(AppError::Conflict(format!(
                "Insufficient credit: balance {running}, requested {amount}"
            )));
        }

        let row = queries::insert_member_statement(
            conn,
            user_id,
            &entry.statement_type,
            &running,
            &amount,
            &next,
            entry.info.as_deref(),
            entry.transfer_at,
        )
        .await?;

        statements.push(row);
        running = next;
    }

    queries::update_user_credit(conn, user_id, &running).await?;

    Ok(PostedBalance {
        before,
        after: running,
        statements,
    })
}

/// Lock the account row and apply a signed delta to its balance. Returns the
/// new balance.
pub async fn apply_account_delta(
    conn: &mut PgConnection,
    account_id: Uuid,
    delta: &BigDecimal,
) -> Result<BigDecimal, AppError> {
    let account = queries::lock_account(conn, account_id)
        .await
        .map_err(|e| AppError::not_found_or_db(e, format!("Bank account {account_id} not found")))?;

    let balance = money::round2(&(&account.balance + delta));
    queries::update_account_balance(conn, account_id, &balance).await?;
    Ok(balance)
}
