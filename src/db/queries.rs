//! Repository functions. Soft-deleted rows are filtered with an explicit
//! `deleted_at IS NULL` in every query; functions that feed a balance
//! computation lock the row with `FOR UPDATE`.

use crate::db::models::{
    BankAccount, BankStatement, BankTransaction, MemberStatement, User, WebhookLog,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Result};
use uuid::Uuid;

// -- users ------------------------------------------------------------------

pub async fn get_user_by_member_code(pool: &PgPool, member_code: &str) -> Result<User> {
    sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE member_code = $1 AND deleted_at IS NULL",
    )
    .bind(member_code)
    .fetch_one(pool)
    .await
}

pub async fn get_user(pool: &PgPool, id: Uuid) -> Result<User> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 AND deleted_at IS NULL")
        .bind(id)
        .fetch_one(pool)
        .await
}

/// Row-lock the user before computing a new credit value. Two confirmations
/// racing on the same member serialise here.
pub async fn lock_user(conn: &mut PgConnection, id: Uuid) -> Result<User> {
    sqlx::query_as::<_, User>(
        "SELECT * FROM users WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
    )
    .bind(id)
    .fetch_one(conn)
    .await
}

pub async fn update_user_credit(
    conn: &mut PgConnection,
    id: Uuid,
    credit: &BigDecimal,
) -> Result<()> {
    sqlx::query("UPDATE users SET credit = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(credit)
        .execute(conn)
        .await?;
    Ok(())
}

// -- bank accounts ----------------------------------------------------------

pub async fn get_account(pool: &PgPool, id: Uuid) -> Result<BankAccount> {
    sqlx::query_as::<_, BankAccount>(
        "SELECT * FROM bank_accounts WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_one(pool)
    .await
}

pub async fn get_account_by_number(
    pool: &PgPool,
    bank_code: &str,
    account_number: &str,
) -> Result<Option<BankAccount>> {
    sqlx::query_as::<_, BankAccount>(
        "SELECT * FROM bank_accounts
         WHERE bank_code = $1 AND account_number = $2 AND deleted_at IS NULL",
    )
    .bind(bank_code)
    .bind(account_number)
    .fetch_optional(pool)
    .await
}

pub async fn lock_account(conn: &mut PgConnection, id: Uuid) -> Result<BankAccount> {
    sqlx::query_as::<_, BankAccount>(
        "SELECT * FROM bank_accounts WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
    )
    .bind(id)
    .fetch_one(conn)
    .await
}

pub async fn update_account_balance(
    conn: &mut PgConnection,
    id: Uuid,
    balance: &BigDecimal,
) -> Result<()> {
    sqlx::query("UPDATE bank_accounts SET balance = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(balance)
        .execute(conn)
        .await?;
    Ok(())
}

/// Pick the source account for an automatic withdrawal and lock it. Prefers
/// the designated main withdraw account, then priority order, then the
/// largest balance. An account tied to a priority tier is only eligible once
/// the member's finished deposits reach the tier's count and total floors.
pub async fn select_auto_withdraw_account(
    conn: &mut PgConnection,
    user_id: Uuid,
    amount: &BigDecimal,
    estimated_fee: &BigDecimal,
) -> Result<Option<BankAccount>> {
    sqlx::query_as::<_, BankAccount>(
        "SELECT a.* FROM bank_accounts a
         LEFT JOIN bank_account_priorities p
             ON p.id = a.priority_id AND p.deleted_at IS NULL
         WHERE a.deleted_at IS NULL
           AND a.status = 'active'
           AND a.auto_withdraw_flag
           AND $1 >= a.auto_withdraw_min AND $1 <= a.auto_withdraw_max
           AND a.balance >= $1 + $2
           AND (p.id IS NULL
                OR ((SELECT COUNT(*) FROM bank_transactions t
                     WHERE t.user_id = $3 AND t.transfer_type = 'deposit'
                       AND t.status = 'finished' AND t.deleted_at IS NULL)
                        >= p.min_deposit_count
                    AND (SELECT COALESCE(SUM(t.credit_amount), 0)
                         FROM bank_transactions t
                         WHERE t.user_id = $3 AND t.transfer_type = 'deposit'
                           AND t.status = 'finished' AND t.deleted_at IS NULL)
                        >= p.min_deposit_total))
         ORDER BY a.is_main_withdraw DESC,
                  COALESCE(p.priority_order, 2147483647) ASC,
                  a.balance DESC
         LIMIT 1
         FOR UPDATE OF a",
    )
    .bind(amount)
    .bind(estimated_fee)
    .bind(user_id)
    .fetch_optional(conn)
    .await
}

// -- bank statements --------------------------------------------------------

/// Insert a statement; the unique `(account_id, external_id)` constraint makes
/// webhook replays resolve to `None`.
pub async fn insert_statement(
    conn: &mut PgConnection,
    stmt: &BankStatement,
) -> Result<Option<BankStatement>> {
    sqlx::query_as::<_, BankStatement>(
        "INSERT INTO bank_statements
             (id, account_id, external_id, amount, statement_type,
              from_bank_code, from_account_number, transfer_at, status)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         ON CONFLICT (account_id, external_id) DO NOTHING
         RETURNING *",
    )
    .bind(stmt.id)
    .bind(stmt.account_id)
    .bind(&stmt.external_id)
    .bind(&stmt.amount)
    .bind(&stmt.statement_type)
    .bind(&stmt.from_bank_code)
    .bind(&stmt.from_account_number)
    .bind(stmt.transfer_at)
    .bind(&stmt.status)
    .fetch_optional(conn)
    .await
}

pub async fn lock_statement(conn: &mut PgConnection, id: Uuid) -> Result<BankStatement> {
    sqlx::query_as::<_, BankStatement>(
        "SELECT * FROM bank_statements WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
    )
    .bind(id)
    .fetch_one(conn)
    .await
}

pub async fn update_statement_status(
    conn: &mut PgConnection,
    id: Uuid,
    status: &str,
) -> Result<()> {
    sqlx::query("UPDATE bank_statements SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(status)
        .execute(conn)
        .await?;
    Ok(())
}

#[derive(Debug, Default)]
pub struct StatementFilter {
    pub account_id: Option<Uuid>,
    pub statement_type: Option<String>,
    pub status: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

fn push_statement_filters<'a>(qb: &mut QueryBuilder<'a, Postgres>, filter: &'a StatementFilter) {
    if let Some(account_id) = filter.account_id {
        qb.push(" AND account_id = ");
        qb.push_bind(account_id);
    }
    if let Some(statement_type) = &filter.statement_type {
        qb.push(" AND statement_type = ");
        qb.push_bind(statement_type.as_str());
    }
    if let Some(status) = &filter.status {
        qb.push(" AND status = ");
        qb.push_bind(status.as_str());
    }
    if let Some(from_date) = filter.from_date {
        qb.push(" AND transfer_at >= ");
        qb.push_bind(from_date);
    }
    if let Some(to_date) = filter.to_date {
        qb.push(" AND transfer_at <= ");
        qb.push_bind(to_date);
    }
    if let Some(search) = &filter.search {
        qb.push(" AND (external_id ILIKE ");
        qb.push_bind(format!("%{search}%"));
        qb.push(" OR from_account_number ILIKE ");
        qb.push_bind(format!("%{search}%"));
        qb.push(")");
    }
}

pub async fn list_statements(
    pool: &PgPool,
    filter: &StatementFilter,
) -> Result<(Vec<BankStatement>, i64)> {
    let mut qb = QueryBuilder::new(
        "SELECT * FROM bank_statements WHERE deleted_at IS NULL",
    );
    push_statement_filters(&mut qb, filter);
    qb.push(" ORDER BY transfer_at DESC LIMIT ");
    qb.push_bind(filter.limit);
    qb.push(" OFFSET ");
    qb.push_bind(filter.offset);

    let rows = qb
        .build_query_as::<BankStatement>()
        .fetch_all(pool)
        .await?;

    let mut count_qb = QueryBuilder::new(
        "SELECT COUNT(*) FROM bank_statements WHERE deleted_at IS NULL",
    );
    push_statement_filters(&mut count_qb, filter);
    let total: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    Ok((rows, total))
}

/// Pending deposit statements nobody has claimed: the operator's manual
/// resolution queue.
pub async fn list_unknown_statements(pool: &PgPool, limit: i64, offset: i64) -> Result<Vec<BankStatement>> {
    sqlx::query_as::<_, BankStatement>(
        "SELECT * FROM bank_statements
         WHERE deleted_at IS NULL AND status = 'pending' AND statement_type = 'deposit'
         ORDER BY transfer_at DESC LIMIT $1 OFFSET $2",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

// -- bank transactions ------------------------------------------------------

pub async fn insert_transaction(
    conn: &mut PgConnection,
    tx: &BankTransaction,
) -> Result<BankTransaction> {
    sqlx::query_as::<_, BankTransaction>(
        "INSERT INTO bank_transactions
             (id, user_id, member_code, transfer_type, from_account_id, to_account_id,
              to_account_number, credit_amount, paid_amount, over_amount, bonus_amount,
              bank_charge_amount, before_amount, after_amount, statement_external_id,
              transfer_at, status, status_detail, is_auto_credit,
              created_by_id, created_by_username)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                 $16, $17, $18, $19, $20, $21)
         RETURNING *",
    )
    .bind(tx.id)
    .bind(tx.user_id)
    .bind(&tx.member_code)
    .bind(&tx.transfer_type)
    .bind(tx.from_account_id)
    .bind(tx.to_account_id)
    .bind(&tx.to_account_number)
    .bind(&tx.credit_amount)
    .bind(&tx.paid_amount)
    .bind(&tx.over_amount)
    .bind(&tx.bonus_amount)
    .bind(&tx.bank_charge_amount)
    .bind(&tx.before_amount)
    .bind(&tx.after_amount)
    .bind(&tx.statement_external_id)
    .bind(tx.transfer_at)
    .bind(&tx.status)
    .bind(&tx.status_detail)
    .bind(tx.is_auto_credit)
    .bind(tx.created_by_id)
    .bind(&tx.created_by_username)
    .fetch_one(conn)
    .await
}

pub async fn get_transaction(pool: &PgPool, id: Uuid) -> Result<BankTransaction> {
    sqlx::query_as::<_, BankTransaction>(
        "SELECT * FROM bank_transactions WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_one(pool)
    .await
}

/// Read a transaction on the caller's connection without locking it, so
/// uncommitted rows from the same unit of work stay visible.
pub async fn get_transaction_in(conn: &mut PgConnection, id: Uuid) -> Result<BankTransaction> {
    sqlx::query_as::<_, BankTransaction>(
        "SELECT * FROM bank_transactions WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_one(conn)
    .await
}

pub async fn lock_transaction(conn: &mut PgConnection, id: Uuid) -> Result<BankTransaction> {
    sqlx::query_as::<_, BankTransaction>(
        "SELECT * FROM bank_transactions WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
    )
    .bind(id)
    .fetch_one(conn)
    .await
}

#[derive(Debug, Default)]
pub struct TransactionFilter {
    pub user_id: Option<Uuid>,
    pub transfer_type: Option<String>,
    pub status: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

fn push_transaction_filters<'a>(qb: &mut QueryBuilder<'a, Postgres>, filter: &'a TransactionFilter) {
    if let Some(user_id) = filter.user_id {
        qb.push(" AND user_id = ");
        qb.push_bind(user_id);
    }
    if let Some(transfer_type) = &filter.transfer_type {
        qb.push(" AND transfer_type = ");
        qb.push_bind(transfer_type.as_str());
    }
    if let Some(status) = &filter.status {
        qb.push(" AND status = ");
        qb.push_bind(status.as_str());
    }
    if let Some(from_date) = filter.from_date {
        qb.push(" AND transfer_at >= ");
        qb.push_bind(from_date);
    }
    if let Some(to_date) = filter.to_date {
        qb.push(" AND transfer_at <= ");
        qb.push_bind(to_date);
    }
}

pub async fn list_transactions(
    pool: &PgPool,
    filter: &TransactionFilter,
) -> Result<(Vec<BankTransaction>, i64)> {
    let mut qb = QueryBuilder::new(
        "SELECT * FROM bank_transactions WHERE deleted_at IS NULL",
    );
    push_transaction_filters(&mut qb, filter);
    qb.push(" ORDER BY created_at DESC LIMIT ");
    qb.push_bind(filter.limit);
    qb.push(" OFFSET ");
    qb.push_bind(filter.offset);

    let rows = qb
        .build_query_as::<BankTransaction>()
        .fetch_all(pool)
        .await?;

    let mut count_qb = QueryBuilder::new(
        "SELECT COUNT(*) FROM bank_transactions WHERE deleted_at IS NULL",
    );
    push_transaction_filters(&mut count_qb, filter);
    let total: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    Ok((rows, total))
}

/// Candidate pending deposits for a deposit-type statement, inside the
/// matching window. Members with a registered bank account must match the
/// payer details on the statement.
pub async fn find_deposit_candidates(
    conn: &mut PgConnection,
    account_id: Uuid,
    amount: &BigDecimal,
    from_bank_code: Option<&str>,
    from_account_number: Option<&str>,
    transfer_at: DateTime<Utc>,
    window_secs: i64,
) -> Result<Vec<BankTransaction>> {
    sqlx::query_as::<_, BankTransaction>(
        "SELECT t.* FROM bank_transactions t
         JOIN users u ON u.id = t.user_id AND u.deleted_at IS NULL
         WHERE t.deleted_at IS NULL
           AND t.transfer_type = 'deposit'
           AND t.status IN ('pending', 'pending_credit')
           AND t.to_account_id = $1
           AND t.credit_amount <= $2
           AND (u.bank_account_number IS NULL
                OR (u.bank_account_number = $3 AND u.bank_code = $4))
           AND ABS(EXTRACT(EPOCH FROM (t.transfer_at - $5))) <= $6
         ORDER BY t.created_at ASC",
    )
    .bind(account_id)
    .bind(amount)
    .bind(from_account_number)
    .bind(from_bank_code)
    .bind(transfer_at)
    .bind(window_secs as f64)
    .fetch_all(conn)
    .await
}

/// Open deposits for one member, used when an operator resolves an unknown
/// statement by member rather than by transaction.
pub async fn find_user_pending_deposits(
    conn: &mut PgConnection,
    user_id: Uuid,
    amount: &BigDecimal,
) -> Result<Vec<BankTransaction>> {
    sqlx::query_as::<_, BankTransaction>(
        "SELECT * FROM bank_transactions
         WHERE deleted_at IS NULL
           AND transfer_type = 'deposit'
           AND status IN ('pending', 'pending_credit')
           AND user_id = $1
           AND credit_amount <= $2
         ORDER BY created_at ASC",
    )
    .bind(user_id)
    .bind(amount)
    .fetch_all(conn)
    .await
}

/// Withdrawals awaiting transfer whose destination and amount match a
/// withdraw-type statement inside the window.
pub async fn find_withdraw_candidates(
    conn: &mut PgConnection,
    to_account_number: &str,
    amount: &BigDecimal,
    transfer_at: DateTime<Utc>,
    window_secs: i64,
) -> Result<Vec<BankTransaction>> {
    sqlx::query_as::<_, BankTransaction>(
        "SELECT * FROM bank_transactions
         WHERE deleted_at IS NULL
           AND transfer_type = 'withdraw'
           AND status = 'pending_transfer'
           AND to_account_number = $1
           AND credit_amount = $2
           AND ABS(EXTRACT(EPOCH FROM (transfer_at - $3))) <= $4
         ORDER BY created_at ASC",
    )
    .bind(to_account_number)
    .bind(amount)
    .bind(transfer_at)
    .bind(window_secs as f64)
    .fetch_all(conn)
    .await
}

/// A confirmed statement must be referenced by at most one transaction.
pub async fn count_transactions_for_statement(
    conn: &mut PgConnection,
    statement_external_id: &str,
) -> Result<i64> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM bank_transactions
         WHERE statement_external_id = $1 AND deleted_at IS NULL",
    )
    .bind(statement_external_id)
    .fetch_one(conn)
    .await
}

// -- member statements ------------------------------------------------------

pub async fn insert_member_statement(
    conn: &mut PgConnection,
    user_id: Uuid,
    statement_type: &str,
    before_balance: &BigDecimal,
    amount: &BigDecimal,
    after_balance: &BigDecimal,
    info: Option<&str>,
    transfer_at: DateTime<Utc>,
) -> Result<MemberStatement> {
    sqlx::query_as::<_, MemberStatement>(
        "INSERT INTO member_statements
             (user_id, statement_type, before_balance, amount, after_balance, info, transfer_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING *",
    )
    .bind(user_id)
    .bind(statement_type)
    .bind(before_balance)
    .bind(amount)
    .bind(after_balance)
    .bind(info)
    .bind(transfer_at)
    .fetch_one(conn)
    .await
}

pub async fn member_statements_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<MemberStatement>> {
    sqlx::query_as::<_, MemberStatement>(
        "SELECT * FROM member_statements
         WHERE user_id = $1 AND deleted_at IS NULL ORDER BY id ASC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

// -- action rows ------------------------------------------------------------

pub async fn insert_transaction_action(
    conn: &mut PgConnection,
    transaction_id: Uuid,
    action: &str,
    pre_image: Option<&serde_json::Value>,
    actor_id: Option<Uuid>,
    actor_username: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO bank_transaction_actions
             (transaction_id, action, pre_image, actor_id, actor_username)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(transaction_id)
    .bind(action)
    .bind(pre_image)
    .bind(actor_id)
    .bind(actor_username)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn insert_statement_action(
    conn: &mut PgConnection,
    statement_id: Uuid,
    action: &str,
    pre_image: Option<&serde_json::Value>,
    actor_id: Option<Uuid>,
    actor_username: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO bank_statement_actions
             (statement_id, action, pre_image, actor_id, actor_username)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(statement_id)
    .bind(action)
    .bind(pre_image)
    .bind(actor_id)
    .bind(actor_username)
    .execute(conn)
    .await?;
    Ok(())
}

// -- webhook logs -----------------------------------------------------------

pub async fn insert_webhook_log(
    pool: &PgPool,
    external_id: Option<&str>,
    raw_body: &str,
    payload: Option<&serde_json::Value>,
) -> Result<WebhookLog> {
    sqlx::query_as::<_, WebhookLog>(
        "INSERT INTO webhook_logs (external_id, raw_body, payload, status)
         VALUES ($1, $2, $3, 'received')
         RETURNING *",
    )
    .bind(external_id)
    .bind(raw_body)
    .bind(payload)
    .fetch_one(pool)
    .await
}

pub async fn update_webhook_log(
    pool: &PgPool,
    id: Uuid,
    status: &str,
    error_detail: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "UPDATE webhook_logs SET status = $2, error_detail = $3, updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .bind(status)
    .bind(error_detail)
    .execute(pool)
    .await?;
    Ok(())
}

// -- bot account configs ----------------------------------------------------

pub async fn get_config_value(pool: &PgPool, key: &str) -> Result<Option<String>> {
    sqlx::query_scalar::<_, String>(
        "SELECT config_value FROM bot_account_configs
         WHERE config_key = $1 AND deleted_at IS NULL",
    )
    .bind(key)
    .fetch_optional(pool)
    .await
}

pub async fn set_config_value(pool: &PgPool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO bot_account_configs (config_key, config_value)
         VALUES ($1, $2)
         ON CONFLICT (config_key)
         DO UPDATE SET config_value = EXCLUDED.config_value, updated_at = NOW()",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}
