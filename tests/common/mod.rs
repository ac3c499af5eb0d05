//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use banking_core::clock::SystemClock;
use banking_core::db::models::{BankAccount, User};
use banking_core::domain::AuditActor;
use banking_core::gateway::client::BankGatewayClient;
use banking_core::services::engine::TransactionEngine;
use banking_core::services::ingestor::StatementIngestor;
use banking_core::services::matcher::StatementMatcher;
use banking_core::services::notifier::Notifier;
use bigdecimal::BigDecimal;
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

pub fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

pub fn actor() -> AuditActor {
    AuditActor::new(Uuid::new_v4(), "test-operator")
}

pub fn engine(pool: &PgPool) -> TransactionEngine {
    TransactionEngine::new(pool.clone(), Arc::new(SystemClock), Notifier::new(16))
}

/// Full ingest stack against a gateway nobody listens on; recheck tests
/// point the client at a mock server instead.
pub fn ingestor(pool: &PgPool) -> StatementIngestor {
    let engine = engine(pool);
    let matcher = StatementMatcher::new(engine.clone());
    let gateway = BankGatewayClient::new("http://127.0.0.1:9".to_string(), "test-key".to_string());
    StatementIngestor::new(pool.clone(), engine, matcher, gateway)
}

pub async fn seed_user(
    pool: &PgPool,
    member_code: &str,
    credit: &str,
    bank: Option<(&str, &str)>,
) -> User {
    let (bank_code, bank_account_number) = match bank {
        Some((code, number)) => (Some(code), Some(number)),
        None => (None, None),
    };
    sqlx::query_as::<_, User>(
        "INSERT INTO users (member_code, username, credit, bank_code, bank_account_number)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING *",
    )
    .bind(member_code)
    .bind(format!("user-{member_code}"))
    .bind(dec(credit))
    .bind(bank_code)
    .bind(bank_account_number)
    .fetch_one(pool)
    .await
    .unwrap()
}

pub async fn seed_account(
    pool: &PgPool,
    bank_code: &str,
    account_number: &str,
    balance: &str,
) -> BankAccount {
    sqlx::query_as::<_, BankAccount>(
        "INSERT INTO bank_accounts (bank_code, account_number, display_name, balance)
         VALUES ($1, $2, $3, $4)
         RETURNING *",
    )
    .bind(bank_code)
    .bind(account_number)
    .bind(format!("account {account_number}"))
    .bind(dec(balance))
    .fetch_one(pool)
    .await
    .unwrap()
}

pub async fn user_credit(pool: &PgPool, user_id: Uuid) -> BigDecimal {
    sqlx::query_scalar("SELECT credit FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn account_balance(pool: &PgPool, account_id: Uuid) -> BigDecimal {
    sqlx::query_scalar("SELECT balance FROM bank_accounts WHERE id = $1")
        .bind(account_id)
        .fetch_one(pool)
        .await
        .unwrap()
}
