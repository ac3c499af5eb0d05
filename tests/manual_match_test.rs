mod common;

use banking_core::error::AppError;
use banking_core::services::engine::CreateDepositInput;
use banking_core::services::ingestor::WebhookStatementPayload;
use banking_core::services::matcher::{ManualMatchTarget, StatementMatcher};
use chrono::{Duration, Utc};
use common::{actor, dec, engine, ingestor, seed_account, seed_user, user_credit};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

async fn ingest_unmatched_statement(pool: &PgPool, account_number: &str, amount: &str) -> Uuid {
    let body = json!({ "newStatementList": [{
        "externalId": format!("manual-{account_number}"),
        "bankCode": "004",
        "accountNumber": account_number,
        "amount": amount,
        // Far outside the matching window so nothing settles automatically.
        "transferAt": Utc::now() - Duration::hours(6),
    }]})
    .to_string();
    let parsed: WebhookStatementPayload = serde_json::from_str(&body).unwrap();

    let report = ingestor(pool).ingest(&body, &parsed).await.unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.matched, 0);

    sqlx::query_scalar("SELECT id FROM bank_statements WHERE external_id = $1")
        .bind(format!("manual-{account_number}"))
        .fetch_one(pool)
        .await
        .unwrap()
}

#[sqlx::test]
async fn test_operator_resolves_unknown_statement(pool: PgPool) {
    let user = seed_user(&pool, "M600", "0.00", None).await;
    let account = seed_account(&pool, "004", "333-100", "0.00").await;
    let engine = engine(&pool);
    let matcher = StatementMatcher::new(engine.clone());
    let actor = actor();

    let tx = engine
        .create_deposit(
            CreateDepositInput {
                member_code: "M600".to_string(),
                amount: dec("250"),
                to_account_id: account.id,
                is_auto_credit: false,
            },
            &actor,
        )
        .await
        .unwrap();

    let statement_id = ingest_unmatched_statement(&pool, "333-100", "250.00").await;

    let confirmed = matcher
        .match_statement_manual(&pool, statement_id, ManualMatchTarget::Transaction(tx.id), &actor)
        .await
        .unwrap();
    assert_eq!(confirmed.status, "finished");
    assert_eq!(
        confirmed.statement_external_id.as_deref(),
        Some("manual-333-100")
    );
    assert_eq!(user_credit(&pool, user.id).await, dec("250.00"));

    let stmt_status: String =
        sqlx::query_scalar("SELECT status FROM bank_statements WHERE id = $1")
            .bind(statement_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(stmt_status, "confirmed");
}

#[sqlx::test]
async fn test_statement_settles_at_most_one_transaction(pool: PgPool) {
    seed_user(&pool, "M601", "0.00", None).await;
    let account = seed_account(&pool, "004", "333-101", "0.00").await;
    let engine = engine(&pool);
    let matcher = StatementMatcher::new(engine.clone());
    let actor = actor();

    let first = engine
        .create_deposit(
            CreateDepositInput {
                member_code: "M601".to_string(),
                amount: dec("250"),
                to_account_id: account.id,
                is_auto_credit: false,
            },
            &actor,
        )
        .await
        .unwrap();
    let second = engine
        .create_deposit(
            CreateDepositInput {
                member_code: "M601".to_string(),
                amount: dec("250"),
                to_account_id: account.id,
                is_auto_credit: false,
            },
            &actor,
        )
        .await
        .unwrap();

    let statement_id = ingest_unmatched_statement(&pool, "333-101", "250.00").await;

    matcher
        .match_statement_manual(
            &pool,
            statement_id,
            ManualMatchTarget::Transaction(first.id),
            &actor,
        )
        .await
        .unwrap();

    let err = matcher
        .match_statement_manual(
            &pool,
            statement_id,
            ManualMatchTarget::Transaction(second.id),
            &actor,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[sqlx::test]
async fn test_overpaid_manual_match_records_surplus(pool: PgPool) {
    let user = seed_user(&pool, "M602", "0.00", None).await;
    let account = seed_account(&pool, "004", "333-102", "0.00").await;
    let engine = engine(&pool);
    let matcher = StatementMatcher::new(engine.clone());
    let actor = actor();

    let tx = engine
        .create_deposit(
            CreateDepositInput {
                member_code: "M602".to_string(),
                amount: dec("250"),
                to_account_id: account.id,
                is_auto_credit: false,
            },
            &actor,
        )
        .await
        .unwrap();

    let statement_id = ingest_unmatched_statement(&pool, "333-102", "300.00").await;

    let confirmed = matcher
        .match_statement_manual(&pool, statement_id, ManualMatchTarget::Transaction(tx.id), &actor)
        .await
        .unwrap();
    assert_eq!(confirmed.over_amount, dec("50.00"));
    assert_eq!(user_credit(&pool, user.id).await, dec("250.00"));
}

#[sqlx::test]
async fn test_user_target_picks_fitting_deposit(pool: PgPool) {
    let user = seed_user(&pool, "M603", "0.00", None).await;
    let account = seed_account(&pool, "004", "333-103", "0.00").await;
    let engine = engine(&pool);
    let matcher = StatementMatcher::new(engine.clone());
    let actor = actor();

    // Two open deposits; only the smaller one fits under the statement amount.
    engine
        .create_deposit(
            CreateDepositInput {
                member_code: "M603".to_string(),
                amount: dec("250"),
                to_account_id: account.id,
                is_auto_credit: false,
            },
            &actor,
        )
        .await
        .unwrap();
    engine
        .create_deposit(
            CreateDepositInput {
                member_code: "M603".to_string(),
                amount: dec("400"),
                to_account_id: account.id,
                is_auto_credit: false,
            },
            &actor,
        )
        .await
        .unwrap();

    let statement_id = ingest_unmatched_statement(&pool, "333-103", "300.00").await;

    let confirmed = matcher
        .match_statement_manual(&pool, statement_id, ManualMatchTarget::User(user.id), &actor)
        .await
        .unwrap();
    assert_eq!(confirmed.credit_amount, dec("250.00"));
    assert_eq!(confirmed.over_amount, dec("50.00"));
    assert_eq!(user_credit(&pool, user.id).await, dec("250.00"));
}

#[sqlx::test]
async fn test_user_target_with_no_open_deposit_is_not_found(pool: PgPool) {
    let user = seed_user(&pool, "M604", "0.00", None).await;
    seed_account(&pool, "004", "333-104", "0.00").await;
    let engine = engine(&pool);
    let matcher = StatementMatcher::new(engine);
    let actor = actor();

    let statement_id = ingest_unmatched_statement(&pool, "333-104", "300.00").await;

    let err = matcher
        .match_statement_manual(&pool, statement_id, ManualMatchTarget::User(user.id), &actor)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[sqlx::test]
async fn test_ignored_statement_leaves_matching(pool: PgPool) {
    seed_account(&pool, "004", "333-105", "0.00").await;
    let engine = engine(&pool);
    let matcher = StatementMatcher::new(engine);
    let actor = actor();

    let statement_id = ingest_unmatched_statement(&pool, "333-105", "120.00").await;

    matcher
        .ignore_statement(&pool, statement_id, &actor)
        .await
        .unwrap();

    let status: String = sqlx::query_scalar("SELECT status FROM bank_statements WHERE id = $1")
        .bind(statement_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "ignored");

    // Only pending statements can be ignored or matched.
    let err = matcher
        .ignore_statement(&pool, statement_id, &actor)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}
