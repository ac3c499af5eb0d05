mod common;

use banking_core::error::AppError;
use banking_core::services::engine::CreateCreditBackInput;
use common::{actor, dec, engine, seed_user, user_credit};
use sqlx::PgPool;

#[sqlx::test]
async fn test_credit_back_debits_member(pool: PgPool) {
    let user = seed_user(&pool, "M700", "800.00", None).await;
    let engine = engine(&pool);
    let actor = actor();

    let tx = engine
        .create_credit_back(
            CreateCreditBackInput {
                member_code: "M700".to_string(),
                amount: dec("300"),
                reason: Some("promotion clawback".to_string()),
            },
            &actor,
        )
        .await
        .unwrap();

    assert_eq!(tx.transfer_type, "getcreditback");
    assert_eq!(tx.status, "finished");
    assert_eq!(tx.before_amount, Some(dec("800.00")));
    assert_eq!(tx.after_amount, Some(dec("500.00")));
    assert_eq!(user_credit(&pool, user.id).await, dec("500.00"));

    let (stmt_type, amount): (String, bigdecimal::BigDecimal) = sqlx::query_as(
        "SELECT statement_type, amount FROM member_statements WHERE user_id = $1",
    )
    .bind(user.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(stmt_type, "getcreditback");
    assert_eq!(amount, dec("-300.00"));
}

#[sqlx::test]
async fn test_credit_back_exceeding_balance_is_rejected(pool: PgPool) {
    let user = seed_user(&pool, "M701", "100.00", None).await;
    let engine = engine(&pool);

    let err = engine
        .create_credit_back(
            CreateCreditBackInput {
                member_code: "M701".to_string(),
                amount: dec("300"),
                reason: None,
            },
            &actor(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(user_credit(&pool, user.id).await, dec("100.00"));
}

#[sqlx::test]
async fn test_removed_credit_back_restores_member(pool: PgPool) {
    let user = seed_user(&pool, "M702", "800.00", None).await;
    let engine = engine(&pool);
    let actor = actor();

    let tx = engine
        .create_credit_back(
            CreateCreditBackInput {
                member_code: "M702".to_string(),
                amount: dec("300"),
                reason: None,
            },
            &actor,
        )
        .await
        .unwrap();
    assert_eq!(user_credit(&pool, user.id).await, dec("500.00"));

    let removed = engine.remove_transaction(tx.id, &actor).await.unwrap();
    assert_eq!(removed.status, "removed");
    assert_eq!(user_credit(&pool, user.id).await, dec("800.00"));
}
