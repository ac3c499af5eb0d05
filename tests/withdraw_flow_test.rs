mod common;

use banking_core::error::AppError;
use banking_core::services::engine::{
    ConfirmCreditWithdrawInput, ConfirmDepositInput, ConfirmTransferWithdrawInput,
    CreateWithdrawInput,
};
use banking_core::services::ingestor::WebhookStatementPayload;
use chrono::Utc;
use common::{account_balance, actor, dec, engine, ingestor, seed_account, seed_user, user_credit};
use serde_json::json;
use sqlx::PgPool;

#[sqlx::test]
async fn test_withdraw_debits_wallet_immediately(pool: PgPool) {
    let user = seed_user(&pool, "M200", "1000.00", Some(("014", "999-888"))).await;
    let engine = engine(&pool);
    let actor = actor();

    let tx = engine
        .create_withdraw(
            CreateWithdrawInput {
                member_code: "M200".to_string(),
                amount: dec("400"),
            },
            &actor,
        )
        .await
        .unwrap();

    assert_eq!(tx.status, "pending_credit");
    assert_eq!(tx.to_account_number.as_deref(), Some("999-888"));
    assert_eq!(user_credit(&pool, user.id).await, dec("600.00"));
}

#[sqlx::test]
async fn test_withdraw_rejected_when_credit_insufficient(pool: PgPool) {
    let user = seed_user(&pool, "M201", "100.00", Some(("014", "999-889"))).await;
    let engine = engine(&pool);
    let actor = actor();

    let err = engine
        .create_withdraw(
            CreateWithdrawInput {
                member_code: "M201".to_string(),
                amount: dec("400"),
            },
            &actor,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    // Nothing was written.
    assert_eq!(user_credit(&pool, user.id).await, dec("100.00"));
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bank_transactions")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[sqlx::test]
async fn test_cancel_withdraw_refunds_member(pool: PgPool) {
    let user = seed_user(&pool, "M202", "1000.00", Some(("014", "999-890"))).await;
    let engine = engine(&pool);
    let actor = actor();

    let tx = engine
        .create_withdraw(
            CreateWithdrawInput {
                member_code: "M202".to_string(),
                amount: dec("400"),
            },
            &actor,
        )
        .await
        .unwrap();
    assert_eq!(user_credit(&pool, user.id).await, dec("600.00"));

    let canceled = engine
        .cancel_withdraw(tx.id, "member changed their mind", &actor)
        .await
        .unwrap();
    assert_eq!(canceled.status, "canceled");
    assert_eq!(user_credit(&pool, user.id).await, dec("1000.00"));
}

#[sqlx::test]
async fn test_manual_withdraw_happy_path_debits_source_account(pool: PgPool) {
    let user = seed_user(&pool, "M203", "1000.00", Some(("014", "999-891"))).await;
    let account = seed_account(&pool, "004", "111-300", "5000.00").await;
    let engine = engine(&pool);
    let actor = actor();

    let tx = engine
        .create_withdraw(
            CreateWithdrawInput {
                member_code: "M203".to_string(),
                amount: dec("400"),
            },
            &actor,
        )
        .await
        .unwrap();

    let tx = engine
        .confirm_credit_withdraw(
            tx.id,
            ConfirmCreditWithdrawInput {
                from_account_id: account.id,
                bank_charge_amount: Some(dec("10")),
            },
            &actor,
        )
        .await
        .unwrap();
    assert_eq!(tx.status, "pending_transfer");
    assert_eq!(tx.from_account_id, Some(account.id));
    assert_eq!(tx.bank_charge_amount, dec("10.00"));

    let finished = engine
        .confirm_transfer_withdraw(tx.id, ConfirmTransferWithdrawInput::default(), &actor)
        .await
        .unwrap();
    assert_eq!(finished.status, "finished");
    // amount + charge leave the operator account.
    assert_eq!(account_balance(&pool, account.id).await, dec("4590.00"));
    assert_eq!(user_credit(&pool, user.id).await, dec("600.00"));
}

#[sqlx::test]
async fn test_transfer_confirm_requires_pending_transfer(pool: PgPool) {
    seed_user(&pool, "M204", "1000.00", Some(("014", "999-892"))).await;
    let engine = engine(&pool);
    let actor = actor();

    let tx = engine
        .create_withdraw(
            CreateWithdrawInput {
                member_code: "M204".to_string(),
                amount: dec("400"),
            },
            &actor,
        )
        .await
        .unwrap();

    // Still pending_credit: no source account assigned yet.
    let err = engine
        .confirm_transfer_withdraw(tx.id, ConfirmTransferWithdrawInput::default(), &actor)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[sqlx::test]
async fn test_failed_withdraw_keeps_wallet_debited(pool: PgPool) {
    let user = seed_user(&pool, "M205", "1000.00", Some(("014", "999-893"))).await;
    let account = seed_account(&pool, "004", "111-301", "5000.00").await;
    let engine = engine(&pool);
    let actor = actor();

    let tx = engine
        .create_withdraw(
            CreateWithdrawInput {
                member_code: "M205".to_string(),
                amount: dec("400"),
            },
            &actor,
        )
        .await
        .unwrap();
    engine
        .confirm_credit_withdraw(
            tx.id,
            ConfirmCreditWithdrawInput {
                from_account_id: account.id,
                bank_charge_amount: None,
            },
            &actor,
        )
        .await
        .unwrap();

    let failed = engine
        .fail_withdraw(tx.id, "gateway rejected transfer: insufficient funds")
        .await
        .unwrap();
    assert_eq!(failed.status, "failed");
    assert!(failed.status_detail.unwrap().contains("insufficient funds"));

    // No automatic refund and no account debit: the operator resolves it.
    assert_eq!(user_credit(&pool, user.id).await, dec("600.00"));
    assert_eq!(account_balance(&pool, account.id).await, dec("5000.00"));

    // Failed is terminal.
    let err = engine
        .confirm_transfer_withdraw(tx.id, ConfirmTransferWithdrawInput::default(), &actor)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[sqlx::test]
async fn test_withdraw_cannot_be_confirmed_as_deposit(pool: PgPool) {
    let user = seed_user(&pool, "M206", "1000.00", Some(("014", "999-894"))).await;
    let engine = engine(&pool);
    let actor = actor();

    let tx = engine
        .create_withdraw(
            CreateWithdrawInput {
                member_code: "M206".to_string(),
                amount: dec("400"),
            },
            &actor,
        )
        .await
        .unwrap();
    assert_eq!(user_credit(&pool, user.id).await, dec("600.00"));

    // A withdraw sits in pending_credit just like an auto-credit deposit;
    // pushing it down the deposit pipeline must not refund the member.
    let err = engine
        .confirm_deposit(tx.id, ConfirmDepositInput::default(), &actor)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let status: String = sqlx::query_scalar("SELECT status FROM bank_transactions WHERE id = $1")
        .bind(tx.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "pending_credit");
    assert_eq!(user_credit(&pool, user.id).await, dec("600.00"));
}

#[sqlx::test]
async fn test_statement_and_manual_confirm_finish_once(pool: PgPool) {
    let user = seed_user(&pool, "M207", "1000.00", Some(("014", "999-895"))).await;
    let account = seed_account(&pool, "004", "111-302", "5000.00").await;
    let engine = engine(&pool);
    let ingestor = ingestor(&pool);
    let actor = actor();

    let tx = engine
        .create_withdraw(
            CreateWithdrawInput {
                member_code: "M207".to_string(),
                amount: dec("400"),
            },
            &actor,
        )
        .await
        .unwrap();
    engine
        .confirm_credit_withdraw(
            tx.id,
            ConfirmCreditWithdrawInput {
                from_account_id: account.id,
                bank_charge_amount: None,
            },
            &actor,
        )
        .await
        .unwrap();

    let body = json!({ "newStatementList": [{
        "externalId": "race-1",
        "bankCode": "004",
        "accountNumber": "111-302",
        "amount": "-400.00",
        "transferAt": Utc::now(),
    }]})
    .to_string();
    let parsed: WebhookStatementPayload = serde_json::from_str(&body).unwrap();

    // The statement webhook and the operator confirm the same withdrawal at
    // the same time; the loser sees a state conflict, never a second finish.
    let (ingested, confirmed) = tokio::join!(
        ingestor.ingest(&body, &parsed),
        engine.confirm_transfer_withdraw(tx.id, ConfirmTransferWithdrawInput::default(), &actor),
    );
    ingested.unwrap();
    if let Err(e) = confirmed {
        assert!(matches!(e, AppError::Conflict(_)));
    }

    let status: String = sqlx::query_scalar("SELECT status FROM bank_transactions WHERE id = $1")
        .bind(tx.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "finished");
    assert_eq!(user_credit(&pool, user.id).await, dec("600.00"));

    // The statement delta always lands; the manual confirm debits only when
    // it won the race and the statement stayed unmatched.
    let balance = account_balance(&pool, account.id).await;
    assert!(
        balance == dec("4600.00") || balance == dec("4200.00"),
        "unexpected balance {balance}"
    );
}
