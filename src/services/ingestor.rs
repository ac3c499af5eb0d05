//! Webhook statement ingestion.
//!
//! Each incoming statement is handled independently: resolving the operator
//! account, the idempotent insert, the account balance delta and the matching
//! attempt share one unit of work per statement, so a replayed webhook or a
//! mid-batch crash never double-applies money. One entry failing never stops
//! the rest of the batch.

use crate::db::models::{BankStatement, BankTransaction};
use crate::db::queries;
use crate::domain::money;
use crate::domain::{StatementStatus, StatementType, WebhookLogStatus};
use crate::error::AppError;
use crate::gateway::client::BankGatewayClient;
use crate::services::engine::TransactionEngine;
use crate::services::ledger;
use crate::services::matcher::StatementMatcher;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// One statement as delivered by the automation service. The operator account
/// is identified by bank code and account number; `amount` is signed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingStatement {
    pub external_id: String,
    pub bank_code: String,
    pub account_number: String,
    pub amount: BigDecimal,
    #[serde(default)]
    pub from_bank_code: Option<String>,
    #[serde(default)]
    pub from_account_number: Option<String>,
    pub transfer_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookStatementPayload {
    pub new_statement_list: Vec<IncomingStatement>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub received: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub matched: usize,
    pub orphaned: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct StatementIngestor {
    pool: PgPool,
    engine: TransactionEngine,
    matcher: StatementMatcher,
    gateway: BankGatewayClient,
}

impl StatementIngestor {
    pub fn new(
        pool: PgPool,
        engine: TransactionEngine,
        matcher: StatementMatcher,
        gateway: BankGatewayClient,
    ) -> Self {
        Self {
            pool,
            engine,
            matcher,
            gateway,
        }
    }

    /// Process a webhook delivery. The raw body is logged before any work so
    /// a payload the ingestor chokes on is never lost.
    pub async fn ingest(
        &self,
        raw_body: &str,
        payload: &WebhookStatementPayload,
    ) -> Result<IngestReport, AppError> {
        let payload_json = serde_json::to_value(&payload.new_statement_list).ok();
        let log = queries::insert_webhook_log(
            &self.pool,
            payload.new_statement_list.first().map(|s| s.external_id.as_str()),
            raw_body,
            payload_json.as_ref(),
        )
        .await?;

        let (report, errors) = self.ingest_entries(&payload.new_statement_list).await;

        let (status, detail) = if report.failed > 0 {
            (WebhookLogStatus::Failed, Some(errors.join("; ")))
        } else if report.inserted == 0 && report.duplicates > 0 {
            (WebhookLogStatus::Duplicate, None)
        } else if report.inserted == 0 && report.orphaned > 0 {
            (WebhookLogStatus::Orphan, None)
        } else {
            (WebhookLogStatus::Processed, None)
        };
        queries::update_webhook_log(&self.pool, log.id, status.as_str(), detail.as_deref())
            .await?;

        Ok(report)
    }

    /// Re-pull statements for an operator account from the automation service
    /// and run them through the normal ingest path, optionally narrowed to one
    /// missed statement. Idempotent by the same unique constraint the webhook
    /// relies on.
    pub async fn recheck(
        &self,
        account_id: Uuid,
        external_id: Option<&str>,
        of_date_time: DateTime<Utc>,
    ) -> Result<IngestReport, AppError> {
        let account = queries::get_account(&self.pool, account_id)
            .await
            .map_err(|e| {
                AppError::not_found_or_db(e, format!("Bank account {account_id} not found"))
            })?;

        let external = self
            .gateway
            .list_statements(&account.account_number, of_date_time, 1, 100)
            .await?;

        let entries: Vec<IncomingStatement> = external
            .into_iter()
            .filter(|s| external_id.map_or(true, |wanted| s.id == wanted))
            .map(|s| IncomingStatement {
                external_id: s.id,
                bank_code: account.bank_code.clone(),
                account_number: account.account_number.clone(),
                amount: s.amount,
                from_bank_code: s.from_bank_code,
                from_account_number: s.from_account_number,
                transfer_at: s.transfer_at,
            })
            .collect();

        let (report, errors) = self.ingest_entries(&entries).await;
        if !errors.is_empty() {
            tracing::warn!(
                "recheck for {} finished with errors: {}",
                account.account_number,
                errors.join("; ")
            );
        }
        Ok(report)
    }

    async fn ingest_entries(&self, entries: &[IncomingStatement]) -> (IngestReport, Vec<String>) {
        let mut report = IngestReport {
            received: entries.len(),
            ..Default::default()
        };
        let mut errors = Vec::new();

        for entry in entries {
            match self.ingest_one(entry).await {
                Ok(IngestOutcome::Inserted(matched)) => {
                    report.inserted += 1;
                    if let Some(tx) = matched {
                        report.matched += 1;
                        self.engine.maybe_notify(&tx).await;
                    }
                }
                Ok(IngestOutcome::Duplicate) => {
                    report.duplicates += 1;
                    tracing::debug!("statement {} already ingested", entry.external_id);
                }
                Ok(IngestOutcome::Orphan) => {
                    report.orphaned += 1;
                    tracing::warn!(
                        "statement {} references unknown account {}/{}",
                        entry.external_id,
                        entry.bank_code,
                        entry.account_number
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!("statement {} failed to ingest: {}", entry.external_id, e);
                    errors.push(format!("{}: {}", entry.external_id, e));
                }
            }
        }

        (report, errors)
    }

    async fn ingest_one(&self, entry: &IncomingStatement) -> Result<IngestOutcome, AppError> {
        if entry.amount == money::zero() {
            return Err(AppError::Validation(format!(
                "statement {} has zero amount",
                entry.external_id
            )));
        }

        let Some(account) =
            queries::get_account_by_number(&self.pool, &entry.bank_code, &entry.account_number)
                .await?
        else {
            return Ok(IngestOutcome::Orphan);
        };

        let statement_type = if money::is_positive(&entry.amount) {
            StatementType::Deposit
        } else {
            StatementType::Withdraw
        };

        let mut db_tx = self.pool.begin().await?;

        let Some(statement) = queries::insert_statement(
            &mut db_tx,
            &BankStatement {
                id: Uuid::new_v4(),
                account_id: account.id,
                external_id: entry.external_id.clone(),
                amount: money::round2(&entry.amount),
                statement_type: statement_type.as_str().to_string(),
                from_bank_code: entry.from_bank_code.clone(),
                from_account_number: entry.from_account_number.clone(),
                transfer_at: entry.transfer_at,
                status: StatementStatus::Pending.as_str().to_string(),
                created_at: entry.transfer_at,
                updated_at: entry.transfer_at,
                deleted_at: None,
            },
        )
        .await?
        else {
            db_tx.rollback().await?;
            return Ok(IngestOutcome::Duplicate);
        };

        ledger::apply_account_delta(&mut db_tx, account.id, &statement.amount).await?;

        let matched = self.matcher.match_statement_in(&mut db_tx, &statement).await?;

        db_tx.commit().await?;
        Ok(IngestOutcome::Inserted(matched))
    }
}

enum IngestOutcome {
    Inserted(Option<BankTransaction>),
    Duplicate,
    Orphan,
}
