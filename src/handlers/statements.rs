//! Bank-statement endpoints: listing, the unknown-statement queue and manual
//! resolution against a pending deposit.

use crate::db::queries::{self, StatementFilter};
use crate::error::AppError;
use crate::handlers::PageQuery;
use crate::middleware::auth::AuthActor;
use crate::services::matcher::ManualMatchTarget;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementListQuery {
    pub account_id: Option<Uuid>,
    pub statement_type: Option<String>,
    pub status: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list(
    State(state): State<AppState>,
    _auth: AuthActor,
    Query(query): Query<StatementListQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let filter = StatementFilter {
        account_id: query.account_id,
        statement_type: query.statement_type,
        status: query.status,
        from_date: query.from_date,
        to_date: query.to_date,
        search: query.search,
        limit: query.limit.unwrap_or(20).clamp(1, 100),
        offset: query.offset.unwrap_or(0).max(0),
    };

    let (rows, total) = queries::list_statements(&state.db, &filter).await?;
    Ok(Json(json!({
        "message": "success",
        "list": rows,
        "total": total,
    })))
}

/// Pending deposit statements with no matched transaction: the operator's
/// manual queue.
pub async fn list_unknown(
    State(state): State<AppState>,
    _auth: AuthActor,
    Query(page): Query<PageQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let rows = queries::list_unknown_statements(&state.db, page.limit(), page.offset()).await?;
    Ok(Json(json!({
        "message": "success",
        "list": rows,
    })))
}

/// Either the exact deposit, or a member whose best open deposit should be
/// settled.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchBody {
    pub transaction_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
}

pub async fn manual_match(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(statement_id): Path<Uuid>,
    Json(body): Json<MatchBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let target = match (body.transaction_id, body.user_id) {
        (Some(id), _) => ManualMatchTarget::Transaction(id),
        (None, Some(id)) => ManualMatchTarget::User(id),
        (None, None) => {
            return Err(AppError::Validation(
                "transactionId or userId is required".to_string(),
            ))
        }
    };

    let confirmed = state
        .matcher
        .match_statement_manual(&state.db, statement_id, target, &actor)
        .await?;

    Ok(Json(json!({
        "message": "success",
        "data": confirmed,
    })))
}

pub async fn ignore(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(statement_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state
        .matcher
        .ignore_statement(&state.db, statement_id, &actor)
        .await?;
    Ok(Json(json!({ "message": "success" })))
}
