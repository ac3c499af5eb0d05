pub mod clock;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod middleware;
pub mod services;

use crate::clock::SystemClock;
use crate::config::Config;
use crate::gateway::client::BankGatewayClient;
use crate::middleware::auth::AuthKeys;
use crate::services::auto_withdraw::AutoWithdrawOrchestrator;
use crate::services::engine::TransactionEngine;
use crate::services::ingestor::StatementIngestor;
use crate::services::matcher::StatementMatcher;
use crate::services::notifier::Notifier;
use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use axum::http::HeaderValue;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

const NOTIFY_QUEUE_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub config: Config,
    pub gateway: BankGatewayClient,
    pub engine: TransactionEngine,
    pub matcher: StatementMatcher,
    pub ingestor: StatementIngestor,
    pub auto_withdraw: AutoWithdrawOrchestrator,
    pub notifier: Notifier,
}

impl AppState {
    pub fn new(db: sqlx::PgPool, config: Config) -> Self {
        let gateway = BankGatewayClient::new(config.gateway_url.clone(), config.agent_key.clone());
        let notifier = Notifier::new(NOTIFY_QUEUE_CAPACITY);
        let engine = TransactionEngine::new(db.clone(), Arc::new(SystemClock), notifier.clone());
        let matcher = StatementMatcher::new(engine.clone());
        let ingestor = StatementIngestor::new(
            db.clone(),
            engine.clone(),
            matcher.clone(),
            gateway.clone(),
        );
        let auto_withdraw =
            AutoWithdrawOrchestrator::new(db.clone(), engine.clone(), gateway.clone());

        Self {
            db,
            config,
            gateway,
            engine,
            matcher,
            ingestor,
            auto_withdraw,
            notifier,
        }
    }
}

impl FromRef<AppState> for AuthKeys {
    fn from_ref(state: &AppState) -> Self {
        AuthKeys {
            jwt_secret: state.config.jwt_secret.clone(),
            webhook_secret: state.config.webhook_secret.clone(),
        }
    }
}

fn cors_layer(config: &Config) -> CorsLayer {
    match &config.cors_allowed_origins {
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            CorsLayer::new().allow_origin(AllowOrigin::list(origins))
        }
        None => CorsLayer::permissive(),
    }
}

pub fn create_app(state: AppState) -> Router {
    let api = Router::new()
        .route("/statements", get(handlers::statements::list))
        .route("/statements/unknown", get(handlers::statements::list_unknown))
        .route(
            "/statements/:id/match",
            post(handlers::statements::manual_match),
        )
        .route(
            "/statements/:id/ignore",
            post(handlers::statements::ignore),
        )
        .route(
            "/transactions",
            get(handlers::transactions::list).post(handlers::transactions::create),
        )
        .route("/transactions/:id", get(handlers::transactions::get))
        .route(
            "/transactions/:id/confirm-deposit",
            post(handlers::transactions::confirm_deposit),
        )
        .route(
            "/transactions/:id/cancel",
            post(handlers::transactions::cancel),
        )
        .route(
            "/transactions/:id/confirm-credit-withdraw",
            post(handlers::transactions::confirm_credit_withdraw),
        )
        .route(
            "/transactions/:id/confirm-transfer-withdraw",
            post(handlers::transactions::confirm_transfer_withdraw),
        )
        .route(
            "/transactions/:id/remove",
            post(handlers::transactions::remove),
        )
        .route("/webhook/statement", post(handlers::webhook::statement_webhook))
        .route("/recheck-webhook", post(handlers::webhook::recheck));

    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/banking", api)
        .layer(cors)
        .with_state(state)
}
