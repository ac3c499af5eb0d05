use dotenvy::dotenv;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    /// Base URL of the bank-automation gateway.
    pub gateway_url: String,
    /// API key for the gateway; also the signing secret (AGENT_KEY).
    pub agent_key: String,
    /// Shared secret expected in the webhook header.
    pub webhook_secret: String,
    /// Secret used to verify admin bearer tokens.
    pub jwt_secret: String,
    /// Notification channel endpoint; notifier is disabled when unset.
    pub notify_url: Option<String>,
    pub cors_allowed_origins: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        dotenv().ok();

        let server_port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let gateway_url = env::var("GATEWAY_URL")
            .unwrap_or_else(|_| "http://localhost:9000".to_string());

        let agent_key =
            env::var("AGENT_KEY").map_err(|_| anyhow::anyhow!("AGENT_KEY must be set"))?;

        let webhook_secret = env::var("WEBHOOK_SECRET")
            .map_err(|_| anyhow::anyhow!("WEBHOOK_SECRET must be set"))?;

        let jwt_secret =
            env::var("JWT_SECRET").map_err(|_| anyhow::anyhow!("JWT_SECRET must be set"))?;

        let notify_url = env::var("NOTIFY_URL").ok();

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS").ok();

        Ok(Config {
            server_port,
            database_url,
            gateway_url,
            agent_key,
            webhook_secret,
            jwt_secret,
            notify_url,
            cors_allowed_origins,
        })
    }
}
