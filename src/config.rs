use std::env;

use anyhow::{Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;
use crate::tracking::{DEFAULT_PAGE_SIZE, MAX_BATCH_ID_ATTEMPTS, MAX_PAGE_SIZE};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub public_base_url: String,
    pub page_size: i64,
    pub batch_id_max_attempts: u32,
    pub cors_allowed_origin: Option<String>,
    pub notify_webhook_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("SERVER_PORT must be a valid u16")?;
        let public_base_url = env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("http://{server_host}:{server_port}"));
        Url::parse(&public_base_url).context("PUBLIC_BASE_URL must be an absolute URL")?;
        let page_size = env::var("PAGE_SIZE")
            .unwrap_or_else(|_| DEFAULT_PAGE_SIZE.to_string())
            .parse::<i64>()
            .context("PAGE_SIZE must be an integer")?
            .clamp(1, MAX_PAGE_SIZE);
        let batch_id_max_attempts = env::var("BATCH_ID_MAX_ATTEMPTS")
            .unwrap_or_else(|_| MAX_BATCH_ID_ATTEMPTS.to_string())
            .parse::<u32>()
            .context("BATCH_ID_MAX_ATTEMPTS must be a positive integer")?
            .max(1);
        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN").ok();
        let notify_webhook_url = env::var("NOTIFY_WEBHOOK_URL")
            .ok()
            .filter(|value| !value.trim().is_empty());

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            public_base_url,
            page_size,
            batch_id_max_attempts,
            cors_allowed_origin,
            notify_webhook_url,
        })
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("*****"));
            }
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
