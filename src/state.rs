use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    config::AppConfig,
    db::PgPool,
    error::{AppError, AppResult},
    notify::{LogNotifier, Notifier, WebhookNotifier},
};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub notifier: Arc<dyn Notifier>,
}

impl AppState {
    pub fn new(pool: PgPool, config: AppConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            notifier,
        }
    }

    /// Builds state with the notifier selected by `NOTIFY_WEBHOOK_URL`.
    pub fn from_config(pool: PgPool, config: AppConfig) -> Self {
        let notifier: Arc<dyn Notifier> = match config.notify_webhook_url.as_deref() {
            Some(endpoint) => Arc::new(WebhookNotifier::new(endpoint)),
            None => Arc::new(LogNotifier),
        };
        Self::new(pool, config, notifier)
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }
}
