//! Database Connection Pool Module
//!
//! PostgreSQL connection pooling using deadpool-postgres, schema provisioning,
//! and the Postgres-backed [`RecordStore`].
//!
//! Payloads are stored as `bytea` so the bytes read back during warm-load are
//! exactly the bytes received from the broker.

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use futures_util::{pin_mut, TryStreamExt};
use orderline_core::{RecordStore, RecordVisitor, StoreError, StoreResult, StoredRecord};
use std::time::Duration;
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;

use crate::constants::{
    DEFAULT_DB_HOST, DEFAULT_DB_NAME, DEFAULT_DB_POOL_SIZE, DEFAULT_DB_PORT,
    DEFAULT_DB_TIMEOUT_SECS, DEFAULT_DB_USER,
};
use crate::error::{ApiError, ApiResult};

/// Tables backing the record store and the durable queue.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    order_uid text PRIMARY KEY,
    payload bytea NOT NULL
);

CREATE TABLE IF NOT EXISTS order_messages (
    id bigserial PRIMARY KEY,
    payload bytea NOT NULL,
    attempts integer NOT NULL DEFAULT 0,
    visible_at timestamptz NOT NULL DEFAULT now(),
    published_at timestamptz NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS order_messages_visible_idx
    ON order_messages (visible_at, id);

CREATE TABLE IF NOT EXISTS order_dead_letters (
    id bigint PRIMARY KEY,
    payload bytea NOT NULL,
    attempts integer NOT NULL,
    reason text NOT NULL,
    published_at timestamptz NOT NULL,
    dead_lettered_at timestamptz NOT NULL DEFAULT now()
);
"#;

const UPSERT_SQL: &str = "INSERT INTO orders (order_uid, payload) VALUES ($1, $2) \
     ON CONFLICT (order_uid) DO UPDATE SET payload = EXCLUDED.payload";

const LOAD_ALL_SQL: &str = "SELECT order_uid, payload FROM orders";

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full connection string. Takes precedence over the individual fields.
    pub url: Option<String>,
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// How long to wait for a pooled connection
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: DEFAULT_DB_HOST.to_string(),
            port: DEFAULT_DB_PORT,
            dbname: DEFAULT_DB_NAME.to_string(),
            user: DEFAULT_DB_USER.to_string(),
            password: String::new(),
            max_size: DEFAULT_DB_POOL_SIZE,
            timeout: Duration::from_secs(DEFAULT_DB_TIMEOUT_SECS),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    ///
    /// `DATABASE_URL` wins over `ORDERLINE_DB_HOST`, `ORDERLINE_DB_PORT`,
    /// `ORDERLINE_DB_NAME`, `ORDERLINE_DB_USER` and `ORDERLINE_DB_PASSWORD`.
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            host: std::env::var("ORDERLINE_DB_HOST")
                .unwrap_or_else(|_| DEFAULT_DB_HOST.to_string()),
            port: std::env::var("ORDERLINE_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DB_PORT),
            dbname: std::env::var("ORDERLINE_DB_NAME")
                .unwrap_or_else(|_| DEFAULT_DB_NAME.to_string()),
            user: std::env::var("ORDERLINE_DB_USER")
                .unwrap_or_else(|_| DEFAULT_DB_USER.to_string()),
            password: std::env::var("ORDERLINE_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("ORDERLINE_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(DEFAULT_DB_POOL_SIZE),
            timeout: Duration::from_secs(
                std::env::var("ORDERLINE_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DB_TIMEOUT_SECS),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    ///
    /// No connection is opened here; the first checkout connects.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        match &self.url {
            Some(url) => cfg.url = Some(url.clone()),
            None => {
                cfg.host = Some(self.host.clone());
                cfg.port = Some(self.port);
                cfg.dbname = Some(self.dbname.clone());
                cfg.user = Some(self.user.clone());
                cfg.password = Some(self.password.clone());
            }
        }

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::database_error(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// DATABASE CLIENT WRAPPER
// ============================================================================

/// Database client that wraps a connection pool.
#[derive(Clone)]
pub struct DbClient {
    pool: Pool,
}

impl DbClient {
    /// Create a new database client with the given pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a new database client from configuration.
    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        let pool = config.create_pool()?;
        Ok(Self::new(pool))
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    /// Get a connection from the pool.
    pub(crate) async fn get_conn(&self) -> ApiResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(ApiError::from)
    }

    /// Create the orders and queue tables if they do not exist.
    pub async fn ensure_schema(&self) -> ApiResult<()> {
        let conn = self.get_conn().await?;
        conn.batch_execute(SCHEMA_SQL).await?;
        tracing::info!("Database schema ready");
        Ok(())
    }

    /// Raw payload stored for `order_uid`.
    pub async fn fetch_raw(&self, order_uid: &str) -> ApiResult<Option<Vec<u8>>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt("SELECT payload FROM orders WHERE order_uid = $1", &[&order_uid])
            .await?;
        Ok(row.map(|row| row.get(0)))
    }

    async fn store_conn(&self) -> StoreResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| StoreError::Unavailable {
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl RecordStore for DbClient {
    async fn upsert(&self, order_uid: &str, raw: &[u8]) -> StoreResult<()> {
        let conn = self.store_conn().await?;
        conn.execute(UPSERT_SQL, &[&order_uid, &raw])
            .await
            .map_err(|e| StoreError::UpsertFailed {
                order_uid: order_uid.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn load_all(&self, visit: &mut RecordVisitor<'_>) -> StoreResult<()> {
        let conn = self.store_conn().await?;
        let stream_failed = |e: tokio_postgres::Error| StoreError::StreamFailed {
            reason: e.to_string(),
        };

        let rows = conn
            .query_raw(LOAD_ALL_SQL, std::iter::empty::<&dyn ToSql>())
            .await
            .map_err(stream_failed)?;
        pin_mut!(rows);

        let mut streamed = 0u64;
        while let Some(row) = rows.try_next().await.map_err(stream_failed)? {
            let order_uid: String = row.try_get(0).map_err(stream_failed)?;
            let payload: Vec<u8> = row.try_get(1).map_err(stream_failed)?;
            visit(StoredRecord { order_uid, payload })?;
            streamed += 1;
        }

        tracing::debug!(rows = streamed, "Streamed stored orders");
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        let conn = self.store_conn().await?;
        conn.query_one("SELECT 1", &[])
            .await
            .map_err(|e| StoreError::Unavailable {
                reason: e.to_string(),
            })?;
        Ok(())
    }
}
