use std::str::FromStr;

use anyhow::Context;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    ConnectOptions, Sqlite, SqliteConnection, SqlitePool, Transaction,
};
use tracing::{debug, info};

use crate::error::FieldError;

/// Statements that bring an empty database up to the current table layout.
/// Every statement must be safe to run again on an existing database.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id              BLOB PRIMARY KEY NOT NULL,
        email           TEXT NOT NULL,
        full_name       TEXT,
        is_active       BOOLEAN NOT NULL DEFAULT 1,
        hashed_password TEXT NOT NULL,
        created_at      TEXT NOT NULL,
        updated_at      TEXT
    )
    "#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS ux_users_email ON users (email)"#,
];

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("row not found")]
    NotFound,

    #[error("invalid input")]
    InvalidInput(Vec<FieldError>),

    #[error("database client is closed")]
    Closed,

    #[error("database error: {0}")]
    Sqlx(sqlx::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StorageError::NotFound,
            sqlx::Error::PoolClosed => StorageError::Closed,
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StorageError::UniqueViolation(db.message().to_string())
            }
            other => StorageError::Sqlx(other),
        }
    }
}

/// Owns the connection pool for one logical database.
///
/// Cloning is cheap and shares the pool. Built once in `main` (or a test),
/// closed once on shutdown.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens a pool against `url`.
    ///
    /// Connections are pinged before being handed out so a dead connection
    /// fails at acquire time instead of inside a unit of work. `debug_logging`
    /// turns on per-statement logging.
    pub async fn open(url: &str, debug_logging: bool) -> anyhow::Result<Self> {
        Self::open_with(url, debug_logging, 10).await
    }

    pub async fn open_with(
        url: &str,
        debug_logging: bool,
        max_connections: u32,
    ) -> anyhow::Result<Self> {
        let mut options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("parse database url {url}"))?
            .create_if_missing(true);
        if !debug_logging {
            options = options.disable_statement_logging();
        }

        let in_memory = is_in_memory(url);
        let pool_options = SqlitePoolOptions::new().test_before_acquire(true);
        // Each connection to an in-memory database sees its own empty
        // database, so the pool is pinned to a single connection that is
        // never recycled.
        let pool_options = if in_memory {
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(max_connections.max(1))
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .context("connect to database")?;

        info!(url, in_memory, debug_logging, "database pool opened");
        Ok(Self { pool })
    }

    /// Starts a unit of work. See [`Session`] for the release contract.
    pub async fn session(&self) -> Result<Session, StorageError> {
        if self.pool.is_closed() {
            return Err(StorageError::Closed);
        }
        let tx = self.pool.begin().await?;
        Ok(Session { tx })
    }

    /// Ensures every table and index exists. Idempotent.
    pub async fn create_schema(&self) -> Result<(), StorageError> {
        let mut session = self.session().await?;
        for stmt in SCHEMA {
            sqlx::query(*stmt).execute(session.conn()).await?;
        }
        session.commit().await?;
        info!("database schema ensured");
        Ok(())
    }

    /// Closes the pool, waiting for checked-out connections to come back.
    /// Later calls to [`Database::session`] fail with [`StorageError::Closed`].
    pub async fn close(&self) {
        self.pool.close().await;
        info!("database pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// A transaction on a pooled connection, scoped to one operation.
///
/// `commit` and `rollback` consume the session. Dropping it without either
/// (early `?` return, panic, or a cancelled request future) rolls back and
/// returns the connection to the pool.
pub struct Session {
    tx: Transaction<'static, Sqlite>,
}

impl Session {
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> Result<(), StorageError> {
        self.tx.commit().await?;
        debug!("session committed");
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), StorageError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
