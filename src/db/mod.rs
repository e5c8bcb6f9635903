//! Database module for persistent storage.
//!
//! Async SQLite access through SQLx. Repositories cover:
//! - accounts, nicknames and reset tokens (userserv, nickserv)
//! - channel registrations, member access and stored bans (chanserv)
//! - server-wide bans and regex bans (banserv)
//! - memos, welcome messages, jupes, ignores, service channels
//! - the `users_sync` mailbox observed by the DB-hook dispatcher
//!
//! Transient failures are retried with backoff for up to thirty seconds
//! before the error propagates; the daemon treats an error that survives
//! the retry loop as fatal.

mod accounts;
mod bans;
mod channels;
pub mod hooks;
mod memos;

pub use accounts::{AccountRepository, AccountRow, NickRow, ResetRow};
pub use bans::{BanRepository, OperBanRow, RegexBanRow};
pub use channels::{BanRowDb, ChannelRepository, ChannelRow, MemberRow, ServiceChanTable};
pub use memos::{MemoRepository, MemoRow, MEMO_READ};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("row not found")]
    NotFound,
    #[error("duplicate key")]
    Duplicate,
}

impl DbError {
    /// Whether retrying the operation could help.
    fn is_transient(&self) -> bool {
        match self {
            DbError::Sqlx(sqlx::Error::Io(_)) => true,
            DbError::Sqlx(sqlx::Error::PoolTimedOut) => true,
            DbError::Sqlx(sqlx::Error::Database(db)) => {
                // SQLITE_BUSY / SQLITE_LOCKED surface with these codes.
                matches!(db.code().as_deref(), Some("5") | Some("6"))
            }
            _ => false,
        }
    }
}

/// Database handle with connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connection acquire timeout.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Total budget for the retry loop. Matches the reconnect bound the
    /// rest of the daemon is designed to tolerate.
    const RETRY_BUDGET: Duration = Duration::from_secs(30);

    /// Create a new database connection, running migrations if needed.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let options = if path == ":memory:" {
            SqliteConnectOptions::new()
                .filename("file::memory:")
                .shared_cache(true)
                .create_if_missing(true)
        } else {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    if let Err(e) = std::fs::create_dir_all(parent) {
                        warn!(path = %parent.display(), error = %e, "failed to create database directory");
                    }
                }
            }
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Self::ACQUIRE_TIMEOUT)
            .test_before_acquire(true)
            .connect_with(options)
            .await?;

        info!(path = %path, "database connected");

        Self::run_migrations(&pool).await;
        Ok(Self { pool })
    }

    /// Get reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply the embedded schema, statement by statement.
    async fn run_migrations(pool: &SqlitePool) {
        let migration = include_str!("../../migrations/001_init.sql");
        for statement in migration.split(';') {
            let sql: String = statement
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n");
            if sql.is_empty() {
                continue;
            }
            if let Err(e) = sqlx::query(&sql).execute(pool).await {
                let msg = e.to_string();
                if !msg.contains("already exists") {
                    warn!(sql = %sql, error = %e, "migration statement failed");
                }
            }
        }
        info!("database schema ready");
    }

    /// Run an operation with bounded retry on transient failures.
    ///
    /// `op` must be idempotent; everything in the repositories is either
    /// a read or keyed by a primary key, which keeps that true.
    pub async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T, DbError>
    where
        F: FnMut(SqlitePool) -> Fut,
        Fut: std::future::Future<Output = Result<T, DbError>>,
    {
        let deadline = tokio::time::Instant::now() + Self::RETRY_BUDGET;
        let mut delay = Duration::from_millis(250);

        loop {
            match op(self.pool.clone()).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && tokio::time::Instant::now() + delay < deadline => {
                    warn!(error = %e, "transient database error, retrying");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(5));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Account, nickname and reset-token repository.
    pub fn accounts(&self) -> AccountRepository<'_> {
        AccountRepository::new(&self.pool)
    }

    /// Channel registration repository.
    pub fn channels(&self) -> ChannelRepository<'_> {
        ChannelRepository::new(&self.pool)
    }

    /// Server-wide ban repository.
    pub fn bans(&self) -> BanRepository<'_> {
        BanRepository::new(&self.pool)
    }

    /// Memo repository.
    pub fn memos(&self) -> MemoRepository<'_> {
        MemoRepository::new(&self.pool)
    }

    /// Close the pool; used on fatal exit.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Map a sqlx unique-violation into [`DbError::Duplicate`].
pub(crate) fn map_unique(e: sqlx::Error) -> DbError {
    if let sqlx::Error::Database(ref db) = e {
        if db.is_unique_violation() {
            return DbError::Duplicate;
        }
    }
    DbError::from(e)
}
