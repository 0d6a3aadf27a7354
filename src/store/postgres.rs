//! PostgreSQL revision store for production use.
//!
//! Revisions are persisted as packed changesets (`Z:...$bank`) and unpacked
//! on read.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: Minimum idle connections (default: 2)
//! - `DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: Idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: Max connection lifetime (default: 1800)

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::ops::Range;
use std::time::Duration;

use super::RevisionSource;
use crate::codec::{CodecError, RawChangeset};
use crate::types::{AttributePool, PoolEntry, Revision, RevisionIndex};

/// Table holding one row per revision.
pub const REVISIONS_TABLE: &str = "pad_revisions";

/// Table holding one row per attribute pool entry.
pub const ATTRIBUTES_TABLE: &str = "pad_attributes";

/// DDL for both tables.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pad_revisions (
    pad          TEXT   NOT NULL,
    rev          BIGINT NOT NULL,
    author       TEXT   NOT NULL,
    timestamp_ms BIGINT NOT NULL,
    changeset    TEXT   NOT NULL,
    PRIMARY KEY (pad, rev)
);
CREATE TABLE IF NOT EXISTS pad_attributes (
    pad   TEXT    NOT NULL,
    idx   INTEGER NOT NULL,
    key   TEXT    NOT NULL,
    value TEXT    NOT NULL,
    PRIMARY KEY (pad, idx)
);
"#;

/// Configuration for PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum connections in pool (default: 10).
    pub max_connections: u32,
    /// Minimum idle connections to keep warm (default: 2).
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds (default: 300 = 5 min).
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds (default: 1800 = 30 min).
    pub max_lifetime_secs: u64,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl PostgresConfig {
    /// Load configuration from environment variables with production defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/etherpad".to_string()),
            max_connections: env_parse("DB_MAX_CONNECTIONS", 10),
            min_connections: env_parse("DB_MIN_CONNECTIONS", 2),
            connect_timeout_secs: env_parse("DB_CONNECT_TIMEOUT_SECS", 10),
            idle_timeout_secs: env_parse("DB_IDLE_TIMEOUT_SECS", 300),
            max_lifetime_secs: env_parse("DB_MAX_LIFETIME_SECS", 1800),
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Error type for PostgreSQL store.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored changeset could not be unpacked.
    #[error("Pad {pad} revision {index}: {source}")]
    Changeset {
        /// Pad name.
        pad: String,
        /// Revision index.
        index: RevisionIndex,
        /// Codec error.
        source: CodecError,
    },
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    /// Current pool size.
    pub size: u32,
    /// Number of idle connections.
    pub idle: usize,
    /// Maximum pool size.
    pub max: u32,
}

/// PostgreSQL revision store.
pub struct PostgresRevisionStore {
    pool: PgPool,
}

impl PostgresRevisionStore {
    /// Create a new store with the given configuration.
    pub async fn new(config: PostgresConfig) -> Result<Self, sqlx::Error> {
        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connect_timeout_secs = config.connect_timeout_secs,
            idle_timeout_secs = config.idle_timeout_secs,
            max_lifetime_secs = config.max_lifetime_secs,
            "Initializing PostgreSQL connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Create a store from environment variables.
    pub async fn from_env() -> Result<Self, sqlx::Error> {
        Self::new(PostgresConfig::from_env()).await
    }

    /// Create the tables when missing.
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Get the connection pool for health checks.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check if the database is reachable.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    /// Get pool statistics for monitoring.
    pub fn pool_stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max: self.pool.options().get_max_connections(),
        }
    }

    fn parse_revision_row(pad: &str, row: &PgRow) -> Result<Revision, PostgresError> {
        let rev: i64 = row.try_get("rev")?;
        let author: String = row.try_get("author")?;
        let timestamp_ms: i64 = row.try_get("timestamp_ms")?;
        let changeset: String = row.try_get("changeset")?;

        let index = rev as RevisionIndex;
        let raw = RawChangeset::unpack(&changeset).map_err(|source| {
            tracing::warn!(pad, revision = index, error = %source, "unreadable changeset");
            PostgresError::Changeset {
                pad: pad.to_string(),
                index,
                source,
            }
        })?;
        Ok(Revision::new(
            index,
            author,
            timestamp_ms,
            raw.old_len,
            raw.new_len,
            raw.ops,
            raw.char_bank,
        ))
    }
}

#[async_trait]
impl RevisionSource for PostgresRevisionStore {
    type Error = PostgresError;

    async fn head(&self, pad: &str) -> Result<Option<RevisionIndex>, Self::Error> {
        let row = sqlx::query("SELECT MAX(rev) AS head FROM pad_revisions WHERE pad = $1")
            .bind(pad)
            .fetch_one(&self.pool)
            .await?;
        let head: Option<i64> = row.try_get("head")?;
        Ok(head.map(|h| h as RevisionIndex))
    }

    async fn revision(
        &self,
        pad: &str,
        index: RevisionIndex,
    ) -> Result<Option<Revision>, Self::Error> {
        let row = sqlx::query(
            r#"
            SELECT rev, author, timestamp_ms, changeset
            FROM pad_revisions
            WHERE pad = $1 AND rev = $2
            "#,
        )
        .bind(pad)
        .bind(index as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref()
            .map(|r| Self::parse_revision_row(pad, r))
            .transpose()
    }

    async fn revisions(
        &self,
        pad: &str,
        range: Range<RevisionIndex>,
    ) -> Result<Vec<Revision>, Self::Error> {
        let rows = sqlx::query(
            r#"
            SELECT rev, author, timestamp_ms, changeset
            FROM pad_revisions
            WHERE pad = $1 AND rev >= $2 AND rev < $3
            ORDER BY rev
            "#,
        )
        .bind(pad)
        .bind(range.start as i64)
        .bind(range.end as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        let mut expected = range.start;
        for row in &rows {
            let revision = Self::parse_revision_row(pad, row)?;
            if revision.index != expected {
                break;
            }
            expected += 1;
            out.push(revision);
        }
        Ok(out)
    }

    async fn attribute_pool(&self, pad: &str) -> Result<AttributePool, Self::Error> {
        let rows = sqlx::query(
            r#"
            SELECT idx, key, value
            FROM pad_attributes
            WHERE pad = $1
            ORDER BY idx
            "#,
        )
        .bind(pad)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for (position, row) in rows.iter().enumerate() {
            let idx: i32 = row.try_get("idx")?;
            if idx as usize != position {
                // Later entries cannot be addressed by index without this one.
                tracing::warn!(pad, expected = position, found = idx, "attribute pool gap");
                break;
            }
            entries.push(PoolEntry::new(
                row.try_get::<String, _>("key")?,
                row.try_get::<String, _>("value")?,
            ));
        }
        Ok(AttributePool::from_entries(entries))
    }

    async fn pads(&self) -> Result<Vec<String>, Self::Error> {
        let rows = sqlx::query("SELECT DISTINCT pad FROM pad_revisions ORDER BY pad")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("pad").map_err(PostgresError::from))
            .collect()
    }
}
