// Database layer for the tiptag backend

use crate::error::LedgerError;
use crate::models::{from_millis, Creator, NewCreator};
use crate::validate;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

pub type DbPool = Pool<Sqlite>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Database;

impl Database {
    /// Initialize database connection pool and run migrations
    pub async fn init(database_url: &str) -> Result<DbPool> {
        info!("Connecting to database: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::migrate(&pool).await?;
        Ok(pool)
    }

    /// Private in-memory database. A single connection keeps every caller on the same database.
    pub async fn in_memory() -> Result<DbPool> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::migrate(&pool).await?;
        Ok(pool)
    }

    async fn migrate(pool: &DbPool) -> Result<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(pool).await?;
        info!("Database initialized successfully");
        Ok(())
    }

    /// Start a transaction that holds the write lock from its first statement.
    ///
    /// Every read-modify-write of creator aggregates or goal progress goes through
    /// here, so two such sequences can never interleave.
    pub async fn begin_write(pool: &DbPool) -> Result<Transaction<'static, Sqlite>, LedgerError> {
        Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    /// Register a new creator
    pub async fn insert_creator(pool: &DbPool, new: &NewCreator) -> Result<Creator, LedgerError> {
        let handle = validate::handle(&new.handle)?;
        validate::address(&new.payout_address)?;

        let id = Uuid::new_v4().to_string();
        let now_ms = Utc::now().timestamp_millis();

        let inserted = sqlx::query(
            r#"
            INSERT INTO creators (id, handle, payout_address, email, created_at_ms)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (handle) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(&handle)
        .bind(&new.payout_address)
        .bind(&new.email)
        .bind(now_ms)
        .execute(pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(LedgerError::HandleTaken(handle));
        }

        info!("Registered creator '{}' ({})", handle, id);

        Ok(Creator {
            id,
            handle,
            payout_address: new.payout_address.clone(),
            email: new.email.clone(),
            total_tips_received: 0,
            total_tip_count: 0,
            total_withdrawn: 0,
            created_at: from_millis(now_ms),
        })
    }

    pub async fn creator_by_id(pool: &DbPool, id: &str) -> Result<Creator, LedgerError> {
        sqlx::query_as::<_, Creator>("SELECT * FROM creators WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| LedgerError::CreatorNotFound(id.to_string()))
    }

    pub async fn creator_by_handle(pool: &DbPool, handle: &str) -> Result<Creator, LedgerError> {
        sqlx::query_as::<_, Creator>("SELECT * FROM creators WHERE handle = ?")
            .bind(handle.to_ascii_lowercase())
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| LedgerError::RecipientNotFound(handle.to_string()))
    }

    /// Record a visit to a creator's public profile
    pub async fn record_profile_view(
        pool: &DbPool,
        creator_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        sqlx::query("INSERT INTO profile_views (creator_id, viewed_at_ms) VALUES (?, ?)")
            .bind(creator_id)
            .bind(at.timestamp_millis())
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Database liveness check
    pub async fn ping(pool: &DbPool) -> bool {
        sqlx::query("SELECT 1").fetch_one(pool).await.is_ok()
    }
}
