//! # Sync State Repository
//!
//! One row per collection holding its resume cursor and lease.
//!
//! ## Overview
//!
//! - `cursor = NULL` means the collection starts from the beginning.
//! - `lock_owner = NULL` means nobody holds the lease.
//! - A held lease is stale once `now - lock_acquired_at > lock_ttl_seconds`
//!   and may then be taken over by another worker.
//!
//! Rows are created lazily by the first lease attempt. Timestamps are Unix
//! seconds supplied by the caller.
//!
//! A holder keeps its lease live by renewing it: renewal moves
//! `lock_acquired_at` forward but only while `lock_owner` is still the
//! caller, so a worker whose lease was reclaimed finds out instead of
//! silently writing on.

use crate::error::Result;
use async_trait::async_trait;
use sqlx::{FromRow, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::debug;

/// Persisted state of one collection.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct SyncStateRecord {
    pub collection_name: String,
    pub cursor: Option<String>,
    pub lock_owner: Option<String>,
    pub lock_acquired_at: Option<i64>,
    pub lock_ttl_seconds: i64,
}

impl SyncStateRecord {
    /// Whether a live (non-stale) lease is held at `now`.
    pub fn is_locked_at(&self, now: i64) -> bool {
        match (&self.lock_owner, self.lock_acquired_at) {
            (Some(_), Some(acquired_at)) => now - acquired_at <= self.lock_ttl_seconds,
            _ => false,
        }
    }
}

/// Cursor store and lease table.
#[async_trait]
pub trait SyncStateRepository: Send + Sync {
    /// Last persisted cursor, `None` for start of stream.
    async fn get_cursor(&self, collection: &str) -> Result<Option<String>>;

    /// Grants the lease to `owner` iff the collection is unlocked or its lease
    /// is stale at `now`. Returns whether it was granted.
    async fn acquire_lease(
        &self,
        collection: &str,
        owner: &str,
        ttl_seconds: i64,
        now: i64,
    ) -> Result<bool>;

    /// Restamps the lease at `now` if `owner` still holds it. `false` means
    /// another worker has taken it over.
    async fn renew_lease(&self, collection: &str, owner: &str, now: i64) -> Result<bool>;

    /// Clears the lease only if `owner` holds it. Returns whether it did.
    async fn release_lease(&self, collection: &str, owner: &str) -> Result<bool>;

    async fn find(&self, collection: &str) -> Result<Option<SyncStateRecord>>;

    /// All rows ordered by collection name.
    async fn list(&self) -> Result<Vec<SyncStateRecord>>;

    /// Forget the cursor so the next run starts from the beginning.
    async fn reset_cursor(&self, collection: &str) -> Result<bool>;
}

/// SQLite implementation of [`SyncStateRepository`]
#[derive(Clone)]
pub struct SqliteSyncStateRepository {
    pool: SqlitePool,
}

impl SqliteSyncStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Store `cursor` for `collection` inside an open transaction.
pub(crate) async fn update_cursor(
    tx: &mut Transaction<'_, Sqlite>,
    collection: &str,
    cursor: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sync_state (collection_name, cursor)
        VALUES (?, ?)
        ON CONFLICT(collection_name) DO UPDATE SET cursor = excluded.cursor
        "#,
    )
    .bind(collection)
    .bind(cursor)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Restamp `owner`'s lease. Runs on a plain connection or inside a
/// transaction.
pub(crate) async fn renew_lease_on(
    conn: &mut SqliteConnection,
    collection: &str,
    owner: &str,
    now: i64,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE sync_state
        SET lock_acquired_at = ?
        WHERE collection_name = ? AND lock_owner = ?
        "#,
    )
    .bind(now)
    .bind(collection)
    .bind(owner)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

#[async_trait]
impl SyncStateRepository for SqliteSyncStateRepository {
    async fn get_cursor(&self, collection: &str) -> Result<Option<String>> {
        let cursor: Option<Option<String>> =
            sqlx::query_scalar("SELECT cursor FROM sync_state WHERE collection_name = ?")
                .bind(collection)
                .fetch_optional(&self.pool)
                .await?;

        Ok(cursor.flatten())
    }

    async fn acquire_lease(
        &self,
        collection: &str,
        owner: &str,
        ttl_seconds: i64,
        now: i64,
    ) -> Result<bool> {
        sqlx::query(
            "INSERT OR IGNORE INTO sync_state (collection_name, lock_ttl_seconds) VALUES (?, ?)",
        )
        .bind(collection)
        .bind(ttl_seconds)
        .execute(&self.pool)
        .await?;

        // Decide and write in one statement so two workers cannot both win
        let result = sqlx::query(
            r#"
            UPDATE sync_state
            SET lock_owner = ?1, lock_acquired_at = ?2, lock_ttl_seconds = ?3
            WHERE collection_name = ?4
              AND (lock_owner IS NULL
                   OR lock_acquired_at IS NULL
                   OR ?2 - lock_acquired_at > lock_ttl_seconds)
            "#,
        )
        .bind(owner)
        .bind(now)
        .bind(ttl_seconds)
        .bind(collection)
        .execute(&self.pool)
        .await?;

        let granted = result.rows_affected() == 1;
        debug!(collection, owner, granted, "Lease acquisition attempted");
        Ok(granted)
    }

    async fn renew_lease(&self, collection: &str, owner: &str, now: i64) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        let renewed = renew_lease_on(&mut conn, collection, owner, now).await?;
        debug!(collection, owner, renewed, "Lease renewal attempted");
        Ok(renewed)
    }

    async fn release_lease(&self, collection: &str, owner: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sync_state
            SET lock_owner = NULL, lock_acquired_at = NULL
            WHERE collection_name = ? AND lock_owner = ?
            "#,
        )
        .bind(collection)
        .bind(owner)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find(&self, collection: &str) -> Result<Option<SyncStateRecord>> {
        let record = sqlx::query_as::<_, SyncStateRecord>(
            r#"
            SELECT collection_name, cursor, lock_owner, lock_acquired_at, lock_ttl_seconds
            FROM sync_state
            WHERE collection_name = ?
            "#,
        )
        .bind(collection)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list(&self) -> Result<Vec<SyncStateRecord>> {
        let records = sqlx::query_as::<_, SyncStateRecord>(
            r#"
            SELECT collection_name, cursor, lock_owner, lock_acquired_at, lock_ttl_seconds
            FROM sync_state
            ORDER BY collection_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn reset_cursor(&self, collection: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE sync_state SET cursor = NULL WHERE collection_name = ?")
            .bind(collection)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}
