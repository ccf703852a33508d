/// Database layer
///
/// Manages the SQLite connection pool and embedded migrations. Timestamps
/// that take part in sync ordering are stored as integer microseconds so
/// that SQL comparisons match `(updated_at, id)` ordering exactly.
///
/// Sync keys are never taken from the wall clock directly. A write that
/// changes what delta sync reports opens its transaction with
/// [`begin_stamped`], which draws the next value of the `sync_clock` row
/// while holding the write lock. A transaction still in flight therefore
/// always carries a stamp above everything already committed, and a
/// checkpoint handed out from one read snapshot can never sort past a
/// write that commits later.
use crate::error::{MediaError, MediaResult};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, Transaction};
use std::path::Path;
use std::str::FromStr;

/// Database connection options
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    pub enable_wal: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            enable_wal: true,
        }
    }
}

/// Create a SQLite connection pool
pub async fn create_pool(path: &Path, options: DatabaseOptions) -> MediaResult<SqlitePool> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(if options.enable_wal {
                    SqliteJournalMode::Wal
                } else {
                    SqliteJournalMode::Delete
                })
                .foreign_keys(true)
                .busy_timeout(std::time::Duration::from_secs(5)),
        )
        .await?;

    Ok(pool)
}

/// Create a migrated in-memory pool.
///
/// A single connection is used because every SQLite `:memory:` connection
/// is its own database.
pub async fn create_memory_pool() -> MediaResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// Run migrations embedded at compile time from ./migrations
pub async fn run_migrations(pool: &SqlitePool) -> MediaResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| MediaError::Internal(format!("Migration failed: {}", e)))?;

    Ok(())
}

/// Test database connection
pub async fn test_connection(pool: &SqlitePool) -> MediaResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Open a write transaction and draw its sync stamp.
///
/// The stamp is at least the current time and strictly above every stamp
/// handed out before. All rows the transaction touches should carry it.
pub async fn begin_stamped(pool: &SqlitePool) -> MediaResult<(Transaction<'static, Sqlite>, DateTime<Utc>)> {
    let mut tx = pool.begin().await?;
    let stamp: i64 = sqlx::query_scalar(
        "UPDATE sync_clock SET last_stamp = MAX(last_stamp + 1, ?1) WHERE id = 1 RETURNING last_stamp",
    )
    .bind(to_micros(now()))
    .fetch_one(&mut *tx)
    .await?;
    Ok((tx, from_micros(stamp)))
}

/// Highest stamp committed as seen by the current snapshot of `conn`
pub async fn sync_high_water(conn: &mut SqliteConnection) -> MediaResult<DateTime<Utc>> {
    let stamp: i64 = sqlx::query_scalar("SELECT last_stamp FROM sync_clock WHERE id = 1")
        .fetch_one(&mut *conn)
        .await?;
    Ok(from_micros(stamp))
}

/// Current time truncated to the stored precision
pub fn now() -> DateTime<Utc> {
    from_micros(Utc::now().timestamp_micros())
}

pub fn to_micros(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_micros()
}

pub fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_micros(micros).unwrap_or_default()
}

/// `?, ?, ?` for binding a list of values into an `IN (...)` clause
pub fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_micros_round_trip_is_lossless_for_now() {
        let t = now();
        assert_eq!(from_micros(to_micros(t)), t);
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(0), "");
        assert_eq!(placeholders(3), "?, ?, ?");
    }

    #[tokio::test]
    async fn test_memory_pool_is_migrated() {
        let pool = create_memory_pool().await.unwrap();
        test_connection(&pool).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM assets")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_stamps_are_strictly_increasing() {
        let pool = create_memory_pool().await.unwrap();

        let (tx, first) = begin_stamped(&pool).await.unwrap();
        tx.commit().await.unwrap();
        let (tx, second) = begin_stamped(&pool).await.unwrap();
        tx.commit().await.unwrap();

        assert!(second > first);
        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(sync_high_water(&mut conn).await.unwrap(), second);
    }

    #[tokio::test]
    async fn test_rolled_back_stamp_is_not_committed() {
        let pool = create_memory_pool().await.unwrap();
        let (tx, committed) = begin_stamped(&pool).await.unwrap();
        tx.commit().await.unwrap();

        let (tx, _) = begin_stamped(&pool).await.unwrap();
        drop(tx);

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(sync_high_water(&mut conn).await.unwrap(), committed);
    }

    #[tokio::test]
    async fn test_stamp_never_goes_backwards() {
        let pool = create_memory_pool().await.unwrap();
        let ahead = to_micros(now()) + 60_000_000;
        sqlx::query("UPDATE sync_clock SET last_stamp = ?1 WHERE id = 1")
            .bind(ahead)
            .execute(&pool)
            .await
            .unwrap();

        let (tx, stamp) = begin_stamped(&pool).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(to_micros(stamp), ahead + 1);
    }
}
