//! `SQLite` lease locks.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use textsync_core::{LockError, LockHandle, LockService};
use tokio::time::{sleep, Instant};
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// [`LockService`] backed by a `leases` table.
///
/// A lease is taken with one upsert that only overwrites rows whose
/// `expires_at` has passed, so agents sharing the database file see the
/// same holder.
pub struct SqliteLockService {
    conn: Mutex<Connection>,
}

impl SqliteLockService {
    /// Open or create the lease table in a database file.
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be opened or initialized.
    pub fn open(path: &Path) -> Result<Self, LockError> {
        let conn = Connection::open(path).map_err(backend)?;
        Self::init(conn)
    }

    /// Create an in-memory lease table (for testing).
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be created.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self, LockError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, LockError> {
        conn.busy_timeout(Duration::from_secs(5)).map_err(backend)?;
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS leases (
                key TEXT PRIMARY KEY,
                token TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );
            ",
        )
        .map_err(backend)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        let now = Utc::now().timestamp_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = now.saturating_add(ttl_ms);

        let changed = self
            .conn()
            .execute(
                r"
                INSERT INTO leases (key, token, expires_at) VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE
                    SET token = excluded.token, expires_at = excluded.expires_at
                    WHERE leases.expires_at <= ?4
                ",
                (key, token, expires_at, now),
            )
            .map_err(backend)?;

        Ok(changed == 1)
    }
}

#[async_trait]
impl LockService for SqliteLockService {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool, LockError> {
        self.take(key, &Uuid::new_v4().to_string(), ttl)
    }

    async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        wait: Duration,
    ) -> Result<LockHandle, LockError> {
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + wait;

        loop {
            if self.take(key, &token, ttl)? {
                return Ok(LockHandle {
                    key: key.to_string(),
                    token,
                });
            }
            if Instant::now() >= deadline {
                return Err(LockError::Timeout(key.to_string()));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn release(&self, handle: LockHandle) -> Result<(), LockError> {
        self.conn()
            .execute(
                "DELETE FROM leases WHERE key = ?1 AND token = ?2",
                (handle.key.as_str(), handle.token.as_str()),
            )
            .map_err(backend)?;
        Ok(())
    }
}

#[allow(clippy::needless_pass_by_value)]
fn backend(err: rusqlite::Error) -> LockError {
    LockError::Backend(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_acquire_holds_until_expiry() {
        let locks = SqliteLockService::in_memory().unwrap();

        assert!(locks.try_acquire("k", Duration::from_millis(80)).await.unwrap());
        assert!(!locks.try_acquire("k", Duration::from_millis(80)).await.unwrap());
        assert!(locks.try_acquire("other", Duration::from_millis(80)).await.unwrap());

        sleep(Duration::from_millis(120)).await;
        assert!(locks.try_acquire("k", Duration::from_millis(80)).await.unwrap());
    }

    #[tokio::test]
    async fn acquire_times_out_while_held() {
        let locks = SqliteLockService::in_memory().unwrap();
        let held = locks
            .acquire("m", Duration::from_secs(30), Duration::ZERO)
            .await
            .unwrap();

        let err = locks
            .acquire("m", Duration::from_secs(30), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Timeout(key) if key == "m"));

        locks.release(held).await.unwrap();
        locks
            .acquire("m", Duration::from_secs(30), Duration::ZERO)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn release_with_foreign_token_is_a_no_op() {
        let locks = SqliteLockService::in_memory().unwrap();
        locks
            .acquire("m", Duration::from_secs(30), Duration::ZERO)
            .await
            .unwrap();

        locks
            .release(LockHandle {
                key: "m".to_string(),
                token: "someone-else".to_string(),
            })
            .await
            .unwrap();
        assert!(!locks.try_acquire("m", Duration::from_secs(30)).await.unwrap());
    }

    #[tokio::test]
    async fn waiter_gets_lock_after_holder_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leases.db");
        let first = SqliteLockService::open(&path).unwrap();
        let second = SqliteLockService::open(&path).unwrap();

        let held = first
            .acquire("m", Duration::from_secs(30), Duration::ZERO)
            .await
            .unwrap();

        let waiter = tokio::spawn(async move {
            second
                .acquire("m", Duration::from_secs(30), Duration::from_secs(5))
                .await
        });
        sleep(Duration::from_millis(120)).await;
        first.release(held).await.unwrap();

        let handle = waiter.await.unwrap().unwrap();
        assert_eq!(handle.key, "m");
    }
}
