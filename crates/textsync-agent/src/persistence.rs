//! `SQLite` revision log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use textsync_core::{
    AppendOutcome, AuditRevisionId, AuthorId, ClientId, DocumentId, LogError, NewRevision,
    Revision, RevisionLog, Snapshot, Update, Version,
};

const REVISION_COLUMNS: &str = "document_id, version, author_id, client_id, update_bytes, \
                                materialized_text, committed_audit_id, created_at";

/// `SQLite`-backed [`RevisionLog`].
///
/// Appends are a single conditional `INSERT ... SELECT` guarded by the
/// `(document_id, version)` primary key, so several agents can share one
/// database file.
pub struct SqliteRevisionLog {
    conn: Mutex<Connection>,
}

impl SqliteRevisionLog {
    /// Open or create a `SQLite` database.
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be opened or initialized.
    pub fn open(path: &Path) -> Result<Self, LogError> {
        let conn = Connection::open(path).map_err(db_error)?;
        Self::init(conn)
    }

    /// Create an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be created.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self, LogError> {
        let conn = Connection::open_in_memory().map_err(db_error)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, LogError> {
        conn.busy_timeout(Duration::from_secs(5)).map_err(db_error)?;
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS revisions (
                document_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                author_id TEXT NOT NULL,
                client_id TEXT NOT NULL,
                update_bytes BLOB NOT NULL,
                materialized_text TEXT,
                committed_audit_id TEXT,
                created_at TEXT NOT NULL,
                PRIMARY KEY (document_id, version)
            );

            CREATE INDEX IF NOT EXISTS idx_revisions_snapshots
                ON revisions(document_id, version)
                WHERE materialized_text IS NOT NULL;

            CREATE INDEX IF NOT EXISTS idx_revisions_committed
                ON revisions(document_id, version)
                WHERE committed_audit_id IS NOT NULL;
            ",
        )
        .map_err(db_error)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn max_version(&self, document_id: &DocumentId, filter: &str) -> Result<Version, LogError> {
        let sql = format!(
            "SELECT COALESCE(MAX(version), 0) FROM revisions WHERE document_id = ?1 {filter}"
        );
        let version: i64 = self
            .conn()
            .query_row(&sql, [document_id.as_str()], |row| row.get(0))
            .map_err(db_error)?;
        from_i64(version)
    }

    fn update_one(
        &self,
        sql: &str,
        document_id: &DocumentId,
        version: Version,
        value: &str,
    ) -> Result<(), LogError> {
        let changed = self
            .conn()
            .execute(sql, (value, document_id.as_str(), to_i64(version)?))
            .map_err(db_error)?;
        if changed == 0 {
            return Err(LogError::NotFound {
                document_id: document_id.clone(),
                version,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RevisionLog for SqliteRevisionLog {
    async fn append(&self, revision: NewRevision) -> Result<AppendOutcome, LogError> {
        let created_at = Utc::now();
        let version = to_i64(revision.version)?;

        let result = self.conn().execute(
            r"
            INSERT INTO revisions (document_id, version, author_id, client_id, update_bytes,
                                   materialized_text, committed_audit_id, created_at)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7
            WHERE ?2 = (SELECT COALESCE(MAX(version), 0) + 1 FROM revisions WHERE document_id = ?1)
            ",
            (
                revision.document_id.as_str(),
                version,
                revision.author_id.as_str(),
                revision.client_id.as_str(),
                revision.update.as_bytes(),
                revision.materialized_text.as_deref(),
                created_at.to_rfc3339(),
            ),
        );

        match result {
            Ok(1) => Ok(AppendOutcome::Inserted(revision.into_revision(created_at))),
            Ok(_) => Ok(AppendOutcome::Conflict),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Ok(AppendOutcome::Conflict)
            }
            Err(err) => Err(db_error(err)),
        }
    }

    async fn latest_version(&self, document_id: &DocumentId) -> Result<Version, LogError> {
        self.max_version(document_id, "")
    }

    async fn revisions_after(
        &self,
        document_id: &DocumentId,
        version: Version,
    ) -> Result<Vec<Revision>, LogError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {REVISION_COLUMNS} FROM revisions
                 WHERE document_id = ?1 AND version > ?2
                 ORDER BY version ASC"
            ))
            .map_err(db_error)?;

        let rows = stmt
            .query_map((document_id.as_str(), to_i64(version)?), RawRevision::from_row)
            .map_err(db_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_error)?;

        rows.into_iter().map(RawRevision::into_revision).collect()
    }

    async fn latest_snapshot(
        &self,
        document_id: &DocumentId,
    ) -> Result<Option<Snapshot>, LogError> {
        let row = self
            .conn()
            .query_row(
                r"
                SELECT version, materialized_text, update_bytes FROM revisions
                WHERE document_id = ?1 AND materialized_text IS NOT NULL
                ORDER BY version DESC
                LIMIT 1
                ",
                [document_id.as_str()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(db_error)?;

        row.map(|(version, materialized_text, update)| {
            Ok(Snapshot {
                version: from_i64(version)?,
                materialized_text,
                update: Update::new(update),
            })
        })
        .transpose()
    }

    async fn revision(
        &self,
        document_id: &DocumentId,
        version: Version,
    ) -> Result<Option<Revision>, LogError> {
        let raw = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {REVISION_COLUMNS} FROM revisions
                     WHERE document_id = ?1 AND version = ?2"
                ),
                (document_id.as_str(), to_i64(version)?),
                RawRevision::from_row,
            )
            .optional()
            .map_err(db_error)?;

        raw.map(RawRevision::into_revision).transpose()
    }

    async fn latest_committed_version(
        &self,
        document_id: &DocumentId,
    ) -> Result<Version, LogError> {
        self.max_version(document_id, "AND committed_audit_id IS NOT NULL")
    }

    async fn set_materialized_text(
        &self,
        document_id: &DocumentId,
        version: Version,
        text: &str,
    ) -> Result<(), LogError> {
        self.update_one(
            "UPDATE revisions SET materialized_text = ?1 WHERE document_id = ?2 AND version = ?3",
            document_id,
            version,
            text,
        )
    }

    async fn mark_committed(
        &self,
        document_id: &DocumentId,
        version: Version,
        audit_id: &AuditRevisionId,
    ) -> Result<(), LogError> {
        self.update_one(
            "UPDATE revisions SET committed_audit_id = ?1 WHERE document_id = ?2 AND version = ?3",
            document_id,
            version,
            audit_id.as_str(),
        )
    }

    async fn delete_all(&self, document_id: &DocumentId) -> Result<usize, LogError> {
        self.conn()
            .execute(
                "DELETE FROM revisions WHERE document_id = ?1",
                [document_id.as_str()],
            )
            .map_err(db_error)
    }
}

/// Row as stored, before validation.
struct RawRevision {
    document_id: String,
    version: i64,
    author_id: String,
    client_id: String,
    update: Vec<u8>,
    materialized_text: Option<String>,
    committed_audit_id: Option<String>,
    created_at: String,
}

impl RawRevision {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            document_id: row.get(0)?,
            version: row.get(1)?,
            author_id: row.get(2)?,
            client_id: row.get(3)?,
            update: row.get(4)?,
            materialized_text: row.get(5)?,
            committed_audit_id: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_revision(self) -> Result<Revision, LogError> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| LogError::Corrupt(format!("created_at {:?}: {e}", self.created_at)))?
            .with_timezone(&Utc);

        Ok(Revision {
            document_id: DocumentId::new(self.document_id),
            version: from_i64(self.version)?,
            author_id: AuthorId::new(self.author_id),
            client_id: ClientId::new(self.client_id),
            update: Update::new(self.update),
            materialized_text: self.materialized_text,
            committed_audit_id: self.committed_audit_id.map(AuditRevisionId::new),
            created_at,
        })
    }
}

#[allow(clippy::needless_pass_by_value)]
fn db_error(err: rusqlite::Error) -> LogError {
    LogError::Database(err.to_string())
}

fn to_i64(value: u64) -> Result<i64, LogError> {
    i64::try_from(value).map_err(|e| LogError::Database(format!("version {value}: {e}")))
}

fn from_i64(value: i64) -> Result<Version, LogError> {
    Version::try_from(value).map_err(|e| LogError::Corrupt(format!("version {value}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn new_revision(doc: &str, version: Version, text: Option<&str>) -> NewRevision {
        NewRevision {
            document_id: DocumentId::new(doc),
            version,
            author_id: AuthorId::new("u1"),
            client_id: ClientId::new("tab"),
            update: Update::new(vec![1, 2, 3, version as u8]),
            materialized_text: text.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn append_is_compare_and_set() {
        let log = SqliteRevisionLog::in_memory().unwrap();
        let doc = DocumentId::new("doc");

        assert_eq!(
            log.append(new_revision("doc", 2, None)).await.unwrap(),
            AppendOutcome::Conflict
        );
        let inserted = log.append(new_revision("doc", 1, Some("seed"))).await.unwrap();
        assert!(inserted.is_inserted());
        assert_eq!(
            log.append(new_revision("doc", 1, None)).await.unwrap(),
            AppendOutcome::Conflict
        );
        assert!(log.append(new_revision("doc", 2, None)).await.unwrap().is_inserted());

        // Logs of other documents are independent.
        assert!(log.append(new_revision("other", 1, None)).await.unwrap().is_inserted());
        assert_eq!(log.latest_version(&doc).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn queries_round_trip_stored_fields() {
        let log = SqliteRevisionLog::in_memory().unwrap();
        let doc = DocumentId::new("doc");
        log.append(new_revision("doc", 1, Some("one"))).await.unwrap();
        log.append(new_revision("doc", 2, None)).await.unwrap();
        log.append(new_revision("doc", 3, Some("three"))).await.unwrap();
        log.append(new_revision("doc", 4, None)).await.unwrap();

        let snapshot = log.latest_snapshot(&doc).await.unwrap().unwrap();
        assert_eq!(snapshot.version, 3);
        assert_eq!(snapshot.materialized_text, "three");
        assert_eq!(snapshot.update, Update::new(vec![1, 2, 3, 3]));

        let tail: Vec<_> = log
            .revisions_after(&doc, 2)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(tail, vec![3, 4]);

        let second = log.revision(&doc, 2).await.unwrap().unwrap();
        assert_eq!(second.author_id, AuthorId::new("u1"));
        assert!(second.materialized_text.is_none());
        assert!(log.revision(&doc, 9).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn commit_bookkeeping() {
        let log = SqliteRevisionLog::in_memory().unwrap();
        let doc = DocumentId::new("doc");
        log.append(new_revision("doc", 1, Some("one"))).await.unwrap();
        log.append(new_revision("doc", 2, None)).await.unwrap();

        assert_eq!(log.latest_committed_version(&doc).await.unwrap(), 0);
        log.set_materialized_text(&doc, 2, "two").await.unwrap();
        log.mark_committed(&doc, 2, &AuditRevisionId::new("r1"))
            .await
            .unwrap();

        let second = log.revision(&doc, 2).await.unwrap().unwrap();
        assert_eq!(second.materialized_text.as_deref(), Some("two"));
        assert_eq!(second.committed_audit_id, Some(AuditRevisionId::new("r1")));
        assert_eq!(log.latest_committed_version(&doc).await.unwrap(), 2);

        assert!(matches!(
            log.mark_committed(&doc, 7, &AuditRevisionId::new("r2")).await,
            Err(LogError::NotFound { version: 7, .. })
        ));
        assert_eq!(log.delete_all(&doc).await.unwrap(), 2);
        assert_eq!(log.latest_version(&doc).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn agents_sharing_a_file_never_share_a_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("revisions.db");
        let logs = [
            Arc::new(SqliteRevisionLog::open(&path).unwrap()),
            Arc::new(SqliteRevisionLog::open(&path).unwrap()),
        ];
        let doc = DocumentId::new("doc");

        let mut tasks = Vec::new();
        for i in 0..8 {
            let log = logs[i % 2].clone();
            let doc = doc.clone();
            tasks.push(tokio::spawn(async move {
                let mut landed = 0;
                while landed < 5 {
                    let next = log.latest_version(&doc).await.unwrap() + 1;
                    if log
                        .append(new_revision("doc", next, None))
                        .await
                        .unwrap()
                        .is_inserted()
                    {
                        landed += 1;
                    }
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let versions: Vec<_> = logs[0]
            .revisions_after(&doc, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(versions, (1..=40).collect::<Vec<_>>());
    }
}
