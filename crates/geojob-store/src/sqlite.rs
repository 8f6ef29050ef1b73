//! SQLite-backed job store (persistence across restarts).

use crate::report_rejected;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use geojob_types::{
    validate_input_shape, Job, JobChangeSink, JobError, JobId, JobKind, JobQuery, JobStatus,
    JobStore, OwnerId, Transition,
};
use rusqlite::OptionalExtension;
use std::path::Path;
use std::sync::Arc;

const COLUMNS: &str = "id, kind, status, progress, progress_message, owner, input, output, \
                       error_message, created_at, started_at, completed_at, version";

/// SQLite-backed job store.
///
/// Updates are conditional on the version read in the same critical section
/// (`UPDATE .. WHERE id = ? AND version = ?`), so a second process writing the same file
/// surfaces as `Conflict` instead of a lost update.
pub struct SqliteJobStore {
    conn: std::sync::Mutex<rusqlite::Connection>,
    sink: Option<Arc<dyn JobChangeSink>>,
}

/// Row as stored; converted to [`Job`] outside the rusqlite callback.
struct JobRow {
    id: String,
    kind: String,
    status: String,
    progress: i64,
    progress_message: Option<String>,
    owner: String,
    input: String,
    output: Option<String>,
    error_message: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    version: i64,
}

impl JobRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            status: row.get(2)?,
            progress: row.get(3)?,
            progress_message: row.get(4)?,
            owner: row.get(5)?,
            input: row.get(6)?,
            output: row.get(7)?,
            error_message: row.get(8)?,
            created_at: row.get(9)?,
            started_at: row.get(10)?,
            completed_at: row.get(11)?,
            version: row.get(12)?,
        })
    }

    fn into_job(self) -> Result<Job, JobError> {
        let id = self.id.parse::<JobId>().map_err(storage)?;
        let output = self.output.as_deref().map(parse_json).transpose()?;
        Ok(Job {
            id,
            kind: self.kind.parse::<JobKind>().map_err(storage)?,
            status: self.status.parse::<JobStatus>().map_err(storage)?,
            progress: u8::try_from(self.progress)
                .map_err(|_| JobError::Storage(format!("bad progress: {}", self.progress)))?,
            progress_message: self.progress_message,
            owner: OwnerId::new(self.owner),
            input: parse_json(&self.input)?,
            output,
            error_message: self.error_message,
            created_at: parse_time(&self.created_at)?,
            started_at: self.started_at.as_deref().map(parse_time).transpose()?,
            completed_at: self.completed_at.as_deref().map(parse_time).transpose()?,
            version: u64::try_from(self.version)
                .map_err(|_| JobError::Storage(format!("bad version: {}", self.version)))?,
        })
    }
}

fn storage(e: impl std::fmt::Display) -> JobError {
    JobError::Storage(e.to_string())
}

fn parse_json(s: &str) -> Result<serde_json::Value, JobError> {
    serde_json::from_str(s).map_err(storage)
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, JobError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(storage)
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl SqliteJobStore {
    /// Open (or create) the store at `path`. Use `":memory:"` for a throwaway database.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, JobError> {
        let conn = rusqlite::Connection::open(path).map_err(storage)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                progress_message TEXT,
                owner TEXT NOT NULL,
                input TEXT NOT NULL,
                output TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                version INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_owner_created ON jobs(owner, created_at);
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            "#,
        )
        .map_err(storage)?;

        Ok(Self {
            conn: std::sync::Mutex::new(conn),
            sink: None,
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn JobChangeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>, JobError> {
        self.conn
            .lock()
            .map_err(|e| JobError::Storage(format!("lock: {e}")))
    }

    fn notify(&self, job: &Job) {
        if let Some(ref sink) = self.sink {
            sink.publish(job);
        }
    }

    fn load(conn: &rusqlite::Connection, id: JobId) -> Result<Job, JobError> {
        let sql = format!("SELECT {COLUMNS} FROM jobs WHERE id = ?1");
        let row = conn
            .query_row(&sql, rusqlite::params![id.to_string()], JobRow::from_row)
            .optional()
            .map_err(storage)?;
        row.ok_or(JobError::NotFound(id))?.into_job()
    }

    /// Read, mutate and conditionally write one job while holding the connection.
    fn mutate<F>(&self, id: JobId, f: F) -> Result<Job, JobError>
    where
        F: FnOnce(&mut Job) -> Result<(), JobError>,
    {
        let conn = self.lock()?;
        let mut job = Self::load(&conn, id)?;
        let prior_version = job.version;
        f(&mut job)?;
        let output = job
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(storage)?;
        let changed = conn
            .execute(
                "UPDATE jobs SET status = ?1, progress = ?2, progress_message = ?3, output = ?4, \
                 error_message = ?5, started_at = ?6, completed_at = ?7, version = ?8 \
                 WHERE id = ?9 AND version = ?10",
                rusqlite::params![
                    job.status.as_str(),
                    i64::from(job.progress),
                    job.progress_message,
                    output,
                    job.error_message,
                    job.started_at.as_ref().map(format_time),
                    job.completed_at.as_ref().map(format_time),
                    job.version as i64,
                    id.to_string(),
                    prior_version as i64,
                ],
            )
            .map_err(storage)?;
        if changed == 0 {
            return Err(JobError::Conflict {
                id,
                reason: "job was modified concurrently".to_string(),
            });
        }
        self.notify(&job);
        Ok(job)
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(
        &self,
        kind: JobKind,
        input: serde_json::Value,
        owner: &OwnerId,
    ) -> Result<Job, JobError> {
        validate_input_shape(&input, owner)?;
        let job = Job::new(kind, input, owner.clone());
        let input_text = serde_json::to_string(&job.input).map_err(storage)?;
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO jobs ({COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6, NULL, NULL, ?7, NULL, NULL, ?8)"
            ),
            rusqlite::params![
                job.id.to_string(),
                job.kind.as_str(),
                job.status.as_str(),
                i64::from(job.progress),
                job.owner.as_str(),
                input_text,
                format_time(&job.created_at),
                job.version as i64,
            ],
        )
        .map_err(storage)?;
        self.notify(&job);
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Job, JobError> {
        let conn = self.lock()?;
        Self::load(&conn, id)
    }

    async fn list(&self, query: &JobQuery) -> Result<Vec<Job>, JobError> {
        let limit = query
            .limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(-1);
        let rows: Vec<JobRow> = {
            let conn = self.lock()?;
            let sql = format!(
                "SELECT {COLUMNS} FROM jobs \
                 WHERE (?1 IS NULL OR owner = ?1) AND (?2 IS NULL OR status = ?2) \
                 ORDER BY created_at DESC, rowid DESC LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql).map_err(storage)?;
            let mapped = stmt
                .query_map(
                    rusqlite::params![
                        query.owner.as_ref().map(|o| o.as_str().to_string()),
                        query.status.map(|s| s.as_str()),
                        limit,
                    ],
                    JobRow::from_row,
                )
                .map_err(storage)?;
            let rows = mapped.collect::<Result<Vec<_>, _>>().map_err(storage)?;
            rows
        };
        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn update_progress(
        &self,
        id: JobId,
        progress: u8,
        message: Option<String>,
    ) -> Result<Job, JobError> {
        self.mutate(id, |job| job.apply_progress(progress, message))
    }

    async fn transition(&self, id: JobId, transition: Transition) -> Result<Job, JobError> {
        let result = self.mutate(id, |job| job.apply_transition(&transition, Utc::now()));
        if let Err(ref e) = result {
            report_rejected(e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn lifecycle_persists_through_reopen() {
        let dir = std::env::temp_dir().join(format!("geojob-sqlite-{}", JobId::new()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("jobs.db");
        let owner = OwnerId::from("u1");

        let id = {
            let store = SqliteJobStore::new(&path).unwrap();
            let job = store
                .create(JobKind::BufferAnalysis, json!({ "radius": 100 }), &owner)
                .await
                .unwrap();
            store.transition(job.id, Transition::start()).await.unwrap();
            store
                .update_progress(job.id, 50, Some("buffering".into()))
                .await
                .unwrap();
            store
                .transition(job.id, Transition::complete(json!({ "features": 1 })))
                .await
                .unwrap();
            job.id
        };

        let store = SqliteJobStore::new(&path).unwrap();
        let job = store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.input, json!({ "radius": 100 }));
        assert_eq!(job.output, Some(json!({ "features": 1 })));
        assert_eq!(job.progress_message.as_deref(), Some("buffering"));
        assert!(job.started_at.unwrap() <= job.completed_at.unwrap());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn list_filters_by_owner_and_status() {
        let store = SqliteJobStore::new(":memory:").unwrap();
        let u1 = OwnerId::from("u1");
        let a = store
            .create(JobKind::Classification, json!({}), &u1)
            .await
            .unwrap();
        let b = store
            .create(JobKind::Classification, json!({}), &u1)
            .await
            .unwrap();
        store
            .create(JobKind::Classification, json!({}), &OwnerId::from("u2"))
            .await
            .unwrap();
        store.transition(a.id, Transition::start()).await.unwrap();

        let mine = store.list_by_owner(&u1, None).await.unwrap();
        assert_eq!(mine.iter().map(|j| j.id).collect::<Vec<_>>(), vec![b.id, a.id]);
        let processing = store
            .list_by_owner(&u1, Some(JobStatus::Processing))
            .await
            .unwrap();
        assert_eq!(processing.len(), 1);
        assert_eq!(store.stats(None).await.unwrap().pending, 2);
    }

    #[tokio::test]
    async fn terminal_jobs_reject_transitions() {
        let store = SqliteJobStore::new(":memory:").unwrap();
        let job = store
            .create(JobKind::ChangeDetection, json!({}), &OwnerId::from("u1"))
            .await
            .unwrap();
        store.transition(job.id, Transition::cancel()).await.unwrap();
        assert!(matches!(
            store.transition(job.id, Transition::start()).await,
            Err(JobError::InvalidTransition { .. })
        ));
        assert!(matches!(
            store.update_progress(job.id, 10, None).await,
            Err(JobError::Conflict { .. })
        ));
    }
}
