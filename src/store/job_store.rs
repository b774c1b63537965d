use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::graph_store::timestamp;
use super::JobStore;
use crate::db::Db;
use crate::error::{Result, XkgError};
use crate::jobs::{Job, JobSummary};

fn cutoff(ttl: Duration) -> Result<chrono::DateTime<Utc>> {
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|e| XkgError::InvalidInput(format!("job ttl out of range: {}", e)))?;
    Ok(Utc::now() - ttl)
}

/// Job records as JSON blobs in the `jobs` table.
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    db: Db,
}

impl SqliteJobStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn put(&self, job: &Job) -> Result<()> {
        let record_json = serde_json::to_string(job)?;
        let job_id = job.job_id.clone();
        let kind = job.kind.as_str();
        let concept = job.concept.clone();
        let status = job.status.as_str();
        let created_at = timestamp(&job.created_at);
        let updated_at = timestamp(&job.updated_at);

        self.db
            .with_connection(move |conn| {
                conn.execute(
                    "INSERT INTO jobs (job_id, kind, concept, status, created_at, updated_at, record_json)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(job_id) DO UPDATE SET
                        concept = excluded.concept,
                        status = excluded.status,
                        updated_at = excluded.updated_at,
                        record_json = excluded.record_json",
                    params![job_id, kind, concept, status, created_at, updated_at, record_json],
                )?;
                Ok(())
            })
            .await
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let job_id = job_id.to_string();
        let record: Option<String> = self
            .db
            .with_connection(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT record_json FROM jobs WHERE job_id = ?1",
                        params![job_id],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        record
            .map(|json| serde_json::from_str(&json).map_err(XkgError::from))
            .transpose()
    }

    async fn history(&self, limit: usize) -> Result<Vec<JobSummary>> {
        let records: Vec<String> = self
            .db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT record_json FROM jobs ORDER BY created_at DESC, job_id LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(params![limit as i64], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<String>, _>>()?;
                Ok(rows)
            })
            .await?;

        records
            .iter()
            .map(|json| {
                serde_json::from_str::<Job>(json)
                    .map(|job| job.summary())
                    .map_err(XkgError::from)
            })
            .collect()
    }

    async fn evict_expired(&self, ttl: Duration) -> Result<usize> {
        let cutoff = timestamp(&cutoff(ttl)?);
        self.db
            .with_connection(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM jobs WHERE updated_at < ?1 AND status IN ('succeeded', 'failed')",
                    params![cutoff],
                )?;
                Ok(removed)
            })
            .await
    }
}

/// In-process job store.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, HashMap<String, Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn put(&self, job: &Job) -> Result<()> {
        self.jobs().insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self.jobs().get(job_id).cloned())
    }

    async fn history(&self, limit: usize) -> Result<Vec<JobSummary>> {
        let mut summaries: Vec<JobSummary> = self.jobs().values().map(Job::summary).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.job_id.cmp(&b.job_id)));
        summaries.truncate(limit);
        Ok(summaries)
    }

    async fn evict_expired(&self, ttl: Duration) -> Result<usize> {
        let cutoff = cutoff(ttl)?;
        let mut jobs = self.jobs();
        let before = jobs.len();
        jobs.retain(|_, job| !(job.status.is_terminal() && job.updated_at < cutoff));
        Ok(before - jobs.len())
    }
}
