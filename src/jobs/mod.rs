//! Job records, the tracker that publishes them, the orchestrator and the
//! worker pool that runs them.

pub mod orchestrator;
pub mod tracker;
pub mod worker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, XkgError};
use crate::graph::GraphResult;

pub use orchestrator::{ExpandRequest, GenerationRequest, Orchestrator, OrchestratorSettings};
pub use tracker::JobTracker;
pub use worker::WorkerPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Generate,
    Expand,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Generate => "generate",
            JobKind::Expand => "expand",
        }
    }
}

/// Client-visible record of one generation or expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: u8,
    pub concept: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<GraphResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row of the history listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub kind: JobKind,
    pub concept: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(kind: JobKind, concept: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4().to_string(),
            kind,
            status: JobStatus::Queued,
            progress: 0,
            concept: concept.into(),
            message: None,
            logs: Vec::new(),
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn ensure_open(&self, action: &str) -> Result<()> {
        if self.status.is_terminal() {
            return Err(XkgError::JobState(format!(
                "cannot {} job {}: already {}",
                action,
                self.job_id,
                self.status.as_str()
            )));
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// queued -> running
    pub fn start(&mut self) -> Result<()> {
        if self.status != JobStatus::Queued {
            return Err(XkgError::JobState(format!(
                "cannot start job {}: status is {}",
                self.job_id,
                self.status.as_str()
            )));
        }
        self.status = JobStatus::Running;
        self.touch();
        Ok(())
    }

    pub fn log(&mut self, line: impl Into<String>) -> Result<()> {
        self.ensure_open("log to")?;
        self.logs.push(line.into());
        self.touch();
        Ok(())
    }

    /// Progress never moves backwards and never exceeds 100.
    pub fn set_progress(&mut self, progress: u8) -> Result<()> {
        self.ensure_open("update")?;
        self.progress = self.progress.max(progress.min(100));
        self.touch();
        Ok(())
    }

    /// running -> succeeded, with the persisted graph attached.
    pub fn succeed(&mut self, result: GraphResult) -> Result<()> {
        self.ensure_open("complete")?;
        if self.status != JobStatus::Running {
            return Err(XkgError::JobState(format!(
                "cannot complete job {}: it never started",
                self.job_id
            )));
        }
        self.status = JobStatus::Succeeded;
        self.progress = 100;
        self.message = None;
        self.result = Some(result);
        self.touch();
        Ok(())
    }

    /// queued|running -> failed; a failed job never carries a result.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.ensure_open("fail")?;
        self.status = JobStatus::Failed;
        self.message = Some(message.into());
        self.result = None;
        self.touch();
        Ok(())
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.job_id.clone(),
            kind: self.kind,
            concept: self.concept.clone(),
            status: self.status,
            created_at: self.created_at,
        }
    }
}
