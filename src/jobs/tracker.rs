use std::sync::Arc;

use super::Job;
use crate::error::Result;
use crate::graph::GraphResult;
use crate::store::JobStore;

/// Sole writer of one job record.
///
/// Every mutation is applied to the owned record and then the whole record
/// is published to the job store, so readers only ever see complete
/// snapshots.
pub struct JobTracker {
    job: Job,
    store: Arc<dyn JobStore>,
}

impl JobTracker {
    pub fn new(job: Job, store: Arc<dyn JobStore>) -> Self {
        Self { job, store }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn job_id(&self) -> &str {
        &self.job.job_id
    }

    pub fn into_job(self) -> Job {
        self.job
    }

    async fn publish(&self) -> Result<()> {
        self.store.put(&self.job).await
    }

    pub async fn start(&mut self) -> Result<()> {
        self.job.start()?;
        self.publish().await
    }

    pub async fn log(&mut self, line: impl Into<String>) -> Result<()> {
        let line = line.into();
        log::info!("job {}: {}", self.job.job_id, line);
        self.job.log(line)?;
        self.publish().await
    }

    pub async fn progress(&mut self, progress: u8) -> Result<()> {
        self.job.set_progress(progress)?;
        self.publish().await
    }

    /// Log a line and move the progress bar in one publish.
    pub async fn step(&mut self, line: impl Into<String>, progress: u8) -> Result<()> {
        let line = line.into();
        log::info!("job {}: {}", self.job.job_id, line);
        self.job.log(line)?;
        self.job.set_progress(progress)?;
        self.publish().await
    }

    pub async fn succeed(&mut self, result: GraphResult) -> Result<()> {
        self.job.succeed(result)?;
        self.publish().await
    }

    pub async fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        log::error!("job {} failed: {}", self.job.job_id, message);
        self.job.log(format!("[Error] {}", message))?;
        self.job.fail(message)?;
        self.publish().await
    }
}
