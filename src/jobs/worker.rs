use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::{GenerationRequest, Job, JobKind, Orchestrator};
use crate::error::{Result, XkgError};

struct QueuedJob {
    job: Job,
    request: GenerationRequest,
}

/// Fixed set of workers draining a bounded queue of generation jobs.
///
/// Submitting publishes the queued record and returns its id immediately;
/// a worker picks it up when one is free.
pub struct WorkerPool {
    orchestrator: Arc<Orchestrator>,
    sender: mpsc::Sender<QueuedJob>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(orchestrator: Arc<Orchestrator>, size: usize, queue_capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<QueuedJob>(queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..size.max(1))
            .map(|worker_id| {
                let receiver = receiver.clone();
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(QueuedJob { job, request }) = next else {
                            break;
                        };
                        let job_id = job.job_id.clone();
                        log::debug!("worker {} picked up job {}", worker_id, job_id);
                        if let Err(e) = orchestrator.run_generation(job, request).await {
                            log::error!("worker {} could not record job {}: {}", worker_id, job_id, e);
                        }
                    }
                    log::debug!("worker {} stopped", worker_id);
                })
            })
            .collect();

        log::info!("Started {} generation workers", size.max(1));
        Self {
            orchestrator,
            sender,
            workers,
        }
    }

    /// Queue a generation; returns the job id.
    ///
    /// Never waits for queue space. A job that cannot be queued is recorded
    /// as failed and the submit returns an error.
    pub async fn submit(&self, request: GenerationRequest) -> Result<String> {
        let job = self
            .orchestrator
            .create_job(JobKind::Generate, &request.concept)
            .await?;
        let job_id = job.job_id.clone();

        let (rejected, reason) = match self.sender.try_send(QueuedJob { job, request }) {
            Ok(()) => return Ok(job_id),
            Err(TrySendError::Full(rejected)) => (rejected, "job queue is full"),
            Err(TrySendError::Closed(rejected)) => (rejected, "worker pool is shut down"),
        };
        log::warn!("Rejected job {}: {}", job_id, reason);
        let mut job = rejected.job;
        job.fail(reason)?;
        self.orchestrator.job_store().put(&job).await?;
        Err(XkgError::JobState(format!("job {} was not queued: {}", job_id, reason)))
    }

    /// Stop accepting work and wait for queued jobs to finish.
    pub async fn shutdown(self) {
        drop(self.sender);
        for worker in self.workers {
            if let Err(e) = worker.await {
                log::error!("worker task failed: {}", e);
            }
        }
    }
}
