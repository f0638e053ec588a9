use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::DriverConfig;
use crate::controller::JobRequest;
use crate::error::{JobRunnerError, Result};
use crate::store::JobStore;

/// Polls the store for ready jobs and feeds them to the controller.
///
/// The controller drops repeats, so a job that is still ready on the next
/// cycle is simply submitted again.
pub struct Driver {
    store: Arc<dyn JobStore>,
    config: DriverConfig,
}

impl Driver {
    pub fn new(store: Arc<dyn JobStore>, config: DriverConfig) -> Self {
        Self { store, config }
    }

    /// Run polling cycles until `max_cycles` is reached, `cancel` fires or
    /// the controller stops accepting submissions.
    ///
    /// Consumes `jobs`, so the submission channel is closed on return.
    /// Returns the number of requests submitted.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be queried for ready jobs.
    pub async fn run(
        self,
        jobs: mpsc::Sender<JobRequest>,
        cancel: CancellationToken,
    ) -> Result<usize> {
        let mut submitted = 0;
        let mut cycle = 1u32;

        loop {
            if self.config.max_cycles.is_some_and(|max| cycle > max) {
                break;
            }
            if cancel.is_cancelled() {
                break;
            }

            tracing::info!(cycle, "Polling for ready jobs");
            let ready = self.store.get_ready_jobs(self.config.batch_size).await?;

            for job in &ready {
                let request = JobRequest::from_job(job);
                if jobs.send(request).await.is_err() {
                    tracing::warn!(job_id = job.id, "Controller closed, stopping driver");
                    return Err(JobRunnerError::Internal(
                        "job controller stopped accepting submissions".to_string(),
                    ));
                }
                submitted += 1;
            }
            tracing::debug!(cycle, jobs = ready.len(), "Submitted ready jobs");

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
            cycle += 1;
        }

        tracing::info!(cycles = cycle - 1, submitted, "Driver finished");
        Ok(submitted)
    }
}
