use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{JobRunnerError, Result};
use crate::store::job::{Agent, Health, Job, JobStatusUpdate, Status};
use crate::store::JobStore;

/// Initial contents of a [`MemoryStore`], as read from a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSeed {
    #[serde(default)]
    pub agents: Vec<Agent>,
    #[serde(default)]
    pub jobs: Vec<Job>,
}

/// In-process [`JobStore`].
///
/// Suitable for tests and single-host runs. Nothing is written back to disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    agents: RwLock<BTreeMap<u32, Agent>>,
    jobs: RwLock<BTreeMap<u32, Job>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: StoreSeed) -> Self {
        Self {
            agents: RwLock::new(seed.agents.into_iter().map(|a| (a.id, a)).collect()),
            jobs: RwLock::new(seed.jobs.into_iter().map(|j| (j.id, j)).collect()),
        }
    }

    /// Load a seed file containing `{"agents": [...], "jobs": [...]}`.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read(path.as_ref()).await?;
        let seed: StoreSeed = serde_json::from_slice(&raw)?;
        tracing::info!(
            path = %path.as_ref().display(),
            agents = seed.agents.len(),
            jobs = seed.jobs.len(),
            "Loaded store seed"
        );
        Ok(Self::from_seed(seed))
    }

    pub async fn add_agent(&self, agent: Agent) {
        self.agents.write().await.insert(agent.id, agent);
    }

    pub async fn add_job(&self, job: Job) {
        self.jobs.write().await.insert(job.id, job);
    }

    pub async fn get_job(&self, id: u32) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }

    /// Current contents, in the same shape [`MemoryStore::load`] reads.
    pub async fn snapshot(&self) -> StoreSeed {
        StoreSeed {
            agents: self.agents.read().await.values().cloned().collect(),
            jobs: self.jobs.read().await.values().cloned().collect(),
        }
    }

    /// A job is ready when it has never started and every job it reads
    /// from has finished successfully.
    fn is_ready(job: &Job, jobs: &BTreeMap<u32, Job>) -> bool {
        if job.status != Status::Startup || job.started_at.is_some() {
            return false;
        }
        job.config
            .prior_job_ids()
            .all(|prior| jobs.get(&prior).is_some_and(Job::is_succeeded))
    }
}

#[tonic::async_trait]
impl JobStore for MemoryStore {
    async fn get_agent_by_id(&self, id: u32) -> Result<Agent> {
        self.agents
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(JobRunnerError::AgentNotFound(id))
    }

    async fn get_ready_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|job| Self::is_ready(job, &jobs))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_job_status(&self, update: JobStatusUpdate) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&update.job_id)
            .ok_or(JobRunnerError::JobNotFound(update.job_id))?;

        if update.status != Status::Same {
            job.status = update.status;
        }
        if update.health != Health::Same {
            job.health = update.health;
        }
        if update.started_at.is_some() {
            job.started_at = update.started_at;
        }
        if update.finished_at.is_some() {
            job.finished_at = update.finished_at;
        }
        job.output_messages.extend(update.output_messages);

        tracing::debug!(
            job_id = job.id,
            status = %job.status,
            health = %job.health,
            "Job status stored"
        );
        Ok(())
    }
}
