//! Job and agent persistence as seen by the controller.
//!
//! The controller only needs three operations from the durable store:
//! look up an agent, list jobs that are ready to run, and record a status
//! transition. [`JobStore`] captures exactly that, so a database-backed store
//! and the bundled [`MemoryStore`] are interchangeable.

pub mod job;
pub mod memory;

pub use job::{Agent, Health, Job, JobConfig, JobPathConfig, JobStatusUpdate, Status};
pub use memory::{MemoryStore, StoreSeed};

use crate::error::Result;

/// Store operations consumed by the controller and the driver.
///
/// Implementations must be safe for concurrent use: the controller writes
/// status updates while the driver polls for ready jobs.
#[tonic::async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Look up an agent by id. Fails if the agent is unknown.
    async fn get_agent_by_id(&self, id: u32) -> Result<Agent>;

    /// Up to `limit` jobs that may be dispatched now, ordered by id.
    async fn get_ready_jobs(&self, limit: usize) -> Result<Vec<Job>>;

    /// Persist one status transition.
    async fn update_job_status(&self, update: JobStatusUpdate) -> Result<()>;
}
