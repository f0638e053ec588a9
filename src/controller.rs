//! Job controller: the single dispatcher that owns job submission.
//!
//! # Event loop
//!
//! One task waits on three event sources and handles exactly one event per
//! iteration:
//!
//! - **Cancellation**: stop accepting submissions and release the
//!   controller's own unit of the shutdown barrier
//! - **Submission**: dispatch the job unless its id was already dispatched
//! - **Update**: translate the report and persist it through the store
//!
//! # Shutdown barrier
//!
//! Sessions are spawned on a [`TaskTracker`]. The tracker stays open while the
//! controller accepts jobs, so its outstanding count is the controller plus
//! every live session. A separate watcher waits for the tracker to close and
//! drain, after which the dispatcher persists any buffered updates and stops.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ControllerConfig;
use crate::error::JobRunnerError;
use crate::proto;
use crate::session::{JobUpdate, SessionRunner};
use crate::status::{health_from_wire, status_from_wire, timestamp_from_wire};
use crate::store::{JobStatusUpdate, JobStore};
use crate::tls::TlsIdentity;

/// Everything needed to start a job on its agent.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub job_id: u32,
    pub agent_id: u32,
    pub cfg: proto::JobConfig,
}

impl std::fmt::Display for JobRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "JobRequest{{job_id: {}, agent_id: {}, code_inputs: {}, spdx_inputs: {}, kvs: {}}}",
            self.job_id,
            self.agent_id,
            self.cfg.code_inputs.len(),
            self.cfg.spdx_inputs.len(),
            self.cfg.jkvs.len()
        )
    }
}

/// Lifecycle of a [`JobController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Accepting,
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerState::Accepting => write!(f, "accepting"),
            ControllerState::ShuttingDown => write!(f, "shutting_down"),
            ControllerState::Stopped => write!(f, "stopped"),
        }
    }
}

pub struct JobController {
    store: Arc<dyn JobStore>,
    config: ControllerConfig,
    runner: SessionRunner,
    state_tx: watch::Sender<ControllerState>,
}

impl JobController {
    pub fn new(store: Arc<dyn JobStore>, config: ControllerConfig) -> Self {
        Self::with_tls(store, config, None)
    }

    /// Like [`JobController::new`], dialling agents over mTLS when `tls` is set.
    pub fn with_tls(
        store: Arc<dyn JobStore>,
        config: ControllerConfig,
        tls: Option<TlsIdentity>,
    ) -> Self {
        let runner = SessionRunner::new(store.clone(), config.session.clone(), tls);
        let (state_tx, _) = watch::channel(ControllerState::Accepting);
        Self {
            store,
            config,
            runner,
            state_tx,
        }
    }

    /// Observe state transitions. Subscribe before calling [`start`](Self::start).
    pub fn subscribe_state(&self) -> watch::Receiver<ControllerState> {
        self.state_tx.subscribe()
    }

    /// Spawn the dispatcher on the current runtime.
    ///
    /// Returns the submission sender, which the caller owns and drops once
    /// it has no more jobs, and the error receiver, which yields at most one
    /// controller-level error and closes when the controller has stopped.
    pub fn start(
        self,
        cancel: CancellationToken,
    ) -> (mpsc::Sender<JobRequest>, mpsc::Receiver<JobRunnerError>) {
        let (jobs_tx, jobs_rx) = mpsc::channel(self.config.channel_capacity);
        let (errors_tx, errors_rx) = mpsc::channel(1);

        tokio::spawn(self.run(jobs_rx, errors_tx, cancel));

        (jobs_tx, errors_rx)
    }

    async fn run(
        self,
        mut jobs_rx: mpsc::Receiver<JobRequest>,
        errors_tx: mpsc::Sender<JobRunnerError>,
        cancel: CancellationToken,
    ) {
        let (updates_tx, mut updates_rx) = mpsc::channel(self.config.channel_capacity);
        // Dropped on cancellation so no new sessions can be given a sender.
        let mut updates_tx = Some(updates_tx);

        let sessions = TaskTracker::new();
        let drained = CancellationToken::new();
        {
            let sessions = sessions.clone();
            let drained = drained.clone();
            tokio::spawn(async move {
                sessions.wait().await;
                drained.cancel();
            });
        }

        // Only this task reads or writes the ledger.
        let mut submitted: HashSet<u32> = HashSet::new();
        let mut submissions_open = true;

        tracing::info!("Job controller started");

        loop {
            let accepting = updates_tx.is_some();

            tokio::select! {
                biased;

                _ = cancel.cancelled(), if accepting => {
                    updates_tx = None;
                    sessions.close();
                    self.state_tx.send_replace(ControllerState::ShuttingDown);
                    tracing::info!(
                        active_sessions = sessions.len(),
                        "Controller cancelled, no longer accepting jobs"
                    );
                }

                _ = drained.cancelled() => {
                    while let Ok(update) = updates_rx.try_recv() {
                        self.persist(update).await;
                    }
                    break;
                }

                request = jobs_rx.recv(), if accepting && submissions_open => match request {
                    Some(request) => {
                        if let Some(updates) = &updates_tx {
                            self.dispatch(request, &mut submitted, &sessions, updates, &cancel);
                        }
                    }
                    None => {
                        submissions_open = false;
                        tracing::debug!("Submission channel closed");
                    }
                },

                Some(update) = updates_rx.recv() => {
                    self.persist(update).await;
                }
            }
        }

        updates_rx.close();
        self.state_tx.send_replace(ControllerState::Stopped);
        drop(errors_tx);
        tracing::info!(dispatched = submitted.len(), "Job controller stopped");
    }

    fn dispatch(
        &self,
        request: JobRequest,
        submitted: &mut HashSet<u32>,
        sessions: &TaskTracker,
        updates: &mpsc::Sender<JobUpdate>,
        cancel: &CancellationToken,
    ) {
        if !submitted.insert(request.job_id) {
            tracing::info!(job_id = request.job_id, "Job already submitted, dropping repeat");
            return;
        }

        tracing::info!(job_id = request.job_id, agent_id = request.agent_id, request = %request, "Starting job");

        let runner = self.runner.clone();
        let updates = updates.clone();
        let cancel = cancel.clone();
        sessions.spawn(async move {
            runner.run(request, updates, cancel).await;
        });
    }

    /// Write one update to the store. Failures are logged and the update is
    /// dropped.
    async fn persist(&self, update: JobUpdate) {
        let job_id = update.job_id;
        let terminal = update.is_terminal();
        let report = update.report;

        let status = match status_from_wire(report.run_status) {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Invalid status value in update");
                return;
            }
        };
        let health = match health_from_wire(report.health_status) {
            Ok(health) => health,
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Invalid health value in update");
                return;
            }
        };

        let mut output_messages = report.output_messages;
        if let Some(e) = update.error {
            output_messages.push(format!("controller: {}", e));
        }

        let record = JobStatusUpdate {
            job_id,
            started_at: timestamp_from_wire(report.time_started),
            finished_at: timestamp_from_wire(report.time_finished),
            status,
            health,
            output_messages,
        };

        match self.store.update_job_status(record).await {
            Ok(()) if terminal => {
                tracing::info!(job_id, status = %status, health = %health, "Job finished");
            }
            Ok(()) => {
                tracing::debug!(job_id, status = %status, health = %health, "Job status updated");
            }
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Couldn't update status for job");
            }
        }
    }
}
