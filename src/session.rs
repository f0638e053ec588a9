//! Per-job streaming session against an agent.
//!
//! A session resolves the job's agent, opens a `NewJob` stream, sends a
//! single start request and forwards every status report the agent sends
//! back to the controller. Every failure is reported as one terminal
//! [`JobUpdate`] carrying STOPPED/ERROR; nothing is retried.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};
use tonic::Streaming;

use crate::config::SessionConfig;
use crate::controller::JobRequest;
use crate::error::JobRunnerError;
use crate::proto::agent_client::AgentClient;
use crate::proto::{agent_msg, controller_msg, AgentMsg, ControllerMsg, StartReq, StatusReport};
use crate::proto::{Health, Status};
use crate::store::{Agent, JobStore};
use crate::tls::TlsIdentity;

/// A status report for one job, sent from a session to the controller.
#[derive(Debug)]
pub struct JobUpdate {
    pub job_id: u32,
    pub report: StatusReport,
    /// Set when the controller itself failed to drive the session. Agent-side
    /// errors arrive in `report.output_messages` instead.
    pub error: Option<JobRunnerError>,
}

impl JobUpdate {
    pub fn new(job_id: u32, report: StatusReport) -> Self {
        Self {
            job_id,
            report,
            error: None,
        }
    }

    /// Terminal STOPPED/ERROR update for a session that could not continue.
    pub fn failed(job_id: u32, error: JobRunnerError) -> Self {
        Self {
            job_id,
            report: StatusReport {
                run_status: Status::Stopped as i32,
                health_status: Health::Error as i32,
                ..Default::default()
            },
            error: Some(error),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.report.run_status == Status::Stopped as i32
    }

    /// No further updates follow a terminal update.
    pub fn is_terminal(&self) -> bool {
        self.error.is_some() || self.is_stopped()
    }
}

/// Drives jobs against their agents. Cheap to clone; one clone per session.
#[derive(Clone)]
pub struct SessionRunner {
    store: Arc<dyn JobStore>,
    config: SessionConfig,
    tls: Option<TlsIdentity>,
}

/// Identifies the agent a session talks to, for error messages.
#[derive(Debug, Clone)]
struct Peer {
    name: String,
    url: String,
}

impl Peer {
    fn connect_error(&self, reason: impl ToString) -> JobRunnerError {
        JobRunnerError::Connect {
            agent: self.name.clone(),
            url: self.url.clone(),
            reason: reason.to_string(),
        }
    }

    fn stream_error(&self, status: tonic::Status) -> JobRunnerError {
        JobRunnerError::Stream {
            agent: self.name.clone(),
            url: self.url.clone(),
            status,
        }
    }
}

impl SessionRunner {
    pub fn new(store: Arc<dyn JobStore>, config: SessionConfig, tls: Option<TlsIdentity>) -> Self {
        Self { store, config, tls }
    }

    /// Run one job to completion, sending its updates on `updates`.
    ///
    /// Returns once the agent has reported STOPPED, closed the stream, or
    /// the session failed. The session is bounded by the configured timeout
    /// and ends early when `cancel` fires.
    pub async fn run(
        &self,
        request: JobRequest,
        updates: mpsc::Sender<JobUpdate>,
        cancel: CancellationToken,
    ) {
        let job_id = request.job_id;

        let agent = match self.store.get_agent_by_id(request.agent_id).await {
            Ok(agent) => agent,
            Err(e) => {
                let error = JobRunnerError::AgentLookup {
                    agent_id: request.agent_id,
                    source: Box::new(e),
                };
                fail(&updates, job_id, error).await;
                return;
            }
        };

        let peer = Peer {
            name: agent.name.clone(),
            url: agent.endpoint(),
        };

        let channel = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                fail(&updates, job_id, JobRunnerError::SessionCancelled(job_id)).await;
                return;
            }
            result = self.connect(&agent) => match result {
                Ok(channel) => channel,
                Err(e) => {
                    fail(&updates, job_id, peer.connect_error(e)).await;
                    return;
                }
            },
        };

        // The session window starts once the channel is up and covers
        // everything that follows.
        let deadline = Instant::now() + self.config.timeout;
        let mut client = AgentClient::new(channel);

        // Queue the start request before opening the stream so agents that
        // wait for it before answering do not stall the call.
        let (outbound, outbound_rx) = mpsc::channel::<ControllerMsg>(1);
        let start = ControllerMsg {
            cm: Some(controller_msg::Cm::Start(StartReq {
                config: Some(request.cfg),
            })),
        };
        if outbound.send(start).await.is_err() {
            let status = tonic::Status::internal("outbound stream closed before start");
            fail(&updates, job_id, peer.stream_error(status)).await;
            return;
        }
        tracing::info!(job_id, agent = %peer.name, url = %peer.url, "Sent start request");

        let inbound = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                fail(&updates, job_id, JobRunnerError::SessionCancelled(job_id)).await;
                return;
            }
            _ = sleep_until(deadline) => {
                fail(&updates, job_id, JobRunnerError::SessionTimeout(job_id)).await;
                return;
            }
            result = client.new_job(ReceiverStream::new(outbound_rx)) => match result {
                Ok(response) => response.into_inner(),
                Err(status) => {
                    fail(&updates, job_id, peer.connect_error(status.message())).await;
                    return;
                }
            },
        };

        let reader = tokio::spawn(read_status_stream(
            job_id,
            peer,
            inbound,
            updates,
            deadline,
            cancel,
        ));
        if let Err(e) = reader.await {
            tracing::error!(job_id, error = %e, "Status reader task failed");
        }

        // Closing our half tells the agent we are done with the stream.
        drop(outbound);
        tracing::debug!(job_id, "Session closed");
    }

    async fn connect(&self, agent: &Agent) -> Result<Channel, JobRunnerError> {
        let uri = if self.tls.is_some() {
            format!("https://{}", agent.endpoint())
        } else {
            format!("http://{}", agent.endpoint())
        };

        let mut endpoint = Endpoint::from_shared(uri)
            .map_err(|e| JobRunnerError::Internal(format!("Invalid agent endpoint: {}", e)))?
            .connect_timeout(self.config.connect_timeout);

        if let Some(ref tls) = self.tls {
            endpoint = endpoint.tls_config(tls.client_tls_config())?;
        }

        Ok(endpoint.connect().await?)
    }
}

/// Forward status reports from `inbound` until the job stops, the agent
/// closes the stream, or the session fails.
async fn read_status_stream(
    job_id: u32,
    peer: Peer,
    mut inbound: Streaming<AgentMsg>,
    updates: mpsc::Sender<JobUpdate>,
    deadline: Instant,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(JobRunnerError::SessionCancelled(job_id)),
            _ = sleep_until(deadline) => Err(JobRunnerError::SessionTimeout(job_id)),
            message = inbound.message() => message.map_err(|status| peer.stream_error(status)),
        };

        let message = match next {
            Ok(Some(message)) => message,
            Ok(None) => {
                tracing::info!(job_id, agent = %peer.name, "Agent closed the stream");
                return;
            }
            Err(e) => {
                fail(&updates, job_id, e).await;
                return;
            }
        };

        let Some(agent_msg::Am::Status(report)) = message.am else {
            continue;
        };

        tracing::debug!(
            job_id,
            run_status = report.run_status,
            health = report.health_status,
            messages = report.output_messages.len(),
            "Received status report"
        );

        let update = JobUpdate::new(job_id, report);
        let stopped = update.is_stopped();
        if updates.send(update).await.is_err() {
            tracing::warn!(job_id, "Controller stopped receiving updates");
            return;
        }
        if stopped {
            tracing::info!(job_id, agent = %peer.name, "Job stopped");
            return;
        }
    }
}

/// Report a session failure as a terminal update.
async fn fail(updates: &mpsc::Sender<JobUpdate>, job_id: u32, error: JobRunnerError) {
    tracing::warn!(job_id, error = %error, "Job session failed");
    if updates.send(JobUpdate::failed(job_id, error)).await.is_err() {
        tracing::warn!(job_id, "Controller stopped receiving updates");
    }
}
