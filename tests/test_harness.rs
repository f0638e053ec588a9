//! Test harness for controller integration tests.
//!
//! Provides a scriptable fake agent served over real gRPC, a store wrapper
//! that records every status write, and helpers for running a controller.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Request, Response, Streaming};

use peridot_jobrunner::config::ControllerConfig;
use peridot_jobrunner::proto::agent_server::{Agent as AgentService, AgentServer};
use peridot_jobrunner::proto::{self, agent_msg, controller_msg, AgentMsg, ControllerMsg};
use peridot_jobrunner::store::{
    Agent, Job, JobStatusUpdate, JobStore, MemoryStore, Status,
};
use peridot_jobrunner::{ControllerState, JobController, JobRequest, JobRunnerError};

pub const TIME_STARTED: i64 = 1_700_000_000;
pub const TIME_FINISHED: i64 = 1_700_000_060;

/// What the fake agent does after receiving a start request.
#[derive(Debug, Clone)]
pub enum Script {
    /// RUNNING/OK, then STOPPED/OK, then close the stream.
    Complete,
    /// RUNNING/OK, then keep the stream open until the controller leaves.
    Hang,
    /// Keep the stream open without ever reporting.
    Silent,
    /// RUNNING/OK, then close the stream without stopping.
    CloseEarly,
    /// RUNNING/OK, then fail the stream with this message.
    Fail(String),
    /// A report with an unknown run status, then STOPPED/OK.
    BadStatus,
}

pub fn report(status: proto::Status, health: proto::Health, message: &str) -> AgentMsg {
    let time_finished = if status == proto::Status::Stopped {
        TIME_FINISHED
    } else {
        0
    };
    AgentMsg {
        am: Some(agent_msg::Am::Status(proto::StatusReport {
            run_status: status as i32,
            health_status: health as i32,
            time_started: TIME_STARTED,
            time_finished,
            output_messages: vec![message.to_string()],
        })),
    }
}

/// Agent service that plays a [`Script`] for every session.
#[derive(Clone)]
pub struct FakeAgent {
    script: Script,
    sessions: Arc<AtomicUsize>,
    starts: Arc<Mutex<Vec<proto::JobConfig>>>,
}

impl FakeAgent {
    async fn play(script: Script, tx: mpsc::Sender<Result<AgentMsg, tonic::Status>>) {
        let running = report(proto::Status::Running, proto::Health::Ok, "running");
        let stopped = report(proto::Status::Stopped, proto::Health::Ok, "done");

        match script {
            Script::Complete => {
                let _ = tx.send(Ok(running)).await;
                let _ = tx.send(Ok(stopped)).await;
            }
            Script::Hang => {
                let _ = tx.send(Ok(running)).await;
                tx.closed().await;
            }
            Script::Silent => {
                tx.closed().await;
            }
            Script::CloseEarly => {
                let _ = tx.send(Ok(running)).await;
            }
            Script::Fail(message) => {
                let _ = tx.send(Ok(running)).await;
                let _ = tx.send(Err(tonic::Status::internal(message))).await;
            }
            Script::BadStatus => {
                let mut bad = report(proto::Status::Running, proto::Health::Ok, "bogus");
                if let Some(agent_msg::Am::Status(ref mut r)) = bad.am {
                    r.run_status = 42;
                }
                let _ = tx.send(Ok(bad)).await;
                let _ = tx.send(Ok(stopped)).await;
            }
        }
    }
}

#[tonic::async_trait]
impl AgentService for FakeAgent {
    type NewJobStream = ReceiverStream<Result<AgentMsg, tonic::Status>>;

    async fn new_job(
        &self,
        request: Request<Streaming<ControllerMsg>>,
    ) -> Result<Response<Self::NewJobStream>, tonic::Status> {
        self.sessions.fetch_add(1, Ordering::SeqCst);

        let mut inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(8);
        let script = self.script.clone();
        let starts = self.starts.clone();

        tokio::spawn(async move {
            let start = match inbound.message().await {
                Ok(Some(ControllerMsg {
                    cm: Some(controller_msg::Cm::Start(start)),
                })) => start,
                _ => return,
            };
            starts.lock().await.push(start.config.unwrap_or_default());
            Self::play(script, tx).await;
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

/// Handle to a running fake agent. The server stops when dropped.
pub struct TestAgent {
    pub port: u16,
    service: FakeAgent,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestAgent {
    pub async fn spawn(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let service = FakeAgent {
            script,
            sessions: Arc::new(AtomicUsize::new(0)),
            starts: Arc::new(Mutex::new(Vec::new())),
        };
        let shutdown = CancellationToken::new();

        let server = AgentServer::new(service.clone());
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            let result = Server::builder()
                .add_service(server)
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    token.cancelled().await
                })
                .await;
            if let Err(e) = result {
                tracing::error!("Fake agent server error: {}", e);
            }
        });

        Self {
            port,
            service,
            shutdown,
            handle,
        }
    }

    /// Store record pointing at this agent.
    pub fn record(&self, id: u32) -> Agent {
        Agent {
            id,
            name: format!("agent-{}", id),
            address: "127.0.0.1".to_string(),
            port: self.port as u32,
        }
    }

    /// Number of `NewJob` streams opened against this agent.
    pub fn sessions(&self) -> usize {
        self.service.sessions.load(Ordering::SeqCst)
    }

    /// Job configurations received in start requests, in arrival order.
    pub async fn starts(&self) -> Vec<proto::JobConfig> {
        self.service.starts.lock().await.clone()
    }
}

impl Drop for TestAgent {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.handle.abort();
    }
}

/// A port nothing is listening on.
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// [`MemoryStore`] that also records every status write it receives.
#[derive(Default)]
pub struct RecordingStore {
    pub inner: MemoryStore,
    writes: Mutex<Vec<JobStatusUpdate>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status writes for `job_id`, in the order they were made.
    pub async fn writes_for(&self, job_id: u32) -> Vec<JobStatusUpdate> {
        self.writes
            .lock()
            .await
            .iter()
            .filter(|u| u.job_id == job_id)
            .cloned()
            .collect()
    }

    pub async fn write_count(&self) -> usize {
        self.writes.lock().await.len()
    }

    pub async fn job(&self, id: u32) -> Job {
        self.inner.get_job(id).await.expect("job should exist")
    }

    pub async fn has_status(&self, id: u32, status: Status) -> bool {
        self.inner
            .get_job(id)
            .await
            .is_some_and(|job| job.status == status)
    }
}

#[tonic::async_trait]
impl JobStore for RecordingStore {
    async fn get_agent_by_id(&self, id: u32) -> peridot_jobrunner::Result<Agent> {
        self.inner.get_agent_by_id(id).await
    }

    async fn get_ready_jobs(&self, limit: usize) -> peridot_jobrunner::Result<Vec<Job>> {
        self.inner.get_ready_jobs(limit).await
    }

    async fn update_job_status(&self, update: JobStatusUpdate) -> peridot_jobrunner::Result<()> {
        self.writes.lock().await.push(update.clone());
        self.inner.update_job_status(update).await
    }
}

/// Controller config with short timeouts for faster tests.
pub fn test_controller_config() -> ControllerConfig {
    ControllerConfig::default()
        .with_session_timeout(Duration::from_secs(5))
        .with_connect_timeout(Duration::from_secs(1))
}

/// Handle to a started controller.
pub struct RunningController {
    pub jobs: mpsc::Sender<JobRequest>,
    pub errors: mpsc::Receiver<JobRunnerError>,
    pub state: watch::Receiver<ControllerState>,
    pub cancel: CancellationToken,
}

impl RunningController {
    pub fn start(store: Arc<RecordingStore>, config: ControllerConfig) -> Self {
        let controller = JobController::new(store, config);
        let state = controller.subscribe_state();
        let cancel = CancellationToken::new();
        let (jobs, errors) = controller.start(cancel.clone());
        Self {
            jobs,
            errors,
            state,
            cancel,
        }
    }

    pub async fn submit(&self, job: &Job) {
        self.jobs
            .send(JobRequest::from_job(job))
            .await
            .expect("controller should accept submissions");
    }

    /// Cancel the controller and wait for it to stop. Returns any
    /// controller-level errors reported on the way.
    pub async fn shutdown(mut self) -> Vec<JobRunnerError> {
        self.cancel.cancel();
        let mut errors = Vec::new();
        let drain = async {
            while let Some(e) = self.errors.recv().await {
                errors.push(e);
            }
        };
        tokio::time::timeout(Duration::from_secs(10), drain)
            .await
            .expect("controller should stop");
        errors
    }
}

/// Wait for a condition to become true with timeout
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(20)).await;
    assert!(result, "{}", message);
}
