use thiserror::Error;

use crate::tls::TlsError;

#[derive(Error, Debug)]
pub enum JobRunnerError {
    #[error("Agent not found: {0}")]
    AgentNotFound(u32),

    #[error("Job not found: {0}")]
    JobNotFound(u32),

    #[error("Unrecognized {kind} code: {value}")]
    UnrecognizedCode { kind: &'static str, value: i32 },

    #[error("Could not get details for agent {agent_id}: {source}")]
    AgentLookup {
        agent_id: u32,
        #[source]
        source: Box<JobRunnerError>,
    },

    #[error("Could not connect to {agent} ({url}): {reason}")]
    Connect {
        agent: String,
        url: String,
        reason: String,
    },

    #[error("Stream error for {agent} ({url}): {status}")]
    Stream {
        agent: String,
        url: String,
        status: tonic::Status,
    },

    #[error("Session for job {0} exceeded its deadline")]
    SessionTimeout(u32),

    #[error("Session for job {0} was cancelled")]
    SessionCancelled(u32),

    #[error("Store error: {0}")]
    Store(String),

    #[error("gRPC error: {0}")]
    GrpcError(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    TransportError(#[from] tonic::transport::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid store seed: {0}")]
    Seed(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, JobRunnerError>;
