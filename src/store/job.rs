use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted run status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Sentinel meaning "leave the stored value as it is".
    #[default]
    Same,
    Startup,
    Running,
    Stopped,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Same => write!(f, "same"),
            Status::Startup => write!(f, "startup"),
            Status::Running => write!(f, "running"),
            Status::Stopped => write!(f, "stopped"),
        }
    }
}

/// Persisted health of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    /// Sentinel meaning "leave the stored value as it is".
    #[default]
    Same,
    Ok,
    Degraded,
    Error,
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Health::Same => write!(f, "same"),
            Health::Ok => write!(f, "ok"),
            Health::Degraded => write!(f, "degraded"),
            Health::Error => write!(f, "error"),
        }
    }
}

/// An agent registered with the store. Read-only from the controller's side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: u32,
    pub name: String,
    pub address: String,
    pub port: u32,
}

impl Agent {
    /// `address:port`, as dialled by the session runner.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// A single named reader input.
///
/// When `prior_job_id` is set (and non-zero) the input is the output of that
/// earlier job; otherwise `value` is used verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct JobPathConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_job_id: Option<u32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
}

impl JobPathConfig {
    pub fn prior_job(id: u32) -> Self {
        Self {
            prior_job_id: Some(id),
            value: String::new(),
        }
    }

    pub fn value(value: impl Into<String>) -> Self {
        Self {
            prior_job_id: None,
            value: value.into(),
        }
    }

    /// The referenced prior job, ignoring a zero id.
    pub fn prior(&self) -> Option<u32> {
        self.prior_job_id.filter(|id| *id > 0)
    }
}

/// Persisted configuration of a job.
///
/// Ordered maps keep the generated wire configuration deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct JobConfig {
    #[serde(default)]
    pub code_reader: BTreeMap<String, JobPathConfig>,
    #[serde(default)]
    pub spdx_reader: BTreeMap<String, JobPathConfig>,
    #[serde(default)]
    pub kv: BTreeMap<String, String>,
}

impl JobConfig {
    pub fn with_code_input(mut self, source: impl Into<String>, input: JobPathConfig) -> Self {
        self.code_reader.insert(source.into(), input);
        self
    }

    pub fn with_spdx_input(mut self, source: impl Into<String>, input: JobPathConfig) -> Self {
        self.spdx_reader.insert(source.into(), input);
        self
    }

    pub fn with_kv(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.kv.insert(key.into(), value.into());
        self
    }

    /// All prior jobs this configuration reads from.
    pub fn prior_job_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.code_reader
            .values()
            .chain(self.spdx_reader.values())
            .filter_map(JobPathConfig::prior)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: u32,
    pub agent_id: u32,
    #[serde(default)]
    pub config: JobConfig,
    #[serde(default = "default_status")]
    pub status: Status,
    #[serde(default = "default_health")]
    pub health: Health,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub output_messages: Vec<String>,
}

fn default_status() -> Status {
    Status::Startup
}

fn default_health() -> Health {
    Health::Ok
}

impl Job {
    /// A freshly created job, waiting to be dispatched.
    pub fn new(id: u32, agent_id: u32, config: JobConfig) -> Self {
        Self {
            id,
            agent_id,
            config,
            status: Status::Startup,
            health: Health::Ok,
            started_at: None,
            finished_at: None,
            output_messages: Vec::new(),
        }
    }

    /// Finished without an error.
    pub fn is_succeeded(&self) -> bool {
        self.status == Status::Stopped && matches!(self.health, Health::Ok | Health::Degraded)
    }
}

/// One status transition to persist for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatusUpdate {
    pub job_id: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: Status,
    pub health: Health,
    pub output_messages: Vec<String>,
}
