use std::path::PathBuf;
use std::time::Duration;

/// TLS configuration for connections to agents.
///
/// When enabled, agent channels use mutual TLS (mTLS):
/// - The controller presents its certificate to each agent
/// - Agent certificates are verified against the configured CA
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Enable TLS. If false, all other TLS settings are ignored.
    pub enabled: bool,

    /// Path to the CA certificate (PEM format).
    /// Used to verify agent certificates.
    pub ca_cert_path: Option<PathBuf>,

    /// Path to the controller's certificate (PEM format).
    pub cert_path: Option<PathBuf>,

    /// Path to the controller's private key (PEM format).
    /// Must match the certificate.
    pub key_path: Option<PathBuf>,

    /// Domain name expected in agent certificates.
    pub domain_name: Option<String>,

    /// Allow insecure connections for development/testing.
    /// When true and TLS files are missing, runs in plaintext mode with warning.
    /// When false and TLS files are missing, fails to start.
    pub allow_insecure: bool,
}

/// Settings for a single agent session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound on the whole session, measured from connection setup.
    pub timeout: Duration,
    /// Upper bound on establishing the channel to the agent.
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub session: SessionConfig,
    /// Buffer size of the submission and update channels.
    pub channel_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            channel_capacity: 64,
        }
    }
}

impl ControllerConfig {
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.session.connect_timeout = timeout;
        self
    }
}

/// Polling parameters for the driver.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Maximum number of ready jobs fetched per cycle.
    pub batch_size: usize,
    pub poll_interval: Duration,
    /// Stop after this many cycles. `None` polls until cancelled.
    pub max_cycles: Option<u32>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            poll_interval: Duration::from_secs(5),
            max_cycles: Some(10),
        }
    }
}
