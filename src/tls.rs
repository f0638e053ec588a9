//! TLS utilities for loading certificates and configuring mTLS to agents.

use std::path::PathBuf;

use tokio::fs;
use tonic::transport::{Certificate, ClientTlsConfig, Identity};

use crate::config::TlsConfig;

/// Domain used when the configuration does not name one. Agents are
/// usually dialled by IP, so certificates are issued for this name.
pub const DEFAULT_AGENT_DOMAIN: &str = "peridot-agent";

/// Error type for TLS configuration issues.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("CA certificate path not configured")]
    MissingCaCert,

    #[error("Controller certificate path not configured")]
    MissingCert,

    #[error("Private key path not configured")]
    MissingKey,

    #[error("CA certificate not found: {0}")]
    CaCertNotFound(PathBuf),

    #[error("Controller certificate not found: {0}")]
    CertNotFound(PathBuf),

    #[error("Private key not found: {0}")]
    KeyNotFound(PathBuf),

    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),
}

/// Loaded TLS materials ready for use with tonic.
#[derive(Clone)]
pub struct TlsIdentity {
    identity: Identity,
    ca_cert: Certificate,
    domain_name: String,
}

impl std::fmt::Debug for TlsIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsIdentity")
            .field("domain_name", &self.domain_name)
            .finish_non_exhaustive()
    }
}

impl TlsIdentity {
    /// Load TLS materials from file paths specified in the config.
    ///
    /// # Errors
    ///
    /// Returns an error if any required path is not configured, or if a file
    /// does not exist or cannot be read.
    pub async fn load(config: &TlsConfig) -> Result<Self, TlsError> {
        let ca_cert_path = config
            .ca_cert_path
            .as_ref()
            .ok_or(TlsError::MissingCaCert)?;
        let cert_path = config.cert_path.as_ref().ok_or(TlsError::MissingCert)?;
        let key_path = config.key_path.as_ref().ok_or(TlsError::MissingKey)?;

        if !ca_cert_path.exists() {
            return Err(TlsError::CaCertNotFound(ca_cert_path.clone()));
        }
        if !cert_path.exists() {
            return Err(TlsError::CertNotFound(cert_path.clone()));
        }
        if !key_path.exists() {
            return Err(TlsError::KeyNotFound(key_path.clone()));
        }

        let ca_pem = fs::read(ca_cert_path).await?;
        let cert_pem = fs::read(cert_path).await?;
        let key_pem = fs::read(key_path).await?;

        Ok(Self {
            identity: Identity::from_pem(cert_pem, key_pem),
            ca_cert: Certificate::from_pem(ca_pem),
            domain_name: config
                .domain_name
                .clone()
                .unwrap_or_else(|| DEFAULT_AGENT_DOMAIN.to_string()),
        })
    }

    /// Client TLS config used when dialling agents.
    ///
    /// Presents the controller's certificate and verifies the agent's
    /// certificate against the CA.
    pub fn client_tls_config(&self) -> ClientTlsConfig {
        ClientTlsConfig::new()
            .domain_name(self.domain_name.clone())
            .ca_certificate(self.ca_cert.clone())
            .identity(self.identity.clone())
    }

    pub fn domain_name(&self) -> &str {
        &self.domain_name
    }
}

/// Resolve the TLS identity to use for agent connections, if any.
///
/// Incomplete or unreadable TLS settings are an error unless
/// `allow_insecure` is set, in which case the controller falls back to
/// plaintext with a warning.
pub async fn resolve_identity(config: &TlsConfig) -> Result<Option<TlsIdentity>, TlsError> {
    if !config.enabled {
        return Ok(None);
    }

    match TlsIdentity::load(config).await {
        Ok(identity) => {
            tracing::info!(domain = identity.domain_name(), "TLS enabled for agent connections");
            Ok(Some(identity))
        }
        Err(e) if config.allow_insecure => {
            tracing::warn!(error = %e, "TLS setup failed, connecting to agents without TLS");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
