use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use peridot_jobrunner::config::{ControllerConfig, DriverConfig, SessionConfig, TlsConfig};
use peridot_jobrunner::controller::JobController;
use peridot_jobrunner::driver::Driver;
use peridot_jobrunner::shutdown::install_shutdown_handler;
use peridot_jobrunner::store::{Job, MemoryStore};
use peridot_jobrunner::tls::resolve_identity;

#[derive(Parser, Debug)]
#[command(name = "peridot-jobrunner")]
#[command(version)]
#[command(about = "Dispatches ready jobs to agents and records their status")]
struct Args {
    /// JSON file with the agents and jobs to load into the store
    #[arg(long)]
    store: PathBuf,

    /// Maximum number of ready jobs submitted per polling cycle
    #[arg(long, default_value = "5")]
    batch_size: usize,

    /// Seconds between polling cycles
    #[arg(long, default_value = "5")]
    poll_interval_secs: u64,

    /// Number of polling cycles to run (0 polls until interrupted)
    #[arg(long, default_value = "10")]
    cycles: u32,

    /// Upper bound on each job's session with its agent, in seconds
    #[arg(long, default_value = "20")]
    session_timeout_secs: u64,

    /// Upper bound on connecting to an agent, in milliseconds
    #[arg(long, default_value = "5000")]
    connect_timeout_ms: u64,

    /// Output format for the final job summary
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,

    // === TLS Options ===
    /// Use mTLS for agent connections
    #[arg(long)]
    tls: bool,

    /// Path to CA certificate (PEM format)
    #[arg(long, requires = "tls")]
    ca_cert: Option<PathBuf>,

    /// Path to controller certificate (PEM format)
    #[arg(long, requires = "tls")]
    cert: Option<PathBuf>,

    /// Path to controller private key (PEM format)
    #[arg(long, requires = "tls")]
    key: Option<PathBuf>,

    /// Domain name expected in agent certificates
    #[arg(long, requires = "tls")]
    tls_domain: Option<String>,

    /// Fall back to plaintext when TLS material is missing.
    /// NOT recommended for production.
    #[arg(long)]
    allow_insecure: bool,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Serialize)]
struct JobSummary {
    job_id: u32,
    agent_id: u32,
    status: String,
    health: String,
    started_at: Option<String>,
    finished_at: Option<String>,
    output_messages: Vec<String>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            agent_id: job.agent_id,
            status: job.status.to_string().to_uppercase(),
            health: job.health.to_string().to_uppercase(),
            started_at: job.started_at.map(|t| t.to_rfc3339()),
            finished_at: job.finished_at.map(|t| t.to_rfc3339()),
            output_messages: job.output_messages.clone(),
        }
    }
}

fn print_summary(
    jobs: &[Job],
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let summaries: Vec<JobSummary> = jobs.iter().map(JobSummary::from).collect();

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
        OutputFormat::Table => {
            if summaries.is_empty() {
                println!("No jobs found.");
                return Ok(());
            }
            println!(
                "{:<8} {:<8} {:<10} {:<10} LAST MESSAGE",
                "JOB ID", "AGENT", "STATUS", "HEALTH"
            );
            println!("{}", "-".repeat(70));
            for job in &summaries {
                let last = job.output_messages.last().map(String::as_str).unwrap_or("-");
                println!(
                    "{:<8} {:<8} {:<10} {:<10} {}",
                    job.job_id, job.agent_id, job.status, job.health, last
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let tls_config = TlsConfig {
        enabled: args.tls,
        ca_cert_path: args.ca_cert,
        cert_path: args.cert,
        key_path: args.key,
        domain_name: args.tls_domain,
        allow_insecure: args.allow_insecure,
    };
    let tls_identity = resolve_identity(&tls_config).await?;

    let controller_config = ControllerConfig {
        session: SessionConfig {
            timeout: Duration::from_secs(args.session_timeout_secs),
            connect_timeout: Duration::from_millis(args.connect_timeout_ms),
        },
        ..ControllerConfig::default()
    };
    let driver_config = DriverConfig {
        batch_size: args.batch_size,
        poll_interval: Duration::from_secs(args.poll_interval_secs),
        max_cycles: if args.cycles == 0 {
            None
        } else {
            Some(args.cycles)
        },
    };

    let store = Arc::new(MemoryStore::load(&args.store).await?);

    tracing::info!(
        store = %args.store.display(),
        batch_size = driver_config.batch_size,
        poll_interval_secs = args.poll_interval_secs,
        cycles = ?driver_config.max_cycles,
        session_timeout_secs = args.session_timeout_secs,
        tls_enabled = tls_identity.is_some(),
        "Starting peridot-jobrunner"
    );

    let shutdown = install_shutdown_handler()?;
    // Child token: the driver finishing also shuts the controller down,
    // while a signal stops both.
    let controller_cancel = shutdown.child_token();

    let controller = JobController::with_tls(store.clone(), controller_config, tls_identity);
    let (jobs, mut errors) = controller.start(controller_cancel.clone());

    let driver_result = Driver::new(store.clone(), driver_config)
        .run(jobs, shutdown.clone())
        .await;

    tracing::info!("Driver done, shutting down job controller");
    controller_cancel.cancel();

    // The error channel closes once every session has finished.
    while let Some(e) = errors.recv().await {
        tracing::error!(error = %e, "Job controller error");
    }

    let snapshot = store.snapshot().await;
    print_summary(&snapshot.jobs, &args.output)?;

    driver_result?;
    Ok(())
}
