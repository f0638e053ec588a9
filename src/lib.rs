pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod jobconfig;
pub mod session;
pub mod shutdown;
pub mod status;
pub mod store;
pub mod tls;

// Re-export generated protobuf types
pub mod proto {
    tonic::include_proto!("agent");
}

pub use controller::{ControllerState, JobController, JobRequest};
pub use error::{JobRunnerError, Result};
pub use session::JobUpdate;
