//! Jobs, job specifications and job state
//!
//! A [Job] is the handle returned by a submission. Its identifier is allocated when the job is
//! created, before any executor sees it, so the call protocol can name its files after it.

use uuid::Uuid;

/// Map optional job options onto a job specification
pub mod spec;
/// Job state and status transitions
pub mod state;
/// Walltime parsing and formatting
pub mod duration;

pub use spec::{config_spec, JobAttributes, JobSpec, ResourceSpec, SpecOptions};
pub use state::{JobState, JobStatus};

#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub spec: Option<JobSpec>,
    /// Identifier assigned by the scheduler once the job is submitted
    pub native_id: Option<String>,
    pub status: JobStatus,
}

impl Job {
    pub fn new() -> Job {
        Job {
            id: Uuid::new_v4().to_string(),
            spec: None,
            native_id: None,
            status: JobStatus::new(JobState::New),
        }
    }

    pub fn with_spec(spec: JobSpec) -> Job {
        Job { spec: Some(spec), ..Job::new() }
    }

    /// Rebuild a handle for a job submitted earlier, e.g. by another process
    pub fn attach(id: &str, native_id: Option<String>, status: JobStatus) -> Job {
        Job {
            id: id.to_string(),
            spec: None,
            native_id,
            status,
        }
    }
}

impl Default for Job {
    fn default() -> Self {
        Job::new()
    }
}
