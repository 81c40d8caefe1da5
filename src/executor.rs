//! Job executors: the scheduler behind a submission
//!
//! An executor turns a [Job]'s specification into something its scheduler understands, submits
//! it and reports the job's status until it reaches a final state. Scheduling, queueing and
//! resource allocation all stay with the scheduler.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use log::info;
use serde::Deserialize;

use crate::error::{BridgeError, Result};
use crate::job::{Job, JobStatus};

/// Render job scripts from the bundled template
pub mod script;
/// Run jobs as child processes of this one
pub mod local;
/// Shared submit/poll/cancel loop for command line batch schedulers
pub mod batch;
/// SLURM (sbatch, sacct, scancel)
pub mod slurm;
/// PBS Pro (qsub, qstat, qdel)
pub mod pbs;

#[async_trait]
pub trait JobExecutor: Send + Sync {
    fn name(&self) -> &str;

    fn work_directory(&self) -> &Path;

    fn set_work_directory(&mut self, path: PathBuf);

    /// Hand the job to the scheduler, setting its native id. Doesn't wait for it to start.
    async fn submit(&self, job: &mut Job) -> Result<()>;

    /// Block until the job reaches a final state
    async fn wait(&self, job: &mut Job) -> Result<JobStatus>;

    async fn cancel(&self, job: &mut Job) -> Result<()>;
}

/// Scheduler command names, e.g. a site wrapper around sbatch
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandOverrides {
    pub submit: Option<String>,
    pub status: Option<String>,
    pub cancel: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorSettings {
    /// How often batch executors ask the scheduler for a job's state
    pub poll_interval: Duration,
    /// Keep generated job scripts after the job is done
    pub keep_files: bool,
    pub commands: CommandOverrides,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        ExecutorSettings {
            poll_interval: Duration::from_secs(5),
            keep_files: false,
            commands: CommandOverrides::default(),
        }
    }
}

/// `$HOME/.callbridge/work`, or a directory under the system temp dir without a home
pub fn default_work_directory() -> PathBuf {
    match env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".callbridge").join("work"),
        None => env::temp_dir().join("callbridge").join("work"),
    }
}

/// Get an executor by scheduler name
///
/// The work directory is created when it doesn't exist yet.
pub fn get_instance(
    name: &str,
    work_directory: Option<PathBuf>,
    settings: &ExecutorSettings,
) -> Result<Box<dyn JobExecutor>> {
    let work_directory = work_directory.unwrap_or_else(default_work_directory);
    if !work_directory.exists() {
        let context = format!("create work directory {}", work_directory.display());
        info!("Creating work directory {}", work_directory.display());
        fs::create_dir_all(&work_directory).map_err(BridgeError::io(context))?;
    }

    let executor: Box<dyn JobExecutor> = match name {
        "local" => Box::new(local::LocalExecutor::new(work_directory, settings)),
        "slurm" => Box::new(batch::BatchExecutor::new(slurm::Slurm, work_directory, settings)),
        "pbs" => Box::new(batch::BatchExecutor::new(pbs::Pbs, work_directory, settings)),
        other => return Err(BridgeError::UnknownExecutor(other.to_string())),
    };
    info!("Using {} executor in {}", executor.name(), executor.work_directory().display());
    Ok(executor)
}

/// Where a job's stdout and stderr go when the spec doesn't say
pub(crate) fn output_paths(work_directory: &Path, job: &Job) -> (PathBuf, PathBuf) {
    let spec = job.spec.as_ref();
    let stdout = spec
        .and_then(|spec| spec.stdout_path.clone())
        .unwrap_or_else(|| work_directory.join(format!("{}.out", job.id)));
    let stderr = spec
        .and_then(|spec| spec.stderr_path.clone())
        .unwrap_or_else(|| work_directory.join(format!("{}.err", job.id)));
    (stdout, stderr)
}
