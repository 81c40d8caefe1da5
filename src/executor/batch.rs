use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::process::Command;
use tokio::time;

use crate::error::{BridgeError, Result};
use crate::executor::script::{self, Launcher};
use crate::executor::{output_paths, CommandOverrides, ExecutorSettings, JobExecutor};
use crate::job::{Job, JobSpec, JobState, JobStatus};

/// Program names used to talk to the scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct BatchCommands {
    pub submit: String,
    pub status: String,
    pub cancel: String,
}

impl BatchCommands {
    fn with_overrides(self, overrides: &CommandOverrides) -> BatchCommands {
        BatchCommands {
            submit: overrides.submit.clone().unwrap_or(self.submit),
            status: overrides.status.clone().unwrap_or(self.status),
            cancel: overrides.cancel.clone().unwrap_or(self.cancel),
        }
    }
}

/// Everything that differs between command line batch schedulers
///
/// Implementations only build arguments and parse output; running the commands and polling is
/// done by [BatchExecutor].
pub trait BatchSystem: Send + Sync {
    fn name(&self) -> &'static str;

    fn script_extension(&self) -> &'static str;

    fn default_commands(&self) -> BatchCommands;

    /// Directive lines for the top of the job script
    fn directives(&self, job_id: &str, spec: &JobSpec, stdout: &Path, stderr: &Path) -> Vec<String>;

    /// What `multiple` means for this scheduler
    fn multiple_launcher(&self, spec: &JobSpec) -> Vec<String>;

    fn submit_args(&self, script: &Path) -> Vec<String>;

    /// Native job id from the submit command's stdout
    fn parse_submit_output(&self, stdout: &str) -> std::result::Result<String, String>;

    fn status_args(&self, native_id: &str) -> Vec<String>;

    /// `Ok(None)` while the scheduler doesn't know the job yet
    fn parse_status(
        &self,
        native_id: &str,
        stdout: &str,
    ) -> std::result::Result<Option<JobStatus>, String>;

    fn cancel_args(&self, native_id: &str) -> Vec<String>;
}

pub struct BatchExecutor<S: BatchSystem> {
    system: S,
    work_directory: PathBuf,
    commands: BatchCommands,
    poll_interval: Duration,
    keep_files: bool,
}

impl<S: BatchSystem> BatchExecutor<S> {
    pub fn new(
        system: S,
        work_directory: PathBuf,
        settings: &ExecutorSettings,
    ) -> BatchExecutor<S> {
        let commands = system.default_commands().with_overrides(&settings.commands);
        BatchExecutor {
            system,
            work_directory,
            commands,
            poll_interval: settings.poll_interval,
            keep_files: settings.keep_files,
        }
    }

    fn script_path(&self, job_id: &str) -> PathBuf {
        self.work_directory.join(format!("{job_id}.{}", self.system.script_extension()))
    }

    fn launcher_prefix(&self, spec: &JobSpec) -> Result<Vec<String>> {
        Ok(match Launcher::from_spec(spec)? {
            Launcher::Single => vec![],
            Launcher::Multiple => self.system.multiple_launcher(spec),
            Launcher::Srun => vec!["srun".to_string()],
            Launcher::Mpirun => Launcher::mpirun_prefix(spec),
        })
    }

    async fn run(&self, program: &str, args: Vec<String>) -> std::io::Result<Output> {
        let mut command = Command::new(program);
        command.args(&args).current_dir(&self.work_directory);
        debug!("{:?}", &command);
        command.output().await
    }

    async fn query(&self, native_id: &str) -> Result<Option<JobStatus>> {
        let output = self
            .run(&self.commands.status, self.system.status_args(native_id))
            .await
            .map_err(BridgeError::io(format!("run {}", self.commands.status)))?;
        if !output.status.success() {
            return Err(BridgeError::Scheduler(format!(
                "{} exited with {}: {}",
                self.commands.status,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        self.system
            .parse_status(native_id, &String::from_utf8_lossy(&output.stdout))
            .map_err(BridgeError::Scheduler)
    }

    fn cleanup(&self, job_id: &str) {
        if self.keep_files {
            return;
        }
        let script = self.script_path(job_id);
        match std::fs::remove_file(&script) {
            Ok(()) => debug!("Removed job script {}", script.display()),
            // the job may have been submitted by another process with keep_files on
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!("Can't remove job script {}: {}", script.display(), err),
        }
    }
}

#[async_trait]
impl<S: BatchSystem> JobExecutor for BatchExecutor<S> {
    fn name(&self) -> &str {
        self.system.name()
    }

    fn work_directory(&self) -> &Path {
        &self.work_directory
    }

    fn set_work_directory(&mut self, path: PathBuf) {
        self.work_directory = path;
    }

    async fn submit(&self, job: &mut Job) -> Result<()> {
        let spec = job.spec.as_ref().ok_or_else(|| {
            BridgeError::InvalidSpec(format!("job {} has no specification", job.id))
        })?;
        let prefix = self.launcher_prefix(spec)?;
        let (stdout, stderr) = output_paths(&self.work_directory, job);
        let directives = self.system.directives(&job.id, spec, &stdout, &stderr);
        let script = script::render(&job.id, spec, directives, prefix)?;

        let script_path = self.script_path(&job.id);
        info!("Writing {} job script to {}", self.system.name(), script_path.display());
        tokio::fs::write(&script_path, script.content)
            .await
            .map_err(BridgeError::io(format!("write job script {}", script_path.display())))?;

        let rejected = |reason: String| BridgeError::SubmissionRejected {
            job_id: job.id.clone(),
            executor: self.system.name().to_string(),
            reason,
        };
        let output = self
            .run(&self.commands.submit, self.system.submit_args(&script_path))
            .await
            .map_err(|err| rejected(format!("can't run {}: {err}", self.commands.submit)))?;
        if !output.status.success() {
            return Err(rejected(format!(
                "{} exited with {}: {}",
                self.commands.submit,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let native_id = self
            .system
            .parse_submit_output(&String::from_utf8_lossy(&output.stdout))
            .map_err(rejected)?;

        info!("{} job id: {native_id}", self.system.name());
        job.native_id = Some(native_id);
        job.status = JobStatus::new(JobState::Queued);
        Ok(())
    }

    async fn wait(&self, job: &mut Job) -> Result<JobStatus> {
        let native_id = job.native_id.clone().ok_or_else(|| BridgeError::Detached(job.id.clone()))?;
        loop {
            if let Some(status) = self.query(&native_id).await? {
                if status.state != job.status.state {
                    info!("Job {} ({native_id}) is {}", job.id, status);
                }
                job.status = status.clone();
                if status.state.is_final() {
                    self.cleanup(&job.id);
                    return Ok(status);
                }
            }
            time::sleep(self.poll_interval).await;
        }
    }

    async fn cancel(&self, job: &mut Job) -> Result<()> {
        let native_id = job.native_id.clone().ok_or_else(|| BridgeError::Detached(job.id.clone()))?;
        info!("Canceling {} job {native_id}", self.system.name());
        let output = self
            .run(&self.commands.cancel, self.system.cancel_args(&native_id))
            .await
            .map_err(BridgeError::io(format!("run {}", self.commands.cancel)))?;
        if !output.status.success() {
            return Err(BridgeError::Scheduler(format!(
                "{} exited with {}: {}",
                self.commands.cancel,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}
