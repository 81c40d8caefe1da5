use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::{self, Instant};

use crate::error::{BridgeError, Result};
use crate::executor::script::{self, Launcher};
use crate::executor::{output_paths, ExecutorSettings, JobExecutor};
use crate::job::{Job, JobSpec, JobState, JobStatus};

/// How often a running child is checked for exit
const CHILD_POLL: Duration = Duration::from_millis(50);

/// A job running as a child process of this one
///
/// The child leads its own process group, so signalling the group reaches the job command and
/// anything it started, not just the wrapping shell.
struct Running {
    child: Child,
    process_group: Option<Pid>,
    deadline: Option<Instant>,
    canceled: bool,
    script: PathBuf,
}

/// Runs jobs on this machine, mostly for testing and small workflows
///
/// Jobs only live as long as this executor: a job started by another process can't be waited
/// on. The walltime in `attributes.duration` is enforced by killing the child.
pub struct LocalExecutor {
    work_directory: PathBuf,
    keep_files: bool,
    running: Mutex<HashMap<String, Running>>,
}

impl LocalExecutor {
    pub fn new(work_directory: PathBuf, settings: &ExecutorSettings) -> LocalExecutor {
        LocalExecutor {
            work_directory,
            keep_files: settings.keep_files,
            running: Mutex::new(HashMap::new()),
        }
    }

    fn command(
        &self,
        spec: &JobSpec,
        script: &Path,
        stdout: &Path,
        stderr: &Path,
    ) -> Result<Command> {
        let create = |path: &Path| {
            File::create(path).map_err(BridgeError::io(format!("create {}", path.display())))
        };
        let stdout = create(stdout)?;
        let stderr = create(stderr)?;

        let mut command = Command::new("/bin/sh");
        command
            .arg(script)
            .process_group(0)
            .current_dir(&self.work_directory)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        if !spec.inherit_environment {
            command.env_clear();
        }
        Ok(command)
    }

    fn final_status(exit: ExitStatus, canceled: bool) -> JobStatus {
        if canceled {
            return JobStatus::new(JobState::Canceled);
        }
        match (exit.code(), exit.signal()) {
            (Some(code), _) => JobStatus::exited(code),
            (None, Some(signal)) => {
                JobStatus::new(JobState::Failed).with_message(format!("killed by signal {signal}"))
            }
            (None, None) => JobStatus::new(JobState::Failed),
        }
    }

    /// SIGKILL the job's whole process group
    fn kill(job_id: &str, entry: &mut Running) -> Result<()> {
        let context = format!("kill local job {job_id}");
        match entry.process_group {
            Some(group) => killpg(group, Signal::SIGKILL)
                .map_err(|errno| BridgeError::io(context)(io::Error::from(errno))),
            None => entry.child.start_kill().map_err(BridgeError::io(context)),
        }
    }

    fn cleanup(&self, script: &Path) {
        if self.keep_files {
            return;
        }
        if let Err(err) = std::fs::remove_file(script) {
            warn!("Can't remove job script {}: {}", script.display(), err);
        }
    }
}

#[async_trait]
impl JobExecutor for LocalExecutor {
    fn name(&self) -> &str {
        "local"
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
        let prefix = match Launcher::from_spec(spec)? {
            Launcher::Single => vec![],
            Launcher::Mpirun => Launcher::mpirun_prefix(spec),
            other => {
                return Err(BridgeError::InvalidSpec(format!(
                    "the local executor can't use the {other:?} launcher"
                )))
            }
        };

        let deadline = match spec.attributes.duration {
            Some(walltime) => Some(Instant::now().checked_add(walltime).ok_or_else(|| {
                BridgeError::InvalidSpec(format!("walltime of {}s is too long", walltime.as_secs()))
            })?),
            None => None,
        };

        let script = script::render(&job.id, spec, vec![], prefix)?;
        let script_path = self.work_directory.join(format!("{}.sh", job.id));
        tokio::fs::write(&script_path, script.content)
            .await
            .map_err(BridgeError::io(format!("write job script {}", script_path.display())))?;

        let (stdout, stderr) = output_paths(&self.work_directory, job);
        let mut command = self.command(spec, &script_path, &stdout, &stderr)?;
        info!("Starting local job {} ({})", job.id, spec.executable);
        debug!("{:?}", &command);
        let child = command.spawn().map_err(|err| BridgeError::SubmissionRejected {
            job_id: job.id.clone(),
            executor: "local".to_string(),
            reason: err.to_string(),
        })?;

        let pid = child.id();
        let running = Running {
            child,
            process_group: pid.map(|pid| Pid::from_raw(pid as i32)),
            deadline,
            canceled: false,
            script: script_path,
        };
        self.running.lock().await.insert(job.id.clone(), running);

        job.native_id = pid.map(|pid| pid.to_string());
        job.status = JobStatus::new(JobState::Active);
        Ok(())
    }

    async fn wait(&self, job: &mut Job) -> Result<JobStatus> {
        loop {
            {
                let mut running = self.running.lock().await;
                let Some(entry) = running.get_mut(&job.id) else {
                    if job.status.state.is_final() {
                        return Ok(job.status.clone());
                    }
                    return Err(BridgeError::Detached(job.id.clone()));
                };

                let exited = entry
                    .child
                    .try_wait()
                    .map_err(BridgeError::io(format!("wait for local job {}", job.id)))?;
                if let Some(exit) = exited {
                    let status = Self::final_status(exit, entry.canceled);
                    let script = entry.script.clone();
                    running.remove(&job.id);
                    drop(running);
                    info!("Local job {} finished: {}", job.id, status);
                    self.cleanup(&script);
                    job.status = status.clone();
                    return Ok(status);
                }

                if entry.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    warn!("Local job {} exceeded its walltime, killing it", job.id);
                    if let Err(err) = Self::kill(&job.id, entry) {
                        warn!("Can't kill local job {}: {}", job.id, err);
                    }
                    if let Err(err) = entry.child.wait().await {
                        warn!("Can't reap local job {}: {}", job.id, err);
                    }
                    let script = entry.script.clone();
                    running.remove(&job.id);
                    drop(running);
                    self.cleanup(&script);
                    let status = JobStatus::new(JobState::Failed).with_message("walltime exceeded");
                    job.status = status.clone();
                    return Ok(status);
                }
            }
            time::sleep(CHILD_POLL).await;
        }
    }

    async fn cancel(&self, job: &mut Job) -> Result<()> {
        let mut running = self.running.lock().await;
        match running.get_mut(&job.id) {
            Some(entry) => {
                info!("Canceling local job {}", job.id);
                entry.canceled = true;
                Self::kill(&job.id, entry)
            }
            None if job.status.state.is_final() => Ok(()),
            None => Err(BridgeError::Detached(job.id.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{config_spec, SpecOptions};
    use crate::test_util::scratch_dir;
    use std::fs;

    fn executor(name: &str) -> LocalExecutor {
        LocalExecutor::new(scratch_dir(name), &ExecutorSettings::default())
    }

    fn job(executable: &str, arguments: &[&str], options: &SpecOptions) -> Job {
        let arguments = arguments.iter().map(|arg| arg.to_string()).collect();
        Job::with_spec(config_spec(executable, arguments, options))
    }

    #[tokio::test]
    async fn runs_a_command_to_completion() {
        let executor = executor("local-ok");
        let mut job = job("echo", &["hello", "local"], &SpecOptions::default());
        executor.submit(&mut job).await.unwrap();
        assert!(job.native_id.is_some());

        let status = executor.wait(&mut job).await.unwrap();
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.exit_code, Some(0));

        let out_path = executor.work_directory().join(format!("{}.out", job.id));
        let out = fs::read_to_string(out_path).unwrap();
        assert_eq!(out, "hello local\n");
        assert!(!executor.work_directory().join(format!("{}.sh", job.id)).exists());
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_failure() {
        let executor = executor("local-fail");
        let mut job = job("sh", &["-c", "exit 3"], &SpecOptions::default());
        executor.submit(&mut job).await.unwrap();
        let status = executor.wait(&mut job).await.unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.exit_code, Some(3));
    }

    #[tokio::test]
    async fn environment_and_directory_reach_the_job() {
        let executor = executor("local-env");
        let run_dir = scratch_dir("local-env-run");
        let options: SpecOptions = serde_json::from_value(serde_json::json!({
            "directory": run_dir,
            "environment": { "GREETING": "hi there" }
        }))
        .unwrap();
        let mut job = job("sh", &["-c", "echo \"$GREETING\" > greeting.txt"], &options);
        executor.submit(&mut job).await.unwrap();
        executor.wait(&mut job).await.unwrap();
        assert_eq!(fs::read_to_string(run_dir.join("greeting.txt")).unwrap(), "hi there\n");
    }

    /// A job whose grandchild would leave a marker file after a second
    fn marker_job(executor: &LocalExecutor, options: &SpecOptions) -> (Job, PathBuf) {
        let marker = executor.work_directory().join("marker");
        let script = format!("sleep 1; touch {}", marker.display());
        (job("sh", &["-c", &script], options), marker)
    }

    #[tokio::test]
    async fn walltime_kills_the_whole_job() {
        let executor = executor("local-walltime");
        let options = SpecOptions {
            duration: Some(Duration::from_millis(200)),
            ..SpecOptions::default()
        };
        let (mut job, marker) = marker_job(&executor, &options);
        executor.submit(&mut job).await.unwrap();
        let status = executor.wait(&mut job).await.unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.message.as_deref(), Some("walltime exceeded"));

        time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn cancel_kills_the_whole_job() {
        let executor = executor("local-cancel");
        let (mut job, marker) = marker_job(&executor, &SpecOptions::default());
        executor.submit(&mut job).await.unwrap();
        time::sleep(Duration::from_millis(100)).await;
        executor.cancel(&mut job).await.unwrap();
        let status = executor.wait(&mut job).await.unwrap();
        assert_eq!(status.state, JobState::Canceled);

        time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn unrepresentable_walltime_is_refused() {
        let executor = executor("local-huge-walltime");
        let options = SpecOptions {
            duration: Some(Duration::from_secs(u64::MAX)),
            ..SpecOptions::default()
        };
        let mut job = job("true", &[], &options);
        let err = executor.submit(&mut job).await.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidSpec(_)), "{err}");
        assert_eq!(job.native_id, None);
    }

    #[tokio::test]
    async fn foreign_jobs_are_detached() {
        let executor = executor("local-detached");
        let status = JobStatus::new(JobState::Active);
        let mut job = Job::attach("elsewhere", Some("1234".into()), status);
        assert!(matches!(executor.wait(&mut job).await, Err(BridgeError::Detached(_))));
    }

    #[tokio::test]
    async fn jobs_without_a_spec_are_refused() {
        let executor = executor("local-nospec");
        let mut job = Job::new();
        assert!(matches!(executor.submit(&mut job).await, Err(BridgeError::InvalidSpec(_))));
    }
}
