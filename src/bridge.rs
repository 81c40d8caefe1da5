//! Submit commands and remote calls through a job executor, and collect call results

use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::call::{Call, CallPaths, CallResults, Payload};
use crate::error::{BridgeError, Result};
use crate::executor::{self, ExecutorSettings, JobExecutor};
use crate::job::{config_spec, Job, JobSpec, JobState, JobStatus, SpecOptions};

/// The program a call job runs on the compute node
///
/// Defaults to this executable, which must then be reachable at the same path there. `args` go
/// before the `worker` subcommand, e.g. to run the worker through a container runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerCommand {
    pub executable: String,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(executable: &str) -> WorkerCommand {
        WorkerCommand { executable: executable.to_string(), args: Vec::new() }
    }

    pub fn current_exe() -> Result<WorkerCommand> {
        let exe = env::current_exe().map_err(BridgeError::io("locate the worker executable"))?;
        Ok(WorkerCommand::new(&exe.to_string_lossy()))
    }

    fn arguments(&self, paths: &CallPaths) -> Vec<String> {
        let mut arguments = self.args.clone();
        arguments.extend([
            "worker".to_string(),
            "--payload".to_string(),
            paths.worker_payload.display().to_string(),
            "--result".to_string(),
            paths.worker_result.display().to_string(),
        ]);
        arguments
    }
}

pub struct Bridge {
    executor: Box<dyn JobExecutor>,
    worker: WorkerCommand,
    keep_files: bool,
}

impl Bridge {
    /// Get an executor by scheduler name, running calls with this executable as the worker
    pub fn new(
        instance: &str,
        work_directory: Option<PathBuf>,
        settings: &ExecutorSettings,
    ) -> Result<Bridge> {
        let executor = executor::get_instance(instance, work_directory, settings)?;
        Ok(Bridge {
            executor,
            worker: WorkerCommand::current_exe()?,
            keep_files: settings.keep_files,
        })
    }

    pub fn from_executor(executor: Box<dyn JobExecutor>, worker: WorkerCommand) -> Bridge {
        Bridge { executor, worker, keep_files: false }
    }

    pub fn with_worker(mut self, worker: WorkerCommand) -> Bridge {
        self.worker = worker;
        self
    }

    pub fn keep_files(mut self, keep_files: bool) -> Bridge {
        self.keep_files = keep_files;
        self
    }

    pub fn executor_name(&self) -> &str {
        self.executor.name()
    }

    pub fn work_directory(&self) -> &Path {
        self.executor.work_directory()
    }

    /// Build a job specification from optional job options
    pub fn config_spec(
        &self,
        executable: &str,
        arguments: Vec<String>,
        options: &SpecOptions,
    ) -> JobSpec {
        config_spec(executable, arguments, options)
    }

    /// Submit a command, returning as soon as the scheduler accepted it
    pub async fn submit(
        &self,
        executable: &str,
        arguments: Vec<String>,
        options: &SpecOptions,
    ) -> Result<Job> {
        let mut job = Job::with_spec(config_spec(executable, arguments, options));
        info!("Submitting job {} ({executable}) to {}", job.id, self.executor.name());
        self.executor.submit(&mut job).await?;
        Ok(job)
    }

    /// Submit a registered function call
    ///
    /// The payload is written under the work directory. The worker is pointed at the same files
    /// under `worker_mount` when the compute nodes mount the work directory somewhere else.
    pub async fn submit_call(
        &self,
        call: &Call,
        options: &SpecOptions,
        worker_mount: Option<&Path>,
    ) -> Result<Job> {
        self.submit_call_job(Job::new(), call, options, worker_mount).await
    }

    /// Submit a call under an existing job identifier
    ///
    /// Payload and result files left by an earlier job with the same identifier are removed first,
    /// so a stale result can never be mistaken for this job's. The payload is removed again when
    /// the executor refuses the job.
    pub async fn submit_call_job(
        &self,
        mut job: Job,
        call: &Call,
        options: &SpecOptions,
        worker_mount: Option<&Path>,
    ) -> Result<Job> {
        let paths = CallPaths::new(self.work_directory(), worker_mount, &job.id);

        paths.clear_stale()?;
        info!("Writing payload for {} to {}", call.function, paths.payload.display());
        Payload::new(call.clone()).create(&paths.payload)?;

        let arguments = self.worker.arguments(&paths);
        job.spec = Some(config_spec(&self.worker.executable, arguments, options));
        info!("Submitting call job {} ({}) to {}", job.id, call.function, self.executor.name());
        if let Err(err) = self.executor.submit(&mut job).await {
            remove_payload(&paths.payload);
            return Err(err);
        }
        Ok(job)
    }

    pub async fn wait(&self, job: &mut Job) -> Result<JobStatus> {
        self.executor.wait(job).await
    }

    pub async fn cancel(&self, job: &mut Job) -> Result<()> {
        self.executor.cancel(job).await
    }

    /// Wait for a call job to finish and read its result pair
    pub async fn wait_for_results(&self, job: &mut Job) -> Result<CallResults> {
        let status = self.executor.wait(job).await?;
        info!("Job {} finished: {status}", job.id);
        self.collect_results(&job.id, status.state)
    }

    /// Read a finished call job's result pair, then drop its payload unless files are kept
    pub fn collect_results(&self, job_id: &str, state: JobState) -> Result<CallResults> {
        let results = self.load_results(job_id, state)?;
        if !self.keep_files {
            remove_payload(&CallPaths::new(self.work_directory(), None, job_id).payload);
        }
        Ok(results)
    }

    /// Read a call job's result pair
    ///
    /// A missing result file means the worker never got to write it (killed, out of memory,
    /// never started) and is reported as [BridgeError::RemoteCrash].
    pub fn load_results(&self, job_id: &str, state: JobState) -> Result<CallResults> {
        let paths = CallPaths::new(self.work_directory(), None, job_id);
        match CallResults::read(&paths.result)? {
            Some(results) => Ok(results),
            None => Err(BridgeError::RemoteCrash {
                job_id: job_id.to_string(),
                state,
                path: paths.result,
            }),
        }
    }
}

fn remove_payload(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!("Can't remove payload {}: {}", path.display(), err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::local::LocalExecutor;
    use crate::test_util::scratch_dir;
    use serde_json::json;

    fn bridge(name: &str) -> Bridge {
        let executor = LocalExecutor::new(scratch_dir(name), &ExecutorSettings::default());
        // `true` stands in for a worker that exits without writing its result
        Bridge::from_executor(Box::new(executor), WorkerCommand::new("true"))
    }

    #[test]
    fn worker_arguments_use_the_worker_view() {
        let paths = CallPaths::new(Path::new("/home/me/work"), Some(Path::new("/vol/work")), "abc");
        let worker = WorkerCommand {
            executable: "apptainer".into(),
            args: vec!["exec".into(), "cb.sif".into(), "callbridge".into()],
        };
        assert_eq!(worker.arguments(&paths), vec![
            "exec", "cb.sif", "callbridge", "worker",
            "--payload", "/vol/work/abc.payload.json",
            "--result", "/vol/work/abc_out.json",
        ]);
    }

    #[tokio::test]
    async fn submit_call_writes_the_payload_and_submits_the_worker() {
        let bridge = bridge("bridge-submit").keep_files(true);
        let call = Call::new("sum").arg(1).unwrap().arg(2).unwrap();
        let mut job = bridge.submit_call(&call, &SpecOptions::default(), None).await.unwrap();

        let paths = CallPaths::new(bridge.work_directory(), None, &job.id);
        assert_eq!(Payload::read(&paths.payload).unwrap().call, call);
        let spec = job.spec.clone().unwrap();
        assert_eq!(spec.executable, "true");
        assert_eq!(spec.arguments[0], "worker");

        // `true` never writes a result
        let err = bridge.wait_for_results(&mut job).await.unwrap_err();
        let crashed = matches!(err, BridgeError::RemoteCrash { state: JobState::Completed, .. });
        assert!(crashed, "{err}");
    }

    #[tokio::test]
    async fn results_on_disk_are_returned_and_the_payload_cleaned_up() {
        let bridge = bridge("bridge-results");
        let options = SpecOptions::default();
        let mut job = bridge.submit_call(&Call::new("echo"), &options, None).await.unwrap();
        let paths = CallPaths::new(bridge.work_directory(), None, &job.id);
        CallResults::ok(json!("done")).write(&paths.result).unwrap();

        let results = bridge.wait_for_results(&mut job).await.unwrap();
        assert_eq!(results, CallResults::ok(json!("done")));
        assert!(!paths.payload.exists());
        assert!(paths.result.exists());
    }

    #[tokio::test]
    async fn resubmission_replaces_stale_files() {
        let bridge = bridge("bridge-resubmit").keep_files(true);
        let stale = Job::new();
        let paths = CallPaths::new(bridge.work_directory(), None, &stale.id);
        fs::write(&paths.payload, "stale payload").unwrap();
        CallResults::ok(json!("stale result")).write(&paths.result).unwrap();

        let call = Call::new("echo").arg("fresh").unwrap();
        let options = SpecOptions::default();
        let mut job = bridge.submit_call_job(stale, &call, &options, None).await.unwrap();
        assert_eq!(Payload::read(&paths.payload).unwrap().call, call);

        let err = bridge.wait_for_results(&mut job).await.unwrap_err();
        assert!(matches!(err, BridgeError::RemoteCrash { .. }), "{err}");
    }

    #[tokio::test]
    async fn refused_submissions_leave_no_payload() {
        let bridge = bridge("bridge-refused");
        // the local executor has no srun
        let options = SpecOptions { launcher: Some("srun".into()), ..SpecOptions::default() };
        let job = Job::new();
        let paths = CallPaths::new(bridge.work_directory(), None, &job.id);
        let call = Call::new("echo");
        let err = bridge.submit_call_job(job, &call, &options, None).await.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidSpec(_)), "{err}");
        assert!(!paths.payload.exists());
    }

    #[test]
    fn collecting_results_later_cleans_up_the_payload() {
        let dir = scratch_dir("bridge-collect");
        let executor = LocalExecutor::new(dir.clone(), &ExecutorSettings::default());
        let bridge = Bridge::from_executor(Box::new(executor), WorkerCommand::new("true"));
        let paths = CallPaths::new(&dir, None, "earlier");
        Payload::new(Call::new("echo")).create(&paths.payload).unwrap();
        CallResults::ok(json!(7)).write(&paths.result).unwrap();

        let results = bridge.collect_results("earlier", JobState::Completed).unwrap();
        assert_eq!(results, CallResults::ok(json!(7)));
        assert!(!paths.payload.exists());

        let kept = bridge.keep_files(true);
        Payload::new(Call::new("echo")).create(&paths.payload).unwrap();
        kept.collect_results("earlier", JobState::Completed).unwrap();
        assert!(paths.payload.exists());
    }

    #[tokio::test]
    async fn plain_commands_are_submitted_as_given() {
        let bridge = bridge("bridge-command");
        let arguments = vec!["-c".into(), "exit 0".into()];
        let mut job = bridge.submit("sh", arguments, &SpecOptions::default()).await.unwrap();
        assert_eq!(bridge.wait(&mut job).await.unwrap().state, JobState::Completed);
    }

    #[tokio::test]
    async fn concurrent_calls_keep_their_own_files() {
        let bridge = bridge("bridge-concurrent").keep_files(true);
        let first = Call::new("echo").arg("first").unwrap();
        let second = Call::new("echo").arg("second").unwrap();
        let options = SpecOptions::default();
        let (a, b) = tokio::join!(
            bridge.submit_call(&first, &options, None),
            bridge.submit_call(&second, &options, None),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.id, b.id);

        let dir = bridge.work_directory();
        assert_eq!(Payload::read(&CallPaths::new(dir, None, &a.id).payload).unwrap().call, first);
        assert_eq!(Payload::read(&CallPaths::new(dir, None, &b.id).payload).unwrap().call, second);
    }
}
