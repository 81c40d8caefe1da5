use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use serde_json::{Map, Value};

use callbridge::bridge::{Bridge, WorkerCommand};
use callbridge::call::{worker, Call, CallResults};
use callbridge::config::Config;
use callbridge::ledger::{JobKind, JobRecord, Ledger};
use callbridge::spec_file::SpecDocument;
use callbridge::{builtins, BridgeError, Job, JobState, SpecOptions};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
/// Run registered functions and commands as scheduler jobs
struct Args {
    /// Path to a JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// local, slurm or pbs
    #[arg(short, long)]
    executor: Option<String>,
    /// Where payloads, results and job scripts are written
    #[arg(short, long)]
    work_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a command as a job
    Submit {
        /// JSON job options document
        #[arg(long)]
        spec: Option<PathBuf>,
        /// Wait for the job to finish and exit with its state
        #[arg(long)]
        wait: bool,
        executable: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        arguments: Vec<String>,
    },
    /// Call a registered function in a job and print its result
    Call {
        function: String,
        /// Positional arguments as a JSON array
        #[arg(long, default_value = "[]")]
        args: String,
        /// Keyword arguments as a JSON object
        #[arg(long, default_value = "{}")]
        kwargs: String,
        #[arg(long)]
        spec: Option<PathBuf>,
        /// The work directory as mounted on compute nodes
        #[arg(long)]
        mount: Option<PathBuf>,
        /// Print the job id and exit after submission
        #[arg(long)]
        no_wait: bool,
    },
    /// Wait for a previously submitted job
    Wait { id: String },
    /// List submitted jobs, or show one
    Status { id: Option<String> },
    Cancel { id: String },
    /// List the functions this worker can run
    Functions,
    /// Run one payload and write its result (runs on the compute node)
    Worker {
        #[arg(long)]
        payload: PathBuf,
        #[arg(long)]
        result: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::Worker { payload, result } => {
            worker::run(&builtins::registry(), &payload, &result).context("write call result")?;
            Ok(())
        }
        Command::Functions => {
            builtins::registry().names().for_each(|name| println!("{name}"));
            Ok(())
        }
        command => {
            let config = Config::load(args.config.as_deref())?;
            let app = App::new(config, args.executor, args.work_dir)?;
            app.run(command).await
        }
    }
}

struct App {
    config: Config,
    executor: String,
    bridge: Bridge,
    ledger: Ledger,
}

impl App {
    fn new(config: Config, executor: Option<String>, work_dir: Option<PathBuf>) -> Result<App> {
        let executor = executor.unwrap_or_else(|| config.executor.clone());
        let work_dir = work_dir.or_else(|| config.work_directory.clone());
        let bridge = App::bridge(&config, &executor, work_dir)?;
        let ledger = Ledger::open(bridge.work_directory()).context("open job ledger")?;
        Ok(App { config, executor, bridge, ledger })
    }

    fn bridge(config: &Config, executor: &str, work_dir: Option<PathBuf>) -> Result<Bridge> {
        let bridge = Bridge::new(executor, work_dir, &config.executor_settings())?;
        Ok(match &config.worker_executable {
            Some(executable) => bridge.with_worker(WorkerCommand {
                executable: executable.clone(),
                args: config.worker_args.clone(),
            }),
            None => bridge,
        })
    }

    async fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Submit { spec, wait, executable, arguments } => {
                let options = self.options(spec)?;
                let mut job = self.bridge.submit(&executable, arguments, &options).await?;
                self.ledger.record_submission(&job, JobKind::Command, &self.executor)?;
                println!("{}", job.id);
                if wait {
                    let status = self.bridge.wait(&mut job).await?;
                    self.ledger.update_status(&job.id, &status)?;
                    info!("Job {} finished: {status}", job.id);
                    if status.state != JobState::Completed {
                        bail!("job {} {status}", job.id);
                    }
                }
                Ok(())
            }
            Command::Call { function, args, kwargs, spec, mount, no_wait } => {
                let call = parse_call(&function, &args, &kwargs)?;
                let options = self.options(spec)?;
                let mount = mount.or_else(|| self.config.worker_mount_directory.clone());
                let mut job = self.bridge.submit_call(&call, &options, mount.as_deref()).await?;
                self.ledger.record_submission(&job, JobKind::Call, &self.executor)?;
                if no_wait {
                    println!("{}", job.id);
                    return Ok(());
                }
                let results = self.bridge.wait_for_results(&mut job).await;
                self.ledger.update_status(&job.id, &job.status)?;
                print_results(results?)
            }
            Command::Wait { id } => self.wait(&id).await,
            Command::Status { id } => {
                let records = match id {
                    Some(id) => vec![self.record(&id)?],
                    None => self.ledger.list()?,
                };
                for record in records {
                    println!(
                        "{}\t{}\t{}\t{}\t{}\t{}",
                        record.id,
                        record.kind,
                        record.executor,
                        record.native_id.as_deref().unwrap_or("-"),
                        record.state,
                        record.updated_at.to_rfc3339()
                    );
                }
                Ok(())
            }
            Command::Cancel { id } => {
                let record = self.record(&id)?;
                let bridge = self.bridge_for(&record)?;
                let mut job = record.to_job();
                if job.status.state.is_final() {
                    warn!("Job {id} already {}", job.status.state);
                    return Ok(());
                }
                bridge.cancel(&mut job).await?;
                info!("Cancel requested for job {id}");
                Ok(())
            }
            Command::Functions | Command::Worker { .. } => {
                unreachable!("handled before loading config")
            }
        }
    }

    async fn wait(&self, id: &str) -> Result<()> {
        let record = self.record(id)?;
        let bridge = self.bridge_for(&record)?;
        let mut job: Job = record.to_job();
        let status = if job.status.state.is_final() {
            job.status.clone()
        } else {
            let status = bridge.wait(&mut job).await?;
            self.ledger.update_status(id, &status)?;
            status
        };
        info!("Job {id} finished: {status}");
        match record.kind {
            JobKind::Call => print_results(bridge.collect_results(id, status.state)?),
            JobKind::Command => {
                println!("{status}");
                Ok(())
            }
        }
    }

    fn record(&self, id: &str) -> Result<JobRecord> {
        let work_directory = self.bridge.work_directory().display();
        self.ledger.get(id)?.ok_or_else(|| anyhow!("no job {id} in {work_directory}"))
    }

    /// A bridge on the executor the job was submitted to
    fn bridge_for(&self, record: &JobRecord) -> Result<Bridge> {
        let work_directory = self.bridge.work_directory().to_path_buf();
        App::bridge(&self.config, &record.executor, Some(work_directory))
    }

    /// Job options from a document, with config defaults filling the gaps
    fn options(&self, spec: Option<PathBuf>) -> Result<SpecOptions> {
        let options = match spec {
            Some(path) => SpecDocument::new(&path)
                .read()
                .with_context(|| format!("job options {}", path.display()))?,
            None => SpecOptions::default(),
        };
        Ok(options.or(&self.config.defaults))
    }
}

fn parse_call(function: &str, args: &str, kwargs: &str) -> Result<Call> {
    let args: Vec<Value> = serde_json::from_str(args).context("--args must be a JSON array")?;
    let kwargs: Map<String, Value> =
        serde_json::from_str(kwargs).context("--kwargs must be a JSON object")?;
    Ok(Call { function: function.to_string(), args, kwargs })
}

/// Print a successful result as JSON, or fail with the remote error
fn print_results(results: CallResults) -> Result<()> {
    match results.into_result() {
        Ok(value) => {
            println!("{}", serde_json::to_string(&value)?);
            Ok(())
        }
        Err(BridgeError::Callable(err)) => {
            for cause in &err.chain {
                warn!("caused by: {cause}");
            }
            Err(BridgeError::Callable(err).into())
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_arguments_are_json() {
        let call = parse_call("sum", "[1, 2]", r#"{"scale": 2}"#).unwrap();
        assert_eq!(call.args, vec![json!(1), json!(2)]);
        assert_eq!(call.kwargs.get("scale"), Some(&json!(2)));
        assert!(parse_call("sum", "{}", "{}").is_err());
        assert!(parse_call("sum", "[]", "[]").is_err());
    }

    #[test]
    fn cli_parses() {
        let args = Args::parse_from([
            "callbridge", "--executor", "slurm", "call", "sum", "--args", "[1,2]", "--no-wait",
        ]);
        assert_eq!(args.executor.as_deref(), Some("slurm"));
        assert!(matches!(args.command, Command::Call { no_wait: true, .. }));

        let args = Args::parse_from(["callbridge", "submit", "--wait", "sh", "-c", "exit 1"]);
        match args.command {
            Command::Submit { wait, executable, arguments, .. } => {
                assert!(wait);
                assert_eq!(executable, "sh");
                assert_eq!(arguments, vec!["-c", "exit 1"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
