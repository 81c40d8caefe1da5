use std::collections::HashMap;
use std::path::Path;

use log::debug;
use serde::Deserialize;

use crate::executor::batch::{BatchCommands, BatchSystem};
use crate::job::duration::format_hms;
use crate::job::{JobSpec, JobState, JobStatus};

/// PBS Pro, jobs are described with #PBS headers
///
/// Custom attributes named `pbs.<flag>` are added as `#PBS -<flag> <value>`.
pub struct Pbs;

const PREFIX: &str = "pbs.";

/// PBS reports a job killed by signal N as exit status 256 + N, qdel sends SIGTERM
const KILLED_BY_QDEL: i32 = 256 + 15;

/// `qstat -f -x -F json`
#[derive(Debug, Deserialize)]
struct QstatOutput {
    #[serde(rename = "Jobs", default)]
    jobs: HashMap<String, QstatJob>,
}

#[derive(Debug, Deserialize)]
struct QstatJob {
    job_state: String,
    #[serde(rename = "Exit_status")]
    exit_status: Option<i32>,
}

impl BatchSystem for Pbs {
    fn name(&self) -> &'static str {
        "pbs"
    }

    fn script_extension(&self) -> &'static str {
        "pbs"
    }

    fn default_commands(&self) -> BatchCommands {
        BatchCommands {
            submit: "qsub".to_string(),
            status: "qstat".to_string(),
            cancel: "qdel".to_string(),
        }
    }

    fn directives(
        &self,
        job_id: &str,
        spec: &JobSpec,
        stdout: &Path,
        stderr: &Path,
    ) -> Vec<String> {
        let mut lines: Vec<String> = Vec::new();
        // PBS job names are limited to 15 characters on older servers
        let short_id = &job_id[..job_id.len().min(12)];
        let name = spec.name.clone().unwrap_or_else(|| format!("cb-{short_id}"));
        lines.push(format!("#PBS -N {name}"));
        lines.push(format!("#PBS -o {}", stdout.display()));
        lines.push(format!("#PBS -e {}", stderr.display()));

        if let Some(select) = select_statement(spec) {
            lines.push(format!("#PBS -l select={select}"));
        }
        if spec.resources.exclusive_node_use {
            lines.push("#PBS -l place=excl".to_string());
        }

        let attributes = &spec.attributes;
        if let Some(walltime) = &attributes.duration {
            lines.push(format!("#PBS -l walltime={}", format_hms(walltime)));
        }
        // reservations are queues in PBS Pro
        if let Some(queue) = attributes.queue_name.as_ref().or(attributes.reservation_id.as_ref()) {
            lines.push(format!("#PBS -q {queue}"));
        }
        if let Some(account) = &attributes.account {
            lines.push(format!("#PBS -A {account}"));
        }
        if spec.inherit_environment {
            lines.push("#PBS -V".to_string());
        }
        for (key, value) in &attributes.custom_attributes {
            match key.strip_prefix(PREFIX) {
                Some(flag) => lines.push(format!("#PBS -{flag} {value}")),
                None => debug!("Ignoring custom attribute {key} for pbs"),
            }
        }
        lines
    }

    fn multiple_launcher(&self, _spec: &JobSpec) -> Vec<String> {
        vec!["mpiexec".to_string()]
    }

    fn submit_args(&self, script: &Path) -> Vec<String> {
        vec![script.display().to_string()]
    }

    /// qsub prints `sequence.server`
    fn parse_submit_output(&self, stdout: &str) -> Result<String, String> {
        let id = stdout.lines().next().unwrap_or("").trim();
        let sequence = id.split('.').next().unwrap_or("");
        let numeric = sequence.chars().all(|c| c.is_ascii_digit() || c == '[' || c == ']');
        if sequence.is_empty() || !numeric {
            return Err(format!("unexpected qsub output {stdout:?}"));
        }
        Ok(id.to_string())
    }

    fn status_args(&self, native_id: &str) -> Vec<String> {
        ["-f", "-x", "-F", "json", native_id].iter().map(|arg| arg.to_string()).collect()
    }

    fn parse_status(&self, native_id: &str, stdout: &str) -> Result<Option<JobStatus>, String> {
        if stdout.trim().is_empty() {
            return Ok(None);
        }
        let output: QstatOutput =
            serde_json::from_str(stdout).map_err(|err| format!("can't parse qstat output: {err}"))?;
        let Some(job) = output.jobs.get(native_id).or_else(|| output.jobs.values().next()) else {
            return Ok(None);
        };

        let status = match job.job_state.as_str() {
            "Q" | "H" | "W" | "T" => JobStatus::new(JobState::Queued),
            "R" | "E" | "B" | "S" | "U" => JobStatus::new(JobState::Active),
            "F" | "X" => match job.exit_status {
                Some(0) => JobStatus::exited(0),
                Some(KILLED_BY_QDEL) | None => JobStatus::new(JobState::Canceled),
                Some(code) => JobStatus::exited(code),
            },
            other => return Err(format!("job {native_id} has unknown pbs state {other:?}")),
        };
        Ok(Some(status))
    }

    fn cancel_args(&self, native_id: &str) -> Vec<String> {
        vec![native_id.to_string()]
    }
}

/// `chunks:ncpus=..:mpiprocs=..:ngpus=..:mem=..`, or nothing when no resources were asked for
fn select_statement(spec: &JobSpec) -> Option<String> {
    let resources = &spec.resources;
    if resources.node_count.is_none()
        && resources.process_count.is_none()
        && resources.processes_per_node.is_none()
        && resources.cpu_cores_per_process.is_none()
        && resources.gpu_cores_per_process.is_none()
        && resources.memory.is_none()
    {
        return None;
    }

    let chunks = resources.node_count.unwrap_or(1).max(1);
    let mpiprocs = resources
        .processes_per_node
        .or_else(|| resources.process_count.map(|count| count.div_ceil(chunks)))
        .unwrap_or(1);
    let ncpus = mpiprocs * resources.cpu_cores_per_process.unwrap_or(1);

    let mut select = format!("{chunks}:ncpus={ncpus}:mpiprocs={mpiprocs}");
    if let Some(gpus) = resources.gpu_cores_per_process {
        select.push_str(&format!(":ngpus={}", gpus * mpiprocs));
    }
    if let Some(bytes) = resources.memory {
        select.push_str(&format!(":mem={}mb", bytes.div_ceil(1024 * 1024)));
    }
    Some(select)
}
