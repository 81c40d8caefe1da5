use std::path::Path;

use log::debug;

use crate::executor::batch::{BatchCommands, BatchSystem};
use crate::job::duration::format_hms;
use crate::job::{JobSpec, JobState, JobStatus};

/// SLURM job options are parsed by sbatch from #SBATCH headers
/// [before executable commands](https://slurm.schedmd.com/sbatch.html#SECTION_DESCRIPTION)
///
/// Custom attributes named `slurm.<option>` are added as `#SBATCH --<option>=<value>`.
pub struct Slurm;

const PREFIX: &str = "slurm.";

impl BatchSystem for Slurm {
    fn name(&self) -> &'static str {
        "slurm"
    }

    fn script_extension(&self) -> &'static str {
        "slurm"
    }

    fn default_commands(&self) -> BatchCommands {
        BatchCommands {
            submit: "sbatch".to_string(),
            status: "sacct".to_string(),
            cancel: "scancel".to_string(),
        }
    }

    fn directives(
        &self,
        job_id: &str,
        spec: &JobSpec,
        stdout: &Path,
        stderr: &Path,
    ) -> Vec<String> {
        let mut options: Vec<(&str, String)> = Vec::new();
        let name = spec.name.clone().unwrap_or_else(|| format!("callbridge-{job_id}"));
        options.push(("job-name", name));
        if let Some(directory) = &spec.directory {
            options.push(("chdir", directory.display().to_string()));
        }
        options.push(("output", stdout.display().to_string()));
        options.push(("error", stderr.display().to_string()));

        let resources = &spec.resources;
        if let Some(nodes) = resources.node_count {
            options.push(("nodes", nodes.to_string()));
        }
        if let Some(tasks) = resources.process_count {
            options.push(("ntasks", tasks.to_string()));
        }
        if let Some(per_node) = resources.processes_per_node {
            options.push(("ntasks-per-node", per_node.to_string()));
        }
        if let Some(cpus) = resources.cpu_cores_per_process {
            options.push(("cpus-per-task", cpus.to_string()));
        }
        if let Some(gpus) = resources.gpu_cores_per_process {
            options.push(("gpus-per-task", gpus.to_string()));
        }
        if let Some(bytes) = resources.memory {
            // sbatch takes megabytes, never round down below what was asked for
            options.push(("mem", format!("{}M", bytes.div_ceil(1024 * 1024))));
        }

        let attributes = &spec.attributes;
        if let Some(walltime) = &attributes.duration {
            options.push(("time", format_hms(walltime)));
        }
        if let Some(queue) = &attributes.queue_name {
            options.push(("partition", queue.clone()));
        }
        if let Some(account) = &attributes.account {
            options.push(("account", account.clone()));
        }
        if let Some(reservation) = &attributes.reservation_id {
            options.push(("reservation", reservation.clone()));
        }
        if !spec.inherit_environment {
            options.push(("export", "NONE".to_string()));
        }

        let mut lines: Vec<String> = options
            .into_iter()
            .map(|(key, value)| format!("#SBATCH --{key}={value}"))
            .collect();
        if resources.exclusive_node_use {
            lines.push("#SBATCH --exclusive".to_string());
        }
        for (key, value) in &attributes.custom_attributes {
            match key.strip_prefix(PREFIX) {
                Some(option) => lines.push(format!("#SBATCH --{option}={value}")),
                None => debug!("Ignoring custom attribute {key} for slurm"),
            }
        }
        lines
    }

    fn multiple_launcher(&self, _spec: &JobSpec) -> Vec<String> {
        vec!["srun".to_string()]
    }

    fn submit_args(&self, script: &Path) -> Vec<String> {
        vec!["--parsable".to_string(), script.display().to_string()]
    }

    /// `--parsable` prints `jobid` or `jobid;cluster`
    fn parse_submit_output(&self, stdout: &str) -> Result<String, String> {
        let id = stdout.lines().next().unwrap_or("").split(';').next().unwrap_or("").trim();
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit() || c == '_') {
            return Err(format!("unexpected sbatch output {stdout:?}"));
        }
        Ok(id.to_string())
    }

    fn status_args(&self, native_id: &str) -> Vec<String> {
        ["-n", "-X", "-P", "-o", "State,ExitCode", "-j", native_id]
            .iter()
            .map(|arg| arg.to_string())
            .collect()
    }

    /// sacct prints `STATE|exit:signal`, nothing until the job reaches accounting
    fn parse_status(&self, native_id: &str, stdout: &str) -> Result<Option<JobStatus>, String> {
        let Some(line) = stdout.lines().map(str::trim).find(|line| !line.is_empty()) else {
            return Ok(None);
        };
        let mut fields = line.split('|');
        let raw_state = fields.next().unwrap_or("");
        // e.g. "CANCELLED by 1000"
        let state_word = raw_state.split_whitespace().next().unwrap_or("");
        let state = match state_word {
            "PENDING" | "REQUEUED" | "REQUEUE_FED" | "REQUEUE_HOLD" | "CONFIGURING" => {
                JobState::Queued
            }
            "RUNNING" | "COMPLETING" | "SUSPENDED" | "STOPPED" | "RESIZING" | "SIGNALING"
            | "STAGE_OUT" => JobState::Active,
            "COMPLETED" => JobState::Completed,
            "CANCELLED" => JobState::Canceled,
            "FAILED" | "TIMEOUT" | "NODE_FAIL" | "OUT_OF_MEMORY" | "BOOT_FAIL" | "DEADLINE"
            | "PREEMPTED" | "REVOKED" => JobState::Failed,
            other => return Err(format!("job {native_id} has unknown slurm state {other:?}")),
        };

        let mut status = JobStatus::new(state);
        if state.is_final() {
            status.exit_code = fields
                .next()
                .and_then(|exit| exit.split(':').next())
                .and_then(|code| code.trim().parse().ok());
            if state == JobState::Failed {
                status.message = Some(raw_state.to_string());
            }
        }
        Ok(Some(status))
    }

    fn cancel_args(&self, native_id: &str) -> Vec<String> {
        vec![native_id.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{config_spec, SpecOptions};
    use serde_json::json;

    fn spec(options: serde_json::Value) -> JobSpec {
        let options: SpecOptions = serde_json::from_value(options).unwrap();
        config_spec("python", vec![], &options)
    }

    #[test]
    fn directives_cover_resources_and_attributes() {
        let spec = spec(json!({
            "name": "fit",
            "node_count": 2,
            "process_count": 16,
            "cpu_cores_per_process": 4,
            "exclusive_node_use": true,
            "memory": 1_500_000_000u64,
            "duration": "1-02:00:00",
            "queue_name": "small",
            "account": "project_2004504",
            "inherit_environment": false,
            "custom_attributes": { "slurm.constraint": "v100", "pbs.l": "ignored" }
        }));
        let (stdout, stderr) = (Path::new("/w/abc.out"), Path::new("/w/abc.err"));
        let lines = Slurm.directives("abc", &spec, stdout, stderr);
        assert_eq!(lines, vec![
            "#SBATCH --job-name=fit",
            "#SBATCH --output=/w/abc.out",
            "#SBATCH --error=/w/abc.err",
            "#SBATCH --nodes=2",
            "#SBATCH --ntasks=16",
            "#SBATCH --cpus-per-task=4",
            "#SBATCH --mem=1431M",
            "#SBATCH --time=26:00:00",
            "#SBATCH --partition=small",
            "#SBATCH --account=project_2004504",
            "#SBATCH --export=NONE",
            "#SBATCH --exclusive",
            "#SBATCH --constraint=v100",
        ]);
    }

    #[test]
    fn unnamed_jobs_are_named_after_their_id() {
        let lines = Slurm.directives("abc", &spec(json!({})), Path::new("o"), Path::new("e"));
        assert_eq!(lines[0], "#SBATCH --job-name=callbridge-abc");
    }

    #[test]
    fn parses_parsable_sbatch_output() {
        assert_eq!(Slurm.parse_submit_output("12345\n"), Ok("12345".to_string()));
        assert_eq!(Slurm.parse_submit_output("12345;puhti\n"), Ok("12345".to_string()));
        assert!(Slurm.parse_submit_output("").is_err());
        assert!(Slurm.parse_submit_output("sbatch: error: invalid partition").is_err());
    }

    #[test]
    fn parses_sacct_states() {
        assert_eq!(Slurm.parse_status("1", "").unwrap(), None);
        let state = |line: &str| Slurm.parse_status("1", line).unwrap().unwrap().state;
        assert_eq!(state("PENDING|0:0\n"), JobState::Queued);
        assert_eq!(state("RUNNING|0:0\n"), JobState::Active);

        let done = Slurm.parse_status("1", "COMPLETED|0:0\n").unwrap().unwrap();
        assert_eq!((done.state, done.exit_code), (JobState::Completed, Some(0)));

        let failed = Slurm.parse_status("1", "OUT_OF_MEMORY|0:125\n").unwrap().unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.message.as_deref(), Some("OUT_OF_MEMORY"));

        let failed = Slurm.parse_status("1", "FAILED|2:0\n").unwrap().unwrap();
        assert_eq!(failed.exit_code, Some(2));

        let canceled = Slurm.parse_status("1", "CANCELLED by 1000|0:15\n").unwrap().unwrap();
        assert_eq!(canceled.state, JobState::Canceled);

        assert!(Slurm.parse_status("1", "WHATEVER|0:0").is_err());
    }
}
