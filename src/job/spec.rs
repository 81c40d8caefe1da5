use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::job::duration;

/// Everything an executor needs to know to run one job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSpec {
    pub executable: String,
    pub arguments: Vec<String>,
    pub directory: Option<PathBuf>,
    pub name: Option<String>,
    pub inherit_environment: bool,
    pub environment: BTreeMap<String, String>,
    pub stdin_path: Option<PathBuf>,
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
    pub pre_launch: Option<PathBuf>,
    pub post_launch: Option<PathBuf>,
    pub launcher: Option<String>,
    pub resources: ResourceSpec,
    pub attributes: JobAttributes,
}

impl JobSpec {
    pub fn new(executable: &str) -> JobSpec {
        JobSpec {
            executable: executable.to_string(),
            arguments: Vec::new(),
            directory: None,
            name: None,
            inherit_environment: true,
            environment: BTreeMap::new(),
            stdin_path: None,
            stdout_path: None,
            stderr_path: None,
            pre_launch: None,
            post_launch: None,
            launcher: None,
            resources: ResourceSpec::default(),
            attributes: JobAttributes::default(),
        }
    }
}

/// Resource shape of a job, unset counts are left to the scheduler
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceSpec {
    pub node_count: Option<u32>,
    pub process_count: Option<u32>,
    pub processes_per_node: Option<u32>,
    pub cpu_cores_per_process: Option<u32>,
    pub gpu_cores_per_process: Option<u32>,
    pub exclusive_node_use: bool,
    /// bytes
    pub memory: Option<u64>,
}

/// Scheduling attributes
///
/// Custom attributes are passed to the scheduler verbatim when their key starts with the
/// executor name, e.g. `slurm.constraint` becomes `#SBATCH --constraint=...`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobAttributes {
    #[serde(with = "duration")]
    pub duration: Option<Duration>,
    pub queue_name: Option<String>,
    pub account: Option<String>,
    pub reservation_id: Option<String>,
    pub custom_attributes: BTreeMap<String, String>,
}

/// Optional job options, each one overrides the matching JobSpec default when present
///
/// This is what job option documents and the configuration file's `defaults` deserialise into.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SpecOptions {
    pub directory: Option<PathBuf>,
    pub name: Option<String>,
    pub inherit_environment: Option<bool>,
    pub environment: Option<BTreeMap<String, Value>>,
    pub stdin_path: Option<PathBuf>,
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
    pub pre_launch: Option<PathBuf>,
    pub post_launch: Option<PathBuf>,
    pub launcher: Option<String>,
    pub node_count: Option<u32>,
    pub process_count: Option<u32>,
    pub processes_per_node: Option<u32>,
    pub cpu_cores_per_process: Option<u32>,
    pub gpu_cores_per_process: Option<u32>,
    pub exclusive_node_use: Option<bool>,
    pub memory: Option<u64>,
    #[serde(default, with = "duration")]
    pub duration: Option<Duration>,
    pub queue_name: Option<String>,
    pub account: Option<String>,
    pub reservation_id: Option<String>,
    pub custom_attributes: Option<BTreeMap<String, Value>>,
}

impl SpecOptions {
    /// Fill every option missing here from `defaults`
    pub fn or(self, defaults: &SpecOptions) -> SpecOptions {
        let d = defaults.clone();
        SpecOptions {
            directory: self.directory.or(d.directory),
            name: self.name.or(d.name),
            inherit_environment: self.inherit_environment.or(d.inherit_environment),
            environment: self.environment.or(d.environment),
            stdin_path: self.stdin_path.or(d.stdin_path),
            stdout_path: self.stdout_path.or(d.stdout_path),
            stderr_path: self.stderr_path.or(d.stderr_path),
            pre_launch: self.pre_launch.or(d.pre_launch),
            post_launch: self.post_launch.or(d.post_launch),
            launcher: self.launcher.or(d.launcher),
            node_count: self.node_count.or(d.node_count),
            process_count: self.process_count.or(d.process_count),
            processes_per_node: self.processes_per_node.or(d.processes_per_node),
            cpu_cores_per_process: self.cpu_cores_per_process.or(d.cpu_cores_per_process),
            gpu_cores_per_process: self.gpu_cores_per_process.or(d.gpu_cores_per_process),
            exclusive_node_use: self.exclusive_node_use.or(d.exclusive_node_use),
            memory: self.memory.or(d.memory),
            duration: self.duration.or(d.duration),
            queue_name: self.queue_name.or(d.queue_name),
            account: self.account.or(d.account),
            reservation_id: self.reservation_id.or(d.reservation_id),
            custom_attributes: self.custom_attributes.or(d.custom_attributes),
        }
    }
}

/// Create a job specification and copy every option that is present onto it
///
/// No validation happens here; executors reject what their scheduler can't express.
pub fn config_spec(executable: &str, arguments: Vec<String>, options: &SpecOptions) -> JobSpec {
    let mut spec = JobSpec::new(executable);
    spec.arguments = arguments;

    if let Some(directory) = &options.directory {
        spec.directory = Some(directory.clone());
    }
    if let Some(name) = &options.name {
        spec.name = Some(name.clone());
    }
    if let Some(inherit) = options.inherit_environment {
        spec.inherit_environment = inherit;
    }
    if let Some(environment) = &options.environment {
        spec.environment = to_text_map(environment);
    }
    if let Some(path) = &options.stdin_path {
        spec.stdin_path = Some(path.clone());
    }
    if let Some(path) = &options.stdout_path {
        spec.stdout_path = Some(path.clone());
    }
    if let Some(path) = &options.stderr_path {
        spec.stderr_path = Some(path.clone());
    }
    if let Some(path) = &options.pre_launch {
        spec.pre_launch = Some(path.clone());
    }
    if let Some(path) = &options.post_launch {
        spec.post_launch = Some(path.clone());
    }
    if let Some(launcher) = &options.launcher {
        spec.launcher = Some(launcher.clone());
    }

    let resources = &mut spec.resources;
    if options.node_count.is_some() {
        resources.node_count = options.node_count;
    }
    if options.process_count.is_some() {
        resources.process_count = options.process_count;
    }
    if options.processes_per_node.is_some() {
        resources.processes_per_node = options.processes_per_node;
    }
    if options.cpu_cores_per_process.is_some() {
        resources.cpu_cores_per_process = options.cpu_cores_per_process;
    }
    if options.gpu_cores_per_process.is_some() {
        resources.gpu_cores_per_process = options.gpu_cores_per_process;
    }
    if let Some(exclusive) = options.exclusive_node_use {
        resources.exclusive_node_use = exclusive;
    }
    if options.memory.is_some() {
        resources.memory = options.memory;
    }

    let attributes = &mut spec.attributes;
    if options.duration.is_some() {
        attributes.duration = options.duration;
    }
    if let Some(queue) = &options.queue_name {
        attributes.queue_name = Some(queue.clone());
    }
    if let Some(account) = &options.account {
        attributes.account = Some(account.clone());
    }
    if let Some(reservation) = &options.reservation_id {
        attributes.reservation_id = Some(reservation.clone());
    }
    if let Some(custom) = &options.custom_attributes {
        attributes.custom_attributes = to_text_map(custom);
    }

    spec
}

/// Strings are taken as they are, anything else in its JSON form
fn to_text_map(values: &BTreeMap<String, Value>) -> BTreeMap<String, String> {
    values
        .iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), text)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_options_keep_defaults() {
        let spec = config_spec("/bin/true", vec![], &SpecOptions::default());
        assert_eq!(spec, JobSpec::new("/bin/true"));
        assert!(spec.inherit_environment);
        assert!(!spec.resources.exclusive_node_use);
    }

    #[test]
    fn present_options_are_copied() {
        let options: SpecOptions = serde_json::from_value(json!({
            "name": "align",
            "inherit_environment": false,
            "environment": { "OMP_NUM_THREADS": 4, "MODE": "fast" },
            "node_count": 2,
            "processes_per_node": 8,
            "exclusive_node_use": true,
            "memory": 1073741824u64,
            "duration": "1-00:00:00",
            "queue_name": "small",
            "account": "project_42",
            "custom_attributes": { "slurm.constraint": "gpu" }
        }))
        .unwrap();

        let spec = config_spec("python", vec!["run.py".into()], &options);
        assert_eq!(spec.executable, "python");
        assert_eq!(spec.arguments, vec!["run.py"]);
        assert_eq!(spec.name.as_deref(), Some("align"));
        assert!(!spec.inherit_environment);
        assert_eq!(spec.environment["OMP_NUM_THREADS"], "4");
        assert_eq!(spec.environment["MODE"], "fast");
        assert_eq!(spec.resources.node_count, Some(2));
        assert_eq!(spec.resources.processes_per_node, Some(8));
        assert!(spec.resources.exclusive_node_use);
        assert_eq!(spec.resources.memory, Some(1 << 30));
        assert_eq!(spec.attributes.duration, Some(Duration::from_secs(86_400)));
        assert_eq!(spec.attributes.queue_name.as_deref(), Some("small"));
        assert_eq!(spec.attributes.account.as_deref(), Some("project_42"));
        assert_eq!(spec.attributes.custom_attributes["slurm.constraint"], "gpu");
    }

    #[test]
    fn unknown_options_are_rejected() {
        let result = serde_json::from_value::<SpecOptions>(json!({ "queue": "small" }));
        assert!(result.is_err());
    }

    #[test]
    fn duration_accepts_seconds() {
        let options: SpecOptions = serde_json::from_value(json!({ "duration": 120 })).unwrap();
        assert_eq!(options.duration, Some(Duration::from_secs(120)));
    }

    #[test]
    fn explicit_options_win_over_defaults() {
        let defaults = SpecOptions {
            account: Some("default".into()),
            queue_name: Some("small".into()),
            ..SpecOptions::default()
        };
        let options = SpecOptions { queue_name: Some("large".into()), ..SpecOptions::default() };
        let merged = options.or(&defaults);
        assert_eq!(merged.queue_name.as_deref(), Some("large"));
        assert_eq!(merged.account.as_deref(), Some("default"));
    }
}
