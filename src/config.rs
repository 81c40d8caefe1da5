//! Configuration file for callbridge
//!
//! Every key is optional. Command line flags win over the file, the file wins over the
//! built in defaults.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::from_reader;

use crate::executor::{CommandOverrides, ExecutorSettings};
use crate::job::SpecOptions;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// local, slurm or pbs
    pub executor: String,
    pub work_directory: Option<PathBuf>,
    /// The work directory as mounted on compute nodes, when that differs
    pub worker_mount_directory: Option<PathBuf>,
    /// Worker program on compute nodes, defaults to this executable
    pub worker_executable: Option<String>,
    /// Arguments placed before the `worker` subcommand
    pub worker_args: Vec<String>,
    pub keep_files: bool,
    pub poll_interval_secs: u64,
    pub commands: CommandOverrides,
    /// Job options applied to every submission unless the job sets them itself
    pub defaults: SpecOptions,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            executor: "local".to_string(),
            work_directory: None,
            worker_mount_directory: None,
            worker_executable: None,
            worker_args: Vec::new(),
            keep_files: false,
            poll_interval_secs: 5,
            commands: CommandOverrides::default(),
            defaults: SpecOptions::default(),
        }
    }
}

impl Config {
    pub fn read_config(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open config {}", path.display()))?;
        let reader = BufReader::new(file);
        let config =
            from_reader(reader).with_context(|| format!("parse config {}", path.display()))?;
        Ok(config)
    }

    /// The config file when one is given, defaults otherwise
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Config::read_config(path),
            None => Ok(Config::default()),
        }
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            keep_files: self.keep_files,
            commands: self.commands.clone(),
        }
    }
}
