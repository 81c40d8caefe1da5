use chrono::Utc;
use serde::Serialize;
use tinytemplate::TinyTemplate;

use crate::error::{BridgeError, Result};
use crate::job::JobSpec;

/// Rendered shell script that runs one job
///
/// Batch schedulers read their options from the directive comments at the top; the local
/// executor renders the same script without directives and runs it with /bin/sh.
pub struct JobScript {
    pub content: String,
}

/// Rendering context for the job script
#[derive(Serialize)]
struct ScriptContext {
    job_id: String,
    time_now: String,
    directives: Vec<String>,
    directory: Option<String>,
    exports: Vec<String>,
    pre_launch: Option<String>,
    command: String,
    post_launch: Option<String>,
}

/// How the job's executable is started inside the allocation
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Launcher {
    /// Run the executable once
    Single,
    /// One copy per process, using the scheduler's own launcher
    Multiple,
    Srun,
    Mpirun,
}

impl Launcher {
    pub fn from_spec(spec: &JobSpec) -> Result<Launcher> {
        match spec.launcher.as_deref() {
            None | Some("single") => Ok(Launcher::Single),
            Some("multiple") => Ok(Launcher::Multiple),
            Some("srun") => Ok(Launcher::Srun),
            Some("mpirun") => Ok(Launcher::Mpirun),
            Some(other) => Err(BridgeError::InvalidSpec(format!(
                "unknown launcher {other:?} (expected single, multiple, srun or mpirun)"
            ))),
        }
    }

    pub fn mpirun_prefix(spec: &JobSpec) -> Vec<String> {
        let mut prefix = vec!["mpirun".to_string()];
        if let Some(count) = spec.resources.process_count {
            prefix.push("-np".to_string());
            prefix.push(count.to_string());
        }
        prefix
    }
}

/// Render the job script for `spec`, the launcher prefix goes in front of the executable
pub fn render(
    job_id: &str,
    spec: &JobSpec,
    directives: Vec<String>,
    launcher_prefix: Vec<String>,
) -> Result<JobScript> {
    /// included job script template
    static JOB: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/job.sh"));
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&tinytemplate::format_unescaped);
    tt.add_template("job", JOB)?;

    let context = ScriptContext {
        job_id: job_id.to_string(),
        time_now: Utc::now().to_rfc3339(),
        directives,
        directory: spec.directory.as_ref().map(|dir| shell_quote(&dir.to_string_lossy())),
        exports: spec
            .environment
            .iter()
            .map(|(key, value)| format!("{key}={}", shell_quote(value)))
            .collect(),
        pre_launch: spec.pre_launch.as_ref().map(|path| shell_quote(&path.to_string_lossy())),
        command: command_line(spec, launcher_prefix),
        post_launch: spec.post_launch.as_ref().map(|path| shell_quote(&path.to_string_lossy())),
    };

    Ok(JobScript { content: tt.render("job", &context)? })
}

fn command_line(spec: &JobSpec, launcher_prefix: Vec<String>) -> String {
    let mut words: Vec<String> = launcher_prefix.iter().map(|word| shell_quote(word)).collect();
    words.push(shell_quote(&spec.executable));
    words.extend(spec.arguments.iter().map(|arg| shell_quote(arg)));
    let mut line = words.join(" ");
    if let Some(stdin) = &spec.stdin_path {
        line.push_str(" < ");
        line.push_str(&shell_quote(&stdin.to_string_lossy()));
    }
    line
}

/// Quote a word for /bin/sh unless it is made only of safe characters
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word.chars().all(|c| c.is_ascii_alphanumeric() || "_-./:=,+@%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
