use std::io;
use std::path::PathBuf;
use std::result;

use thiserror::Error;

use crate::call::RemoteError;
use crate::job::JobState;

/// Everything that can go wrong between building a job and reading its result back
///
/// Infrastructure failures (rejected submission, missing result file, unreadable payload) each
/// get their own variant so callers can tell them apart from an error raised by the remote
/// function itself.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("unknown job executor {0:?} (expected local, slurm or pbs)")]
    UnknownExecutor(String),
    #[error("invalid job specification: {0}")]
    InvalidSpec(String),
    #[error("job {job_id} was rejected by {executor}: {reason}")]
    SubmissionRejected {
        job_id: String,
        executor: String,
        reason: String,
    },
    #[error("job {job_id} finished as {state} without writing {}", path.display())]
    RemoteCrash {
        job_id: String,
        state: JobState,
        path: PathBuf,
    },
    #[error("remote call failed: {0}")]
    Callable(RemoteError),
    #[error("can't serialise {what}: {reason}")]
    Serialization { what: String, reason: String },
    #[error("payload {} already exists, another submission owns this job id", .0.display())]
    IdentifierCollision(PathBuf),
    #[error("job {0} was not started by this executor and can't be waited on")]
    Detached(String),
    #[error("scheduler query failed: {0}")]
    Scheduler(String),
    #[error("job script template: {0}")]
    Template(#[from] tinytemplate::error::Error),
    #[error("job ledger: {0}")]
    Ledger(#[from] rusqlite::Error),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl BridgeError {
    /// Wrap an io::Error with the operation and path that caused it
    pub fn io(context: impl Into<String>) -> impl FnOnce(io::Error) -> BridgeError {
        let context = context.into();
        move |source| BridgeError::Io { context, source }
    }

    pub fn serialization(what: impl Into<String>) -> impl FnOnce(serde_json::Error) -> BridgeError {
        let what = what.into();
        move |err| BridgeError::Serialization { what, reason: err.to_string() }
    }
}

pub type Result<T> = result::Result<T, BridgeError>;
