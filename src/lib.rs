//! Run registered functions as scheduler jobs and collect their results
//!
//! A [Bridge] writes a payload naming a function and its JSON arguments, submits a job that runs
//! the `callbridge worker` on it, and reads back the `{ result, error }` pair the worker leaves
//! next to the payload.

pub mod error;
/// Job specifications, handles and states
pub mod job;
/// Payloads, result pairs, the function registry and the worker side
pub mod call;
/// Local and batch scheduler executors
pub mod executor;
pub mod bridge;
/// Job option documents validated against a JSON schema
pub mod spec_file;
pub mod ledger;
pub mod config;
pub mod builtins;

pub use bridge::{Bridge, WorkerCommand};
pub use call::{Call, CallResults, Registry, RemoteError, RemoteErrorKind};
pub use error::{BridgeError, Result};
pub use executor::{get_instance, ExecutorSettings, JobExecutor};
pub use job::{config_spec, Job, JobSpec, JobState, JobStatus, SpecOptions};
