//! Remote function calls
//!
//! A call names a registered function and carries its arguments as JSON. The submitting side
//! writes a payload file next to the job, the worker reads it, runs the function and always
//! writes one result file with a `(result, error)` pair.

/// Payload and result pair file formats
pub mod payload;
/// Per-job file layout in the work directory
pub mod paths;
/// Named functions the worker can run
pub mod registry;
/// Worker entry point executed on the compute node
pub mod worker;

pub use paths::CallPaths;
pub use payload::{Call, CallResults, Payload, RemoteError, RemoteErrorKind, PAYLOAD_VERSION};
pub use registry::{Arguments, Registry};
