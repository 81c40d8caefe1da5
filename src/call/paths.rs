use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::{BridgeError, Result};

/// Where a call job keeps its payload and result
///
/// `payload` and `result` are what the submitting host reads and writes. The `worker_*` paths are
/// the same files as seen from the compute node, which differ when the shared filesystem is
/// mounted somewhere else there.
#[derive(Debug, Clone, PartialEq)]
pub struct CallPaths {
    pub payload: PathBuf,
    pub result: PathBuf,
    pub worker_payload: PathBuf,
    pub worker_result: PathBuf,
}

impl CallPaths {
    pub fn new(work_directory: &Path, worker_mount: Option<&Path>, job_id: &str) -> CallPaths {
        let payload_name = format!("{job_id}.payload.json");
        let result_name = format!("{job_id}_out.json");
        let worker_root = worker_mount.unwrap_or(work_directory);
        CallPaths {
            payload: work_directory.join(&payload_name),
            result: work_directory.join(&result_name),
            worker_payload: worker_root.join(payload_name),
            worker_result: worker_root.join(result_name),
        }
    }

    /// Remove files left over from an earlier job with the same id
    ///
    /// Missing files are fine, anything else (permissions, a directory in the way) is an error.
    pub fn clear_stale(&self) -> Result<()> {
        for path in [&self.payload, &self.result] {
            match fs::remove_file(path) {
                Ok(()) => warn!("Removed stale file {}", path.display()),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!("No stale file at {}", path.display())
                }
                Err(err) => {
                    return Err(BridgeError::Io {
                        context: format!("remove stale file {}", path.display()),
                        source: err,
                    })
                }
            }
        }
        Ok(())
    }
}
