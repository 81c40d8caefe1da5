use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::{BridgeError, Result};

/// Bumped whenever the payload layout changes, workers refuse other versions
pub const PAYLOAD_VERSION: u32 = 1;

/// A function name plus the arguments to call it with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub function: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl Call {
    pub fn new(function: &str) -> Call {
        Call { function: function.to_string(), args: Vec::new(), kwargs: Map::new() }
    }

    pub fn arg<T: Serialize>(mut self, value: T) -> Result<Call> {
        let value = serde_json::to_value(value).map_err(BridgeError::serialization("argument"))?;
        self.args.push(value);
        Ok(self)
    }

    pub fn kwarg<T: Serialize>(mut self, name: &str, value: T) -> Result<Call> {
        let value = serde_json::to_value(value)
            .map_err(BridgeError::serialization(format!("keyword argument {name}")))?;
        self.kwargs.insert(name.to_string(), value);
        Ok(self)
    }
}

/// What is written to `{id}.payload.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub version: u32,
    #[serde(flatten)]
    pub call: Call,
}

impl Payload {
    pub fn new(call: Call) -> Payload {
        Payload { version: PAYLOAD_VERSION, call }
    }

    /// Write the payload, failing if the file already exists
    pub fn create(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(BridgeError::serialization("payload"))?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|err| match err.kind() {
                ErrorKind::AlreadyExists => BridgeError::IdentifierCollision(path.to_path_buf()),
                _ => BridgeError::io(format!("create payload {}", path.display()))(err),
            })?;
        file.write_all(&json)
            .map_err(BridgeError::io(format!("write payload {}", path.display())))
    }

    pub fn read(path: &Path) -> Result<Payload> {
        let bytes =
            fs::read(path).map_err(BridgeError::io(format!("read payload {}", path.display())))?;
        let payload: Payload =
            serde_json::from_slice(&bytes).map_err(BridgeError::serialization("payload"))?;
        if payload.version != PAYLOAD_VERSION {
            return Err(BridgeError::Serialization {
                what: "payload".to_string(),
                reason: format!(
                    "version {} is not supported, expected {PAYLOAD_VERSION}",
                    payload.version
                ),
            });
        }
        Ok(payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// The function returned an error
    Raised,
    Panicked,
    UnknownFunction,
    InvalidArguments,
    /// The worker couldn't read the payload it was given
    Payload,
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            RemoteErrorKind::Raised => "raised",
            RemoteErrorKind::Panicked => "panicked",
            RemoteErrorKind::UnknownFunction => "unknown function",
            RemoteErrorKind::InvalidArguments => "invalid arguments",
            RemoteErrorKind::Payload => "unreadable payload",
        };
        f.write_str(text)
    }
}

/// An error captured on the worker side
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
    /// Causes of the error, outermost first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<String>,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> RemoteError {
        RemoteError { kind, message: message.into(), chain: Vec::new() }
    }

    pub fn raised(err: &anyhow::Error) -> RemoteError {
        RemoteError {
            kind: RemoteErrorKind::Raised,
            message: err.to_string(),
            chain: err.chain().skip(1).map(|cause| cause.to_string()).collect(),
        }
    }
}

/// The result pair written to `{id}_out.json`
///
/// Exactly one of `result` and `error` is meaningful: a present error means the call failed
/// even if a result value was also written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResults {
    pub result: Option<Value>,
    pub error: Option<RemoteError>,
}

impl CallResults {
    pub fn ok(value: Value) -> CallResults {
        CallResults { result: Some(value), error: None }
    }

    pub fn err(error: RemoteError) -> CallResults {
        CallResults { result: None, error: Some(error) }
    }

    /// Unwrap the pair, payload problems count as serialisation errors
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(error) if error.kind == RemoteErrorKind::Payload => {
                let what = "payload".to_string();
                Err(BridgeError::Serialization { what, reason: error.message })
            }
            Some(error) => Err(BridgeError::Callable(error)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }

    /// Write via a temporary file and rename, so readers never see half a result
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(BridgeError::serialization("result"))?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        fs::write(&tmp, json).map_err(BridgeError::io(format!("write result {}", path.display())))?;
        fs::rename(&tmp, path)
            .map_err(BridgeError::io(format!("move result into {}", path.display())))
    }

    /// `Ok(None)` when the file doesn't exist
    pub fn read(path: &Path) -> Result<Option<CallResults>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(BridgeError::io(format!("read result {}", path.display()))(err)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(BridgeError::serialization("result"))
    }
}
