//! Job option documents
//!
//! Job options can be kept in a JSON file and passed to `submit` and `call`. The document is
//! validated against a bundled JSON schema before it is deserialised, so a typo in a key or a
//! negative node count is reported with the schema's message instead of a serde error.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use jsonschema::JSONSchema;
use log::{info, warn};
use serde_json::Value;

use crate::job::SpecOptions;

#[derive(Debug)]
pub enum SpecFileError {
    ReadError(String),
    JSONDecodeError(String),
    JSONValidationError(Vec<String>),
    DeserialisationError(String),
}

impl fmt::Display for SpecFileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SpecFileError::ReadError(err) => write!(f, "can't read job options: {err}"),
            SpecFileError::JSONDecodeError(err) => {
                write!(f, "job options aren't valid JSON: {err}")
            }
            SpecFileError::JSONValidationError(errors) => {
                write!(f, "job options fail validation: {}", errors.join("; "))
            }
            SpecFileError::DeserialisationError(err) => write!(f, "can't use job options: {err}"),
        }
    }
}

impl std::error::Error for SpecFileError {}

/// Compile the bundled job options schema
pub fn load_schema() -> JSONSchema {
    /// included job options schema
    static SCHEMA: &str =
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/schema/spec_options.json"));
    let schema: Value = serde_json::from_str(SCHEMA).expect("bundled schema is valid JSON");
    JSONSchema::compile(&schema).expect("bundled schema compiles")
}

pub struct SpecDocument {
    pub path: PathBuf,
    pub compiled_schema: JSONSchema,
}

impl SpecDocument {
    pub fn new(path: &Path) -> SpecDocument {
        SpecDocument { path: path.to_path_buf(), compiled_schema: load_schema() }
    }

    pub fn read(&self) -> Result<SpecOptions, SpecFileError> {
        let json = self.parse_untyped_json()?;
        self.parse_value(json)
    }

    /// Validate and deserialise an already parsed document
    pub fn parse_value(&self, json: Value) -> Result<SpecOptions, SpecFileError> {
        match self.validate(&json) {
            Ok(()) => {
                info!("Job options are valid");
                self.parse_json(json)
            }
            Err(err) => {
                warn!("Job options fail validation");
                Err(err)
            }
        }
    }

    fn validate(&self, json: &Value) -> Result<(), SpecFileError> {
        info!("Validating job options against JSON schema");
        self.compiled_schema.validate(json).map_err(|errors| {
            let messages = errors
                .map(|err| match err.instance_path.to_string() {
                    path if path.is_empty() => err.to_string(),
                    path => format!("{path}: {err}"),
                })
                .collect();
            SpecFileError::JSONValidationError(messages)
        })
    }

    fn read_file(&self) -> Result<String, SpecFileError> {
        let path: &Path = self.path.as_path();
        info!("Reading job options at {}", path.display());
        fs::read_to_string(path).map_err(|err| {
            warn!("Can't read job options at path {}: {}", path.display(), err);
            SpecFileError::ReadError(format!("{}: {err}", path.display()))
        })
    }

    fn parse_json(&self, value: Value) -> Result<SpecOptions, SpecFileError> {
        serde_json::from_value::<SpecOptions>(value)
            .map_err(|err| SpecFileError::DeserialisationError(err.to_string()))
    }

    fn parse_untyped_json(&self) -> Result<Value, SpecFileError> {
        let json_string = self.read_file()?;
        serde_json::from_str::<Value>(&json_string)
            .map_err(|err| SpecFileError::JSONDecodeError(err.to_string()))
    }
}
