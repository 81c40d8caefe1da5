use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use anyhow::{anyhow, Context};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::call::payload::{Call, CallResults, RemoteError, RemoteErrorKind};

/// Positional and keyword arguments of a call, as the function sees them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl Arguments {
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> anyhow::Result<T> {
        let value = self.args.get(index).ok_or_else(|| anyhow!("missing argument {index}"))?;
        serde_json::from_value(value.clone()).with_context(|| format!("argument {index}"))
    }

    /// `Ok(None)` when the keyword wasn't given
    pub fn kwarg<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<Option<T>> {
        match self.kwargs.get(name) {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .with_context(|| format!("keyword argument {name}")),
            None => Ok(None),
        }
    }
}

type Function = Box<dyn Fn(&Arguments) -> Result<Value, RemoteError> + Send + Sync>;

/// Functions a worker knows how to run, by name
///
/// The worker binary and the submitting program must agree on the names; arguments and results
/// cross the wire as JSON.
#[derive(Default)]
pub struct Registry {
    functions: BTreeMap<String, Function>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Register a function that works on raw JSON arguments
    pub fn register<F>(&mut self, name: &str, function: F) -> &mut Registry
    where
        F: Fn(&Arguments) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let wrapped = move |arguments: &Arguments| {
            function(arguments).map_err(|err| RemoteError::raised(&err))
        };
        self.functions.insert(name.to_string(), Box::new(wrapped));
        self
    }

    /// Register a function whose positional arguments deserialise into `A`
    ///
    /// `A` is usually a tuple, so `|(a, b): (i64, i64)|` takes exactly two integers.
    pub fn register_typed<A, R, F>(&mut self, name: &str, function: F) -> &mut Registry
    where
        A: DeserializeOwned,
        R: Serialize,
        F: Fn(A) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let name_owned = name.to_string();
        let wrapped = move |arguments: &Arguments| {
            if !arguments.kwargs.is_empty() {
                return Err(RemoteError::new(
                    RemoteErrorKind::InvalidArguments,
                    format!("{name_owned} takes no keyword arguments"),
                ));
            }
            let positional = Value::Array(arguments.args.clone());
            let input: A = serde_json::from_value(positional).map_err(|err| {
                RemoteError::new(RemoteErrorKind::InvalidArguments, format!("{name_owned}: {err}"))
            })?;
            let output = function(input).map_err(|err| RemoteError::raised(&err))?;
            serde_json::to_value(output).map_err(|err| {
                RemoteError::new(RemoteErrorKind::Raised, format!("can't serialise result: {err}"))
            })
        };
        self.functions.insert(name.to_string(), Box::new(wrapped));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// Run a call and capture every way it can fail in the result pair
    pub fn invoke(&self, call: &Call) -> CallResults {
        let Some(function) = self.functions.get(&call.function) else {
            return CallResults::err(RemoteError::new(
                RemoteErrorKind::UnknownFunction,
                format!("no function named {:?} is registered", call.function),
            ));
        };
        let arguments = Arguments { args: call.args.clone(), kwargs: call.kwargs.clone() };

        match panic::catch_unwind(AssertUnwindSafe(|| function(&arguments))) {
            Ok(Ok(value)) => CallResults::ok(value),
            Ok(Err(error)) => CallResults::err(error),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "function panicked".to_string());
                CallResults::err(RemoteError::new(RemoteErrorKind::Panicked, message))
            }
        }
    }
}
