//! Functions the `callbridge` worker can run out of the box
//!
//! Programs with their own functions build a [Registry] and call [crate::call::worker::run]
//! from their own worker binary.

use std::fs;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail};
use serde_json::{json, Value};

use crate::call::Registry;

pub fn registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register("echo", |arguments| {
            Ok(match arguments.args.as_slice() {
                [single] => single.clone(),
                many => Value::Array(many.to_vec()),
            })
        })
        .register_typed("sum", |numbers: Vec<f64>| Ok(numbers.iter().sum::<f64>()))
        .register("fail", |arguments| {
            let message: Option<String> = arguments.kwarg("message")?;
            bail!(message.unwrap_or_else(|| "failed on request".to_string()))
        })
        .register("sleep", |arguments| {
            let seconds: f64 = arguments.arg(0)?;
            if !(0.0..=86_400.0).contains(&seconds) {
                return Err(anyhow!("can't sleep for {seconds} seconds"));
            }
            thread::sleep(Duration::from_secs_f64(seconds));
            Ok(json!(seconds))
        })
        .register("hostname", |_| Ok(json!(hostname())));
    registry
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| fs::read_to_string("/proc/sys/kernel/hostname").ok())
        .or_else(|| fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
