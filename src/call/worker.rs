use std::path::Path;

use log::{error, info};

use crate::call::payload::{CallResults, Payload, RemoteError, RemoteErrorKind};
use crate::call::registry::Registry;
use crate::error::Result;

/// Execute one payload and write its result pair
///
/// Whatever happens to the payload or the function, exactly one result file is written. The only
/// error returned is failing to write that file, in which case the submitter will see the job as
/// crashed.
pub fn run(registry: &Registry, payload_path: &Path, result_path: &Path) -> Result<CallResults> {
    info!("Loading payload {}", payload_path.display());
    let results = match Payload::read(payload_path) {
        Ok(payload) => {
            let call = &payload.call;
            info!(
                "Calling {} with {} positional and {} keyword arguments",
                call.function,
                call.args.len(),
                call.kwargs.len()
            );
            registry.invoke(&payload.call)
        }
        Err(err) => {
            error!("Can't load payload: {err}");
            CallResults::err(RemoteError::new(RemoteErrorKind::Payload, err.to_string()))
        }
    };

    if let Some(err) = &results.error {
        info!("Call failed, {err}");
    }
    info!("Writing result to {}", result_path.display());
    results.write(result_path)?;
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::payload::Call;
    use crate::test_util::scratch_dir;
    use serde_json::json;
    use std::fs;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register_typed("double", |(x,): (f64,)| Ok(x * 2.0));
        registry
    }

    #[test]
    fn writes_the_function_result() {
        let dir = scratch_dir("worker-ok");
        let payload = dir.join("a.payload.json");
        let result = dir.join("a_out.json");
        Payload::new(Call::new("double").arg(21.0).unwrap()).create(&payload).unwrap();

        run(&registry(), &payload, &result).unwrap();
        let written = CallResults::read(&result).unwrap().unwrap();
        assert_eq!(written, CallResults::ok(json!(42.0)));
    }

    #[test]
    fn unreadable_payload_still_produces_a_result() {
        let dir = scratch_dir("worker-bad-payload");
        let payload = dir.join("a.payload.json");
        let result = dir.join("a_out.json");
        fs::write(&payload, "not json").unwrap();

        run(&registry(), &payload, &result).unwrap();
        let error = CallResults::read(&result).unwrap().unwrap().error.unwrap();
        assert_eq!(error.kind, RemoteErrorKind::Payload);
    }

    #[test]
    fn missing_payload_still_produces_a_result() {
        let dir = scratch_dir("worker-no-payload");
        let result = dir.join("a_out.json");
        run(&registry(), &dir.join("a.payload.json"), &result).unwrap();
        assert!(CallResults::read(&result).unwrap().unwrap().error.is_some());
    }

    #[test]
    fn fails_only_when_the_result_cannot_be_written() {
        let dir = scratch_dir("worker-no-result");
        let payload = dir.join("a.payload.json");
        Payload::new(Call::new("double").arg(1.0).unwrap()).create(&payload).unwrap();
        let result = dir.join("missing-dir").join("a_out.json");
        assert!(run(&registry(), &payload, &result).is_err());
    }
}
