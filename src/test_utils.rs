//! Helpers that play the instrumentation layer in tests.

use crate::engine::FaultEngine;
use crate::primitives::{CallOutcome, CallSite, Payload};
use crate::types::{RequestId, ValueKind};
use std::collections::BTreeMap;

/// Issues one instrumented call: asks the engine for a decision, applies
/// it, and reports the outcome back.
///
/// * exception faults fail the call with the exception name,
/// * byzantine faults skip `real` and return the value cast to `returns`,
/// * transformer faults run `real` and return the mutated payload.
///
/// Engine errors surface as `Err("engine: ...")`.
pub fn invoke(
    engine: &FaultEngine,
    request: RequestId,
    site: &CallSite,
    returns: ValueKind,
    real: impl FnOnce() -> Result<Payload, String>,
) -> Result<Payload, String> {
    let call = engine.before_call(request, site).map_err(engine_err)?;
    let (outcome, result) = match &call.fault {
        Some(decision) => {
            if let Some((name, metadata)) = decision.exception() {
                let error = describe_exception(name, metadata);
                (CallOutcome::failed(error.clone()), Err(error))
            } else if let Some(cast) = decision.byzantine_as(returns) {
                match cast {
                    Ok(value) => (CallOutcome::success(value.clone()), Ok(value)),
                    Err(error) => {
                        let message = error.to_string();
                        (CallOutcome::InjectionFailed { error }, Err(message))
                    }
                }
            } else {
                let value = decision.transformed().cloned().unwrap_or_default();
                // The real call still happens; only its response is replaced.
                let _ = real();
                (CallOutcome::success(value.clone()), Ok(value))
            }
        }
        None => match real() {
            Ok(value) => (CallOutcome::success(value.clone()), Ok(value)),
            Err(error) => (CallOutcome::failed(error.clone()), Err(error)),
        },
    };
    engine
        .after_call(request, &call.execution_index, outcome)
        .map_err(engine_err)?;
    result
}

/// [`invoke`] for a call that returns a string.
pub fn invoke_text(
    engine: &FaultEngine,
    request: RequestId,
    site: &CallSite,
    response: &str,
) -> Result<Payload, String> {
    invoke(engine, request, site, ValueKind::String, || Ok(Payload::from(response)))
}

pub fn engine_err(e: impl std::fmt::Display) -> String {
    format!("engine: {e}")
}

fn describe_exception(name: &str, metadata: &BTreeMap<String, String>) -> String {
    if metadata.is_empty() {
        name.to_string()
    } else {
        let pairs: Vec<String> = metadata.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{name}({})", pairs.join(", "))
    }
}
