//! Deno ops for the napa JavaScript runtime.
//!
//! Ops are the bridge between JavaScript and Rust. Each isolate gets a
//! `WorkerScope` in its OpState; ops read container state from it directly.

use std::sync::Arc;

use deno_core::op2;
use deno_core::OpState;
use serde::Serialize;

use crate::globals::GlobalStore;

/// Per-isolate state stored in OpState.
#[derive(Clone)]
pub(crate) struct WorkerScope {
    /// Owning container
    pub container_id: String,
    /// Index of the worker within the container
    pub worker_id: usize,
    /// Values shared across the container
    pub globals: Arc<GlobalStore>,
}

/// Synchronous logging op - writes to the Rust tracing system.
#[op2(fast)]
pub fn op_log(#[string] level: &str, #[string] msg: &str) {
    match level {
        "error" => tracing::error!(target: "napa::js", "{}", msg),
        "warn" => tracing::warn!(target: "napa::js", "{}", msg),
        "debug" => tracing::debug!(target: "napa::js", "{}", msg),
        "trace" => tracing::trace!(target: "napa::js", "{}", msg),
        _ => tracing::info!(target: "napa::js", "{}", msg),
    }
}

/// Get the current timestamp in milliseconds.
#[op2(fast)]
#[bigint]
pub fn op_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A global value found for JavaScript. Wrapped so a stored `null` is told
/// apart from a missing key.
#[derive(Serialize)]
pub struct GlobalEntry {
    value: serde_json::Value,
}

/// Read a container global value.
#[op2]
#[serde]
pub fn op_global_get(state: &mut OpState, #[string] key: String) -> Option<GlobalEntry> {
    state
        .borrow::<WorkerScope>()
        .globals
        .get_json(&key)
        .map(|value| GlobalEntry { value })
}

#[op2]
#[string]
pub fn op_container_id(state: &mut OpState) -> String {
    state.borrow::<WorkerScope>().container_id.clone()
}

#[op2(fast)]
pub fn op_worker_id(state: &mut OpState) -> u32 {
    state.borrow::<WorkerScope>().worker_id as u32
}

deno_core::extension!(
    napa_runtime,
    ops = [op_log, op_now, op_global_get, op_container_id, op_worker_id],
    esm_entry_point = "ext:napa_runtime/bootstrap.js",
    esm = [dir "src", "bootstrap.js"],
);
