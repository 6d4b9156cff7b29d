//! Commands sent to the isolate worker threads.

use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::RuntimeError;

/// A function call dispatched to one isolate.
#[derive(Debug, Clone)]
pub(crate) struct RunRequest {
    /// Function name, possibly a dotted path from `globalThis`
    pub func: String,
    /// Arguments, already validated as JSON
    pub args: Vec<serde_json::Value>,
    /// Execution limit, `None` for no limit
    pub timeout: Option<Duration>,
}

impl RunRequest {
    /// The script that invokes the function inside the isolate.
    ///
    /// It evaluates to a promise that resolves to the JSON text of the result
    /// and rejects with the error description.
    pub fn to_script(&self) -> Result<String, RuntimeError> {
        let func = serde_json::to_string(&self.func).map_err(|e| RuntimeError::Run(e.to_string()))?;
        let args = serde_json::to_string(&self.args).map_err(|e| RuntimeError::Run(e.to_string()))?;
        Ok(format!("globalThis.__napa_internal.invoke({}, {})", func, args))
    }
}

/// Messages handled by a worker.
pub(crate) enum WorkerCommand {
    /// Evaluate a script in the isolate.
    Load {
        source: String,
        origin: &'static str,
        reply: oneshot::Sender<Result<(), RuntimeError>>,
    },

    /// Run a pre-loaded function.
    Run {
        request: RunRequest,
        reply: oneshot::Sender<Result<String, RuntimeError>>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_script_escapes_input() {
        let request = RunRequest {
            func: "math.\"add\"".to_string(),
            args: vec![serde_json::json!(1), serde_json::json!("two</script>")],
            timeout: None,
        };
        let script = request.to_script().unwrap();
        assert_eq!(
            script,
            r#"globalThis.__napa_internal.invoke("math.\"add\"", [1,"two</script>"])"#
        );
    }
}
