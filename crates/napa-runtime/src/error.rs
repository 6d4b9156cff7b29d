//! Error types for the napa runtime.

use std::path::PathBuf;
use std::time::Duration;

use crate::response::ResponseCode;

/// Errors that can occur in the runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Napa platform is not initialized")]
    NotInitialized,

    #[error("Napa platform is already initialized")]
    AlreadyInitialized,

    #[error("Napa platform has been shut down")]
    ShutDown,

    #[error("Invalid settings: {0}")]
    Settings(String),

    #[error("Invalid process arguments: {0}")]
    ProcessArgs(String),

    #[error("V8 initialization failed: {0}")]
    V8Init(String),

    #[error("Container initialization failed: {0}")]
    ContainerInit(String),

    #[error("Invalid global value: {0}")]
    GlobalValue(String),

    #[error("Load failed: {0}")]
    Load(String),

    #[error("Failed to read {}: {source}", path.display())]
    LoadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Run(String),

    #[error("Argument {index} is not valid JSON: {source}")]
    InvalidArgument {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Execution timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Runtime has terminated")]
    Terminated,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Runtime thread panicked")]
    ThreadPanic,

    #[error("Failed to spawn thread: {0}")]
    SpawnFailed(#[from] std::io::Error),
}

impl RuntimeError {
    /// The result code reported for this error.
    pub fn code(&self) -> ResponseCode {
        match self {
            RuntimeError::NotInitialized | RuntimeError::ShutDown => ResponseCode::NotInitialized,
            RuntimeError::AlreadyInitialized => ResponseCode::AlreadyInitialized,
            RuntimeError::Settings(_) => ResponseCode::SettingsParserError,
            RuntimeError::ProcessArgs(_) => ResponseCode::ProcessArgsError,
            RuntimeError::V8Init(_) => ResponseCode::V8InitError,
            RuntimeError::ContainerInit(_) => ResponseCode::ContainerInitError,
            RuntimeError::GlobalValue(_) => ResponseCode::GlobalValueError,
            RuntimeError::Load(_) => ResponseCode::LoadError,
            RuntimeError::LoadFile { .. } => ResponseCode::LoadFileError,
            RuntimeError::Run(_) | RuntimeError::InvalidArgument { .. } => ResponseCode::RunError,
            RuntimeError::Timeout(_) => ResponseCode::Timeout,
            RuntimeError::Terminated
            | RuntimeError::ChannelClosed
            | RuntimeError::ThreadPanic
            | RuntimeError::SpawnFailed(_) => ResponseCode::InternalError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(RuntimeError::ShutDown.code(), ResponseCode::NotInitialized);
        assert_eq!(
            RuntimeError::Timeout(Duration::from_millis(5)).code(),
            ResponseCode::Timeout
        );
        assert_eq!(RuntimeError::ChannelClosed.code(), ResponseCode::InternalError);

        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = RuntimeError::InvalidArgument { index: 2, source };
        assert_eq!(err.code(), ResponseCode::RunError);
        assert!(err.to_string().starts_with("Argument 2 is not valid JSON"));
    }

    #[test]
    fn test_timeout_message() {
        let err = RuntimeError::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "Execution timed out after 250ms");
    }
}
