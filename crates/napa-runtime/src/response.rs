//! Result codes and run responses.
//!
//! The public surface of the runtime never returns `Err`: every operation
//! reports a [`ResponseCode`], and function runs report a full [`Response`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

/// Outcome of a runtime operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCode {
    Success,
    Undefined,
    InternalError,
    Timeout,
    NotInitialized,
    AlreadyInitialized,
    SettingsParserError,
    ProcessArgsError,
    V8InitError,
    ContainerInitError,
    GlobalValueError,
    LoadError,
    LoadFileError,
    RunError,
}

impl ResponseCode {
    /// Whether the operation succeeded.
    pub fn is_success(self) -> bool {
        self == ResponseCode::Success
    }

    /// Human readable description of the code.
    pub fn description(self) -> &'static str {
        match self {
            ResponseCode::Success => "Success",
            ResponseCode::Undefined => "Undefined",
            ResponseCode::InternalError => "Napa internal error",
            ResponseCode::Timeout => "The request timed out",
            ResponseCode::NotInitialized => "Napa platform is not initialized",
            ResponseCode::AlreadyInitialized => "Napa platform is already initialized",
            ResponseCode::SettingsParserError => "Failed to parse settings",
            ResponseCode::ProcessArgsError => "Failed to parse process arguments",
            ResponseCode::V8InitError => "Failed to initialize V8",
            ResponseCode::ContainerInitError => "Failed to initialize container",
            ResponseCode::GlobalValueError => "Failed to set global value",
            ResponseCode::LoadError => "Failed to load JavaScript source",
            ResponseCode::LoadFileError => "Failed to load JavaScript file",
            ResponseCode::RunError => "Failed to run JavaScript function",
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl<T> From<Result<T, RuntimeError>> for ResponseCode {
    fn from(result: Result<T, RuntimeError>) -> Self {
        match result {
            Ok(_) => ResponseCode::Success,
            Err(e) => e.code(),
        }
    }
}

/// Response of a function run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Response code
    pub code: ResponseCode,
    /// Error message. Empty when the code is `Success`.
    pub error: String,
    /// JSON text of the value returned by the function
    pub return_value: String,
}

impl Response {
    /// A successful response carrying `return_value`.
    pub fn success(return_value: impl Into<String>) -> Self {
        Self {
            code: ResponseCode::Success,
            error: String::new(),
            return_value: return_value.into(),
        }
    }

    /// A failed response. An empty `error` falls back to the code's
    /// description so failures always carry a message.
    pub fn failure(code: ResponseCode, error: impl Into<String>) -> Self {
        let mut error = error.into();
        if error.is_empty() {
            error = code.description().to_string();
        }
        Self {
            code,
            error,
            return_value: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }
}

impl Default for Response {
    fn default() -> Self {
        Self {
            code: ResponseCode::Undefined,
            error: String::new(),
            return_value: String::new(),
        }
    }
}

impl From<RuntimeError> for Response {
    fn from(err: RuntimeError) -> Self {
        Response::failure(err.code(), err.to_string())
    }
}

impl From<Result<String, RuntimeError>> for Response {
    fn from(result: Result<String, RuntimeError>) -> Self {
        match result {
            Ok(value) => Response::success(value),
            Err(e) => e.into(),
        }
    }
}
