//! Napa JavaScript Runtime
//!
//! Multi-isolate JavaScript execution with a result-code based API.
//! It follows Deno's worker pattern: each isolate runs in its own OS thread
//! with its own V8 isolate and single-threaded tokio runtime.
//!
//! # Architecture
//!
//! - `initialize` sets up V8, logging and the completion scheduler once per process
//! - A [`Container`] owns `cores` isolates; loading broadcasts to all of them
//! - Running a function dispatches to the least busy isolate
//! - Container global values are shared with JavaScript through ops
//!
//! ```no_run
//! use napa_runtime::{Container, ResponseCode};
//!
//! assert_eq!(napa_runtime::initialize("--completion-threads 2"), ResponseCode::Success);
//! let container = Container::new("--cores 2").unwrap();
//! container.load_sync("function add(a, b) { return a + b; }");
//! let response = container.run_sync("add", &["1", "2"], 0);
//! assert_eq!(response.return_value, "3");
//! napa_runtime::shutdown();
//! ```

mod command;
mod config;
mod container;
mod error;
mod globals;
mod handle;
mod ops;
mod platform;
mod response;
mod settings;
mod watchdog;
mod worker;

use std::ffi::OsString;

pub use config::NapaConfig;
pub use container::Container;
pub use error::RuntimeError;
pub use globals::{GlobalStore, GlobalValue};
pub use platform::{is_initialized, settings as platform_settings};
pub use response::{Response, ResponseCode};
pub use settings::{ContainerSettings, LoggingProvider, PlatformSettings};

/// Initialize the runtime with a platform settings string.
pub fn initialize(settings: &str) -> ResponseCode {
    PlatformSettings::parse_settings(settings)
        .and_then(platform::initialize)
        .into()
}

/// Initialize the runtime with already parsed settings.
pub fn initialize_with(settings: PlatformSettings) -> ResponseCode {
    platform::initialize(settings).into()
}

/// Initialize the runtime from process arguments (program name first).
pub fn initialize_from_console<I, T>(args: I) -> ResponseCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    PlatformSettings::from_args(args)
        .and_then(platform::initialize)
        .into()
}

/// Shut the runtime down. Live containers stop accepting work.
pub fn shutdown() -> ResponseCode {
    platform::shutdown().into()
}
