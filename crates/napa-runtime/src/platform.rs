//! Process-wide runtime state.
//!
//! The platform owns V8 initialization, logging, the scheduler that delivers
//! asynchronous completions, and the registry of live containers that
//! `shutdown` tears down.

use std::collections::HashMap;
use std::sync::{Arc, Once, Weak};

use deno_core::JsRuntime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::RuntimeError;
use crate::handle::WorkerHandle;
use crate::settings::{LoggingProvider, PlatformSettings};

/// Ensure V8 platform is initialized exactly once.
static V8_INIT: Once = Once::new();

static PLATFORM: parking_lot::Mutex<PlatformState> =
    parking_lot::const_mutex(PlatformState::Uninitialized);

enum PlatformState {
    Uninitialized,
    Running(Platform),
    ShutDown,
}

struct Platform {
    settings: PlatformSettings,
    /// Runs asynchronous completions off the caller's thread
    scheduler: tokio::runtime::Runtime,
    /// Workers of live containers, by container id
    containers: HashMap<String, Vec<Weak<WorkerHandle>>>,
}

/// Initialize the platform.
pub fn initialize(settings: PlatformSettings) -> Result<(), RuntimeError> {
    let mut state = PLATFORM.lock();
    match *state {
        PlatformState::Running(_) => return Err(RuntimeError::AlreadyInitialized),
        PlatformState::ShutDown => {
            return Err(RuntimeError::V8Init(
                "the platform was shut down and cannot be initialized again".to_string(),
            ));
        }
        PlatformState::Uninitialized => {}
    }

    settings.validate().map_err(RuntimeError::Settings)?;

    init_logging(&settings);
    init_v8(&settings.v8_flags)?;

    let scheduler = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(settings.completion_threads)
        .thread_name("napa-completion")
        .enable_all()
        .build()
        .map_err(RuntimeError::SpawnFailed)?;

    tracing::info!(
        "Napa platform initialized ({} completion threads)",
        settings.completion_threads
    );

    *state = PlatformState::Running(Platform {
        settings,
        scheduler,
        containers: HashMap::new(),
    });
    Ok(())
}

/// Shut the platform down, terminating every live container.
pub fn shutdown() -> Result<(), RuntimeError> {
    let platform = {
        let mut state = PLATFORM.lock();
        match std::mem::replace(&mut *state, PlatformState::ShutDown) {
            PlatformState::Running(platform) => platform,
            previous => {
                *state = previous;
                return Err(RuntimeError::NotInitialized);
            }
        }
    };

    let mut terminated = 0;
    for workers in platform.containers.values() {
        for worker in workers.iter().filter_map(Weak::upgrade) {
            worker.terminate();
            terminated += 1;
        }
    }

    platform.scheduler.shutdown_background();
    tracing::info!("Napa platform shut down ({} workers terminated)", terminated);
    Ok(())
}

pub fn is_initialized() -> bool {
    matches!(*PLATFORM.lock(), PlatformState::Running(_))
}

/// Settings the platform was initialized with.
pub fn settings() -> Option<PlatformSettings> {
    match &*PLATFORM.lock() {
        PlatformState::Running(platform) => Some(platform.settings.clone()),
        _ => None,
    }
}

pub(crate) fn ensure_running() -> Result<(), RuntimeError> {
    match &*PLATFORM.lock() {
        PlatformState::Running(_) => Ok(()),
        PlatformState::Uninitialized => Err(RuntimeError::NotInitialized),
        PlatformState::ShutDown => Err(RuntimeError::ShutDown),
    }
}

/// Handle of the completion scheduler.
pub(crate) fn scheduler() -> Result<tokio::runtime::Handle, RuntimeError> {
    match &*PLATFORM.lock() {
        PlatformState::Running(platform) => Ok(platform.scheduler.handle().clone()),
        PlatformState::Uninitialized => Err(RuntimeError::NotInitialized),
        PlatformState::ShutDown => Err(RuntimeError::ShutDown),
    }
}

pub(crate) fn register_container(id: &str, workers: &[Arc<WorkerHandle>]) -> Result<(), RuntimeError> {
    match &mut *PLATFORM.lock() {
        PlatformState::Running(platform) => {
            platform
                .containers
                .insert(id.to_string(), workers.iter().map(Arc::downgrade).collect());
            Ok(())
        }
        PlatformState::Uninitialized => Err(RuntimeError::NotInitialized),
        PlatformState::ShutDown => Err(RuntimeError::ShutDown),
    }
}

pub(crate) fn unregister_container(id: &str) {
    if let PlatformState::Running(platform) = &mut *PLATFORM.lock() {
        platform.containers.remove(id);
    }
}

fn init_logging(settings: &PlatformSettings) {
    if settings.logging_provider != LoggingProvider::Console {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));

    // The host may already have installed a subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Apply V8 flags and initialize the V8 platform.
fn init_v8(flags: &[String]) -> Result<(), RuntimeError> {
    if !flags.is_empty() {
        let mut argv = Vec::with_capacity(flags.len() + 1);
        argv.push("napa".to_string());
        argv.extend(flags.iter().cloned());

        // V8 hands back the program name followed by anything it rejected.
        let unrecognized: Vec<String> = deno_core::v8_set_flags(argv).into_iter().skip(1).collect();
        if !unrecognized.is_empty() {
            return Err(RuntimeError::V8Init(format!(
                "unrecognized V8 flags: {}",
                unrecognized.join(" ")
            )));
        }
    }

    V8_INIT.call_once(|| {
        JsRuntime::init_platform(None, false);
    });
    Ok(())
}
