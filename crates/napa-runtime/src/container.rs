//! Containers: groups of isolates that load the same code.
//!
//! Loading broadcasts a script to every isolate of the container; running a
//! function dispatches it to the least busy isolate. Every operation comes
//! in three flavors: callback (completion delivered on the platform
//! scheduler), `_sync` (blocks the caller) and `_async` (awaitable).

use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;

use crate::command::RunRequest;
use crate::error::RuntimeError;
use crate::globals::{GlobalStore, GlobalValue};
use crate::handle::{InFlight, WorkerHandle};
use crate::platform;
use crate::response::{Response, ResponseCode};
use crate::settings::ContainerSettings;
use crate::worker::{spawn_worker, WorkerSpec};

/// Script origin of sources loaded from memory.
const LOAD_ORIGIN: &str = "[napa:load]";

/// A set of isolates sharing loaded code and global values.
///
/// Dropping the container terminates its isolates.
pub struct Container {
    id: String,
    settings: ContainerSettings,
    workers: Vec<Arc<WorkerHandle>>,
    globals: Arc<GlobalStore>,
    /// Rotates the starting point of worker selection
    next_worker: AtomicUsize,
}

impl Container {
    /// Create a container from a settings string such as `"--cores 4"`.
    pub fn new(settings: &str) -> Result<Self, RuntimeError> {
        Self::with_settings(ContainerSettings::parse_settings(settings)?)
    }

    pub fn with_settings(settings: ContainerSettings) -> Result<Self, RuntimeError> {
        settings.validate().map_err(RuntimeError::Settings)?;
        platform::ensure_running()?;

        let id = uuid::Uuid::new_v4().to_string();
        let globals = Arc::new(GlobalStore::new());

        let mut workers = Vec::with_capacity(settings.cores);
        for worker_id in 0..settings.cores {
            let spec = WorkerSpec {
                name: settings.name.clone(),
                container_id: id.clone(),
                worker_id,
                heap_limit: settings.heap_limit_bytes(),
                globals: globals.clone(),
            };
            // Workers spawned so far are terminated when `workers` drops.
            let worker = spawn_worker(spec).map_err(|e| match e {
                RuntimeError::ContainerInit(_) => e,
                other => RuntimeError::ContainerInit(other.to_string()),
            })?;
            workers.push(Arc::new(worker));
        }

        platform::register_container(&id, &workers)?;

        tracing::info!(
            "Container {} ({}) created with {} isolates",
            settings.name,
            id,
            workers.len()
        );

        Ok(Self {
            id,
            settings,
            workers,
            globals,
            next_worker: AtomicUsize::new(0),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn settings(&self) -> &ContainerSettings {
        &self.settings
    }

    /// Number of isolates.
    pub fn cores(&self) -> usize {
        self.workers.len()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Global values
    // ─────────────────────────────────────────────────────────────────────

    /// Set a value in container scope.
    pub fn set_global_value(&self, key: &str, value: GlobalValue) -> ResponseCode {
        self.globals.set(key, value).into()
    }

    /// Get a value previously set with [`Container::set_global_value`].
    pub fn get_global_value<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.globals.get::<T>(key)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Loading
    // ─────────────────────────────────────────────────────────────────────

    /// Load a source into every isolate; `callback` receives the result.
    pub fn load<F>(&self, source: impl Into<String>, callback: F)
    where
        F: FnOnce(ResponseCode) + Send + 'static,
    {
        let task = broadcast(self.workers.clone(), source.into(), LOAD_ORIGIN);
        complete(task, move |result| callback(result.into()));
    }

    pub fn load_sync(&self, source: impl Into<String>) -> ResponseCode {
        futures::executor::block_on(self.load_async(source))
    }

    pub async fn load_async(&self, source: impl Into<String>) -> ResponseCode {
        let result = broadcast(self.workers.clone(), source.into(), LOAD_ORIGIN).await;
        self.report_load(LOAD_ORIGIN, result)
    }

    /// Load a file into every isolate; `callback` receives the result.
    pub fn load_file<F>(&self, path: impl AsRef<Path>, callback: F)
    where
        F: FnOnce(ResponseCode) + Send + 'static,
    {
        let path = path.as_ref().to_path_buf();
        let workers = self.workers.clone();
        let task = async move {
            match read_source(&path) {
                Ok((source, origin)) => broadcast(workers, source, origin).await,
                Err(e) => Err(e),
            }
        };
        complete(task, move |result| callback(result.into()));
    }

    pub fn load_file_sync(&self, path: impl AsRef<Path>) -> ResponseCode {
        futures::executor::block_on(self.load_file_async(path))
    }

    pub async fn load_file_async(&self, path: impl AsRef<Path>) -> ResponseCode {
        let path = path.as_ref();
        let result = match read_source(path) {
            Ok((source, origin)) => broadcast(self.workers.clone(), source, origin).await,
            Err(e) => Err(e),
        };
        self.report_load(&path.display().to_string(), result)
    }

    fn report_load(&self, origin: &str, result: Result<(), RuntimeError>) -> ResponseCode {
        match result {
            Ok(()) => {
                tracing::debug!("[container:{}] Loaded {}", self.settings.name, origin);
                ResponseCode::Success
            }
            Err(e) => {
                tracing::warn!("[container:{}] Failed to load {}: {}", self.settings.name, origin, e);
                e.code()
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Running
    // ─────────────────────────────────────────────────────────────────────

    /// Run a pre-loaded function; `callback` receives the response.
    ///
    /// Each argument is a JSON document. `timeout` is in milliseconds, 0
    /// means no limit.
    pub fn run<S, F>(&self, func: &str, args: &[S], callback: F, timeout: u32)
    where
        S: AsRef<str>,
        F: FnOnce(Response) + Send + 'static,
    {
        let prepared = self.prepare_run(func, args, timeout);
        let task = async move {
            match prepared {
                Ok((worker, ticket, request)) => worker.run(request, ticket).await,
                Err(e) => Err(e),
            }
        };
        complete(task, move |result| callback(result.into()));
    }

    pub fn run_sync<S: AsRef<str>>(&self, func: &str, args: &[S], timeout: u32) -> Response {
        futures::executor::block_on(self.run_async(func, args, timeout))
    }

    pub async fn run_async<S: AsRef<str>>(&self, func: &str, args: &[S], timeout: u32) -> Response {
        let result = match self.prepare_run(func, args, timeout) {
            Ok((worker, ticket, request)) => worker.run(request, ticket).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            tracing::debug!("[container:{}] Run {} failed: {}", self.settings.name, func, e);
        }
        result.into()
    }

    fn prepare_run<S: AsRef<str>>(
        &self,
        func: &str,
        args: &[S],
        timeout: u32,
    ) -> Result<(Arc<WorkerHandle>, InFlight, RunRequest), RuntimeError> {
        let request = RunRequest {
            func: func.to_string(),
            args: marshal_args(args)?,
            timeout: timeout_from_millis(timeout),
        };
        let worker = self.select_worker()?;
        let ticket = worker.reserve();
        Ok((worker, ticket, request))
    }

    /// Pick the worker with the fewest runs in flight.
    fn select_worker(&self) -> Result<Arc<WorkerHandle>, RuntimeError> {
        let count = self.workers.len();
        if count == 0 {
            return Err(RuntimeError::Terminated);
        }
        let start = self.next_worker.fetch_add(1, Ordering::Relaxed) % count;
        (0..count)
            .map(|i| &self.workers[(start + i) % count])
            .filter(|w| !w.is_terminated())
            .min_by_key(|w| w.load_factor())
            .cloned()
            .ok_or(RuntimeError::Terminated)
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        platform::unregister_container(&self.id);
        for worker in &self.workers {
            worker.terminate();
        }
        tracing::debug!("[container:{}] Dropped {}", self.settings.name, self.id);
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id)
            .field("settings", &self.settings)
            .field("globals", &self.globals)
            .finish()
    }
}

/// Evaluate `source` in every worker. The first failure, in worker order, wins.
async fn broadcast(
    workers: Vec<Arc<WorkerHandle>>,
    source: String,
    origin: &'static str,
) -> Result<(), RuntimeError> {
    let results = join_all(workers.iter().map(|w| w.load(source.clone(), origin))).await;
    results.into_iter().collect()
}

/// Run `task` on the platform scheduler and hand its result to `on_done`.
///
/// `on_done` is called exactly once, also when `shutdown` cancels the task.
fn complete<T, Fut, F>(task: Fut, on_done: F)
where
    T: Send + 'static,
    Fut: Future<Output = Result<T, RuntimeError>> + Send + 'static,
    F: FnOnce(Result<T, RuntimeError>) + Send + 'static,
{
    let completion = Completion::new(on_done);
    match platform::scheduler() {
        Ok(handle) => {
            handle.spawn(async move {
                let result = task.await;
                completion.finish(result);
            });
        }
        Err(e) => completion.finish(Err(e)),
    }
}

/// Pending completion callback. Dropping it unfinished reports `ShutDown`.
struct Completion<T, F>
where
    F: FnOnce(Result<T, RuntimeError>),
{
    on_done: Option<F>,
    _result: PhantomData<fn(T)>,
}

impl<T, F> Completion<T, F>
where
    F: FnOnce(Result<T, RuntimeError>),
{
    fn new(on_done: F) -> Self {
        Self {
            on_done: Some(on_done),
            _result: PhantomData,
        }
    }

    fn finish(mut self, result: Result<T, RuntimeError>) {
        if let Some(on_done) = self.on_done.take() {
            on_done(result);
        }
    }
}

impl<T, F> Drop for Completion<T, F>
where
    F: FnOnce(Result<T, RuntimeError>),
{
    fn drop(&mut self) {
        if let Some(on_done) = self.on_done.take() {
            on_done(Err(RuntimeError::ShutDown));
        }
    }
}

/// Parse each argument as a JSON document.
pub(crate) fn marshal_args<S: AsRef<str>>(args: &[S]) -> Result<Vec<serde_json::Value>, RuntimeError> {
    args.iter()
        .enumerate()
        .map(|(index, arg)| {
            serde_json::from_str(arg.as_ref())
                .map_err(|source| RuntimeError::InvalidArgument { index, source })
        })
        .collect()
}

/// Milliseconds to a time limit; 0 means none.
pub(crate) fn timeout_from_millis(timeout: u32) -> Option<Duration> {
    (timeout > 0).then(|| Duration::from_millis(u64::from(timeout)))
}

fn read_source(path: &Path) -> Result<(String, &'static str), RuntimeError> {
    let source = std::fs::read_to_string(path).map_err(|source| RuntimeError::LoadFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((source, file_origin(path)))
}

/// Script origins must be `'static`; intern one per distinct path.
fn file_origin(path: &Path) -> &'static str {
    static ORIGINS: OnceLock<DashMap<String, &'static str>> = OnceLock::new();

    let key = path.display().to_string();
    let origins = ORIGINS.get_or_init(DashMap::new);
    *origins
        .entry(key.clone())
        .or_insert_with(|| &*Box::leak(key.into_boxed_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marshal_args() {
        let args = marshal_args(&["1", "\"two\"", "{\"three\": [3]}", "null"]).unwrap();
        assert_eq!(
            args,
            vec![
                serde_json::json!(1),
                serde_json::json!("two"),
                serde_json::json!({"three": [3]}),
                serde_json::Value::Null,
            ]
        );
    }

    #[test]
    fn test_marshal_args_reports_bad_index() {
        let err = marshal_args(&["1", "two"]).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidArgument { index: 1, .. }));
        assert_eq!(err.code(), ResponseCode::RunError);
    }

    #[test]
    fn test_marshal_no_args() {
        let empty: [&str; 0] = [];
        assert!(marshal_args(&empty).unwrap().is_empty());
    }

    #[test]
    fn test_timeout_from_millis() {
        assert_eq!(timeout_from_millis(0), None);
        assert_eq!(timeout_from_millis(1500), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_file_origin_is_interned() {
        let a = file_origin(Path::new("/tmp/scripts/a.js"));
        let b = file_origin(Path::new("/tmp/scripts/a.js"));
        assert_eq!(a, "/tmp/scripts/a.js");
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn test_dropped_completion_reports_shutdown() {
        let (tx, rx) = std::sync::mpsc::channel();
        let completion = Completion::new(move |result: Result<(), RuntimeError>| {
            let _ = tx.send(ResponseCode::from(result));
        });
        drop(completion);
        assert_eq!(rx.try_recv().unwrap(), ResponseCode::NotInitialized);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_finished_completion_calls_once() {
        let (tx, rx) = std::sync::mpsc::channel();
        let completion = Completion::new(move |result: Result<u32, RuntimeError>| {
            let _ = tx.send(result.map_err(|e| e.code()));
        });
        completion.finish(Ok(7));
        assert_eq!(rx.try_recv().unwrap(), Ok(7));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_read_missing_source() {
        let err = read_source(Path::new("/definitely/not/here.js")).unwrap_err();
        assert_eq!(err.code(), ResponseCode::LoadFileError);
    }
}
