//! Worker thread implementation for container isolates.
//!
//! Each worker owns one V8 isolate on a dedicated OS thread with a
//! single-threaded tokio runtime. The host talks to it through commands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use deno_core::v8;
use deno_core::JsRuntime;
use deno_core::PollEventLoopOptions;
use deno_core::RuntimeOptions;
use tokio::sync::{mpsc, watch};

use crate::command::{RunRequest, WorkerCommand};
use crate::error::RuntimeError;
use crate::globals::GlobalStore;
use crate::handle::WorkerHandle;
use crate::ops::{napa_runtime, WorkerScope};
use crate::watchdog::Watchdog;

/// Mutex to serialize V8 isolate creation.
/// Creating multiple isolates concurrently can cause crashes in V8.
static ISOLATE_CREATE_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());

/// Script origin of function invocations.
const RUN_ORIGIN: &str = "[napa:run]";

/// Capacity of the per-worker command queue.
const COMMAND_CAPACITY: usize = 64;

/// Everything a worker needs to build its isolate.
pub(crate) struct WorkerSpec {
    /// Container name, used for the thread name
    pub name: String,
    pub container_id: String,
    pub worker_id: usize,
    /// Heap limit in bytes
    pub heap_limit: Option<usize>,
    pub globals: Arc<GlobalStore>,
}

/// Spawn a worker thread and wait until its isolate is ready.
pub(crate) fn spawn_worker(spec: WorkerSpec) -> Result<WorkerHandle, RuntimeError> {
    let name = format!("napa-{}-{}", spec.name, spec.worker_id);
    let worker_id = spec.worker_id;
    tracing::debug!("[spawn_worker] Starting {}", name);

    let terminated = Arc::new(AtomicBool::new(false));
    let terminated_clone = terminated.clone();

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (init_tx, init_rx) = std::sync::mpsc::sync_channel::<Result<v8::IsolateHandle, String>>(1);

    let name_clone = name.clone();
    let thread_handle = thread::Builder::new()
        .name(name.clone())
        .spawn(move || -> Result<(), RuntimeError> {
            tracing::debug!("[spawn_worker:{}] Thread started", name_clone);

            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(RuntimeError::SpawnFailed)?;

            let result = rt.block_on(run_worker(
                name_clone.clone(),
                spec,
                terminated_clone,
                cmd_rx,
                shutdown_rx,
                init_tx,
            ));

            rt.shutdown_background();
            tracing::debug!("[spawn_worker:{}] Thread exiting", name_clone);
            result
        })?;

    let isolate_handle = init_rx
        .recv()
        .map_err(|_| RuntimeError::ContainerInit(format!("{} exited during startup", name)))?
        .map_err(RuntimeError::ContainerInit)?;

    tracing::debug!("[spawn_worker] {} is ready", name);

    Ok(WorkerHandle::new(
        worker_id,
        cmd_tx,
        shutdown_tx,
        terminated,
        isolate_handle,
        thread_handle,
    ))
}

/// The main worker loop that runs inside the spawned thread.
async fn run_worker(
    name: String,
    spec: WorkerSpec,
    terminated: Arc<AtomicBool>,
    mut cmd_rx: mpsc::Receiver<WorkerCommand>,
    mut shutdown_rx: watch::Receiver<bool>,
    init_tx: std::sync::mpsc::SyncSender<Result<v8::IsolateHandle, String>>,
) -> Result<(), RuntimeError> {
    let mut js_runtime = {
        let _lock = ISOLATE_CREATE_LOCK.lock();
        tracing::debug!("[run_worker:{}] Creating JsRuntime", name);
        JsRuntime::new(RuntimeOptions {
            extensions: vec![napa_runtime::init_ops_and_esm()],
            create_params: spec
                .heap_limit
                .map(|bytes| v8::CreateParams::default().heap_limits(0, bytes)),
            ..Default::default()
        })
    };

    let isolate_handle = js_runtime.v8_isolate().thread_safe_handle();

    let heap_guard = spec
        .heap_limit
        .map(|limit| HeapGuard::new(name.clone(), limit, isolate_handle.clone()));
    if let Some(guard) = &heap_guard {
        guard.install(&mut js_runtime);
    }

    {
        let op_state = js_runtime.op_state();
        let mut state = op_state.borrow_mut();
        state.put(WorkerScope {
            container_id: spec.container_id,
            worker_id: spec.worker_id,
            globals: spec.globals,
        });
    }

    if init_tx.send(Ok(isolate_handle)).is_err() {
        return Err(RuntimeError::ChannelClosed);
    }

    loop {
        if *shutdown_rx.borrow() || terminated.load(Ordering::SeqCst) {
            tracing::debug!("[run_worker:{}] Shutdown signal received", name);
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::debug!("[run_worker:{}] Received shutdown signal", name);
                    break;
                }
            }

            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    tracing::debug!("[run_worker:{}] Command channel closed", name);
                    break;
                };

                match cmd {
                    WorkerCommand::Load { source, origin, reply } => {
                        tracing::debug!("[run_worker:{}] Load: {}", name, origin);
                        let result = load_script(&mut js_runtime, origin, source).await;
                        let result = recover_heap(&mut js_runtime, heap_guard.as_ref(), result, RuntimeError::Load);
                        let _ = reply.send(result);
                    }

                    WorkerCommand::Run { request, reply } => {
                        tracing::debug!("[run_worker:{}] Run: {}", name, request.func);
                        let result = run_function(&mut js_runtime, request).await;
                        let result = recover_heap(&mut js_runtime, heap_guard.as_ref(), result, RuntimeError::Run);
                        let _ = reply.send(result);
                    }
                }
            }
        }
    }

    tracing::debug!("[run_worker:{}] Worker finished", name);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Heap Limit
// ─────────────────────────────────────────────────────────────────────────────

/// Keeps an isolate within its configured heap limit.
///
/// Reaching the limit would abort the process, so the near-limit callback
/// terminates execution and grants V8 room to unwind. The original limit is
/// put back once the command has finished.
struct HeapGuard {
    name: String,
    limit: usize,
    isolate_handle: v8::IsolateHandle,
    tripped: Arc<AtomicBool>,
}

impl HeapGuard {
    fn new(name: String, limit: usize, isolate_handle: v8::IsolateHandle) -> Self {
        Self {
            name,
            limit,
            isolate_handle,
            tripped: Arc::new(AtomicBool::new(false)),
        }
    }

    fn install(&self, js_runtime: &mut JsRuntime) {
        let handle = self.isolate_handle.clone();
        let tripped = self.tripped.clone();
        let name = self.name.clone();
        js_runtime.add_near_heap_limit_callback(move |current, _initial| {
            tracing::warn!("[run_worker:{}] Heap limit reached, terminating execution", name);
            tripped.store(true, Ordering::SeqCst);
            handle.terminate_execution();
            current * 2
        });
    }

    /// Restore the configured limit if the callback fired. Returns whether it did.
    fn reset(&self, js_runtime: &mut JsRuntime) -> bool {
        if !self.tripped.swap(false, Ordering::SeqCst) {
            return false;
        }
        js_runtime.remove_near_heap_limit_callback(self.limit);
        js_runtime.v8_isolate().cancel_terminate_execution();
        self.install(js_runtime);
        tracing::debug!("[run_worker:{}] Heap limit restored to {} bytes", self.name, self.limit);
        true
    }
}

/// Report a command that failed on the heap limit as such.
fn recover_heap<T>(
    js_runtime: &mut JsRuntime,
    guard: Option<&HeapGuard>,
    result: Result<T, RuntimeError>,
    wrap: fn(String) -> RuntimeError,
) -> Result<T, RuntimeError> {
    let Some(guard) = guard else {
        return result;
    };
    if guard.reset(js_runtime) && result.is_err() {
        return Err(wrap(format!(
            "Heap limit of {} MiB reached",
            guard.limit / (1024 * 1024)
        )));
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// JS Execution Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Evaluate a classic script and let any work it queued settle.
async fn load_script(
    js_runtime: &mut JsRuntime,
    origin: &'static str,
    source: String,
) -> Result<(), RuntimeError> {
    let outcome = evaluate_script(js_runtime, origin, source).await;
    if outcome.is_err() {
        js_runtime.v8_isolate().cancel_terminate_execution();
    }
    outcome
}

async fn evaluate_script(
    js_runtime: &mut JsRuntime,
    origin: &'static str,
    source: String,
) -> Result<(), RuntimeError> {
    js_runtime
        .execute_script(origin, source)
        .map_err(|e| RuntimeError::Load(e.to_string()))?;

    js_runtime
        .run_event_loop(PollEventLoopOptions::default())
        .await
        .map_err(|e| RuntimeError::Load(e.to_string()))
}

/// Run a function, enforcing the request's time limit.
async fn run_function(js_runtime: &mut JsRuntime, request: RunRequest) -> Result<String, RuntimeError> {
    let script = request.to_script()?;
    let watchdog = request
        .timeout
        .map(|limit| Watchdog::arm(js_runtime.v8_isolate().thread_safe_handle(), limit));

    // The watchdog interrupts running JavaScript; the tokio timeout covers
    // time spent waiting on the event loop.
    let outcome = match request.timeout {
        Some(limit) => tokio::time::timeout(limit, invoke(js_runtime, script))
            .await
            .unwrap_or(Err(RuntimeError::Timeout(limit))),
        None => invoke(js_runtime, script).await,
    };

    let fired = watchdog.map(Watchdog::disarm).unwrap_or(false);
    if fired || outcome.is_err() {
        js_runtime.v8_isolate().cancel_terminate_execution();
    }

    match (outcome, request.timeout) {
        (Err(_), Some(limit)) if fired => Err(RuntimeError::Timeout(limit)),
        (outcome, _) => outcome,
    }
}

/// Execute the invocation script and read the settled promise.
async fn invoke(js_runtime: &mut JsRuntime, script: String) -> Result<String, RuntimeError> {
    let result = js_runtime
        .execute_script(RUN_ORIGIN, script)
        .map_err(|e| RuntimeError::Run(e.to_string()))?;

    js_runtime
        .run_event_loop(PollEventLoopOptions::default())
        .await
        .map_err(|e| RuntimeError::Run(e.to_string()))?;

    let scope = &mut js_runtime.handle_scope();
    let local = v8::Local::new(scope, result);

    if let Ok(promise) = v8::Local::<v8::Promise>::try_from(local) {
        match promise.state() {
            v8::PromiseState::Fulfilled => {
                let value = promise.result(scope);
                Ok(value.to_rust_string_lossy(scope))
            }
            v8::PromiseState::Rejected => {
                let value = promise.result(scope);
                Err(RuntimeError::Run(value.to_rust_string_lossy(scope)))
            }
            v8::PromiseState::Pending => Err(RuntimeError::Run(
                "Function did not settle: promise still pending after event loop".to_string(),
            )),
        }
    } else {
        Ok(local.to_rust_string_lossy(scope))
    }
}
