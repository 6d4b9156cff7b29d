//! Host-side handle to an isolate worker.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use deno_core::v8;
use tokio::runtime::RuntimeFlavor;
use tokio::sync::{mpsc, oneshot, watch};

use crate::command::{RunRequest, WorkerCommand};
use crate::error::RuntimeError;

/// Handle to a spawned worker thread.
pub(crate) struct WorkerHandle {
    /// Index within the container
    id: usize,
    /// Command sender
    cmd_tx: mpsc::Sender<WorkerCommand>,
    /// Shutdown signal sender
    shutdown_tx: watch::Sender<bool>,
    /// Whether the worker has terminated
    terminated: Arc<AtomicBool>,
    /// V8 isolate handle for forced termination
    isolate_handle: v8::IsolateHandle,
    /// Runs dispatched to this worker and not yet answered
    in_flight: Arc<AtomicUsize>,
    /// Thread join handle
    thread_handle: parking_lot::Mutex<Option<thread::JoinHandle<Result<(), RuntimeError>>>>,
}

// SAFETY: every field is Send + Sync; v8::IsolateHandle is documented as
// safe to use from any thread.
unsafe impl Send for WorkerHandle {}
unsafe impl Sync for WorkerHandle {}

impl WorkerHandle {
    pub fn new(
        id: usize,
        cmd_tx: mpsc::Sender<WorkerCommand>,
        shutdown_tx: watch::Sender<bool>,
        terminated: Arc<AtomicBool>,
        isolate_handle: v8::IsolateHandle,
        thread_handle: thread::JoinHandle<Result<(), RuntimeError>>,
    ) -> Self {
        Self {
            id,
            cmd_tx,
            shutdown_tx,
            terminated,
            isolate_handle,
            in_flight: Arc::new(AtomicUsize::new(0)),
            thread_handle: parking_lot::Mutex::new(Some(thread_handle)),
        }
    }

    /// Helper to send a command and wait for reply.
    async fn send_command<T, F>(&self, make_cmd: F) -> Result<T, RuntimeError>
    where
        F: FnOnce(oneshot::Sender<Result<T, RuntimeError>>) -> WorkerCommand,
    {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(RuntimeError::Terminated);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(make_cmd(reply_tx))
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;

        // A dropped reply means the worker went away mid-request.
        reply_rx.await.map_err(|_| RuntimeError::Terminated)?
    }

    /// Evaluate a script in this worker's isolate.
    pub async fn load(&self, source: String, origin: &'static str) -> Result<(), RuntimeError> {
        self.send_command(|reply| WorkerCommand::Load {
            source,
            origin,
            reply,
        })
        .await
    }

    /// Run a function. `ticket` is released once the worker answers.
    pub async fn run(&self, request: RunRequest, ticket: InFlight) -> Result<String, RuntimeError> {
        let result = self
            .send_command(|reply| WorkerCommand::Run { request, reply })
            .await;
        drop(ticket);
        result
    }

    /// Reserve a slot for a run before it is dispatched.
    pub fn reserve(&self) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlight {
            counter: self.in_flight.clone(),
        }
    }

    /// Number of runs currently assigned to this worker.
    pub fn load_factor(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Terminate the worker.
    ///
    /// This signals the worker thread to shut down and forcefully terminates
    /// V8 execution if it's stuck.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return; // Already terminated
        }
        let _ = self.shutdown_tx.send(true);
        self.isolate_handle.terminate_execution();
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Wait for the worker thread to finish.
    pub fn join(&self) -> Result<(), RuntimeError> {
        if let Some(handle) = self.thread_handle.lock().take() {
            handle.join().map_err(|_| RuntimeError::ThreadPanic)??;
        }
        Ok(())
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.terminate();
        // Wait for the thread to finish to ensure clean V8 shutdown. The last
        // reference may go away on a scheduler thread, which must not block.
        let result = match tokio::runtime::Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| self.join())
            }
            _ => self.join(),
        };
        if let Err(e) = result {
            tracing::warn!("[worker:{}] Exited with error: {}", self.id, e);
        }
    }
}

/// Counts a run against a worker until dropped.
pub(crate) struct InFlight {
    counter: Arc<AtomicUsize>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
