//! Execution time limits.
//!
//! A busy isolate never yields to its tokio runtime, so timers on the worker
//! thread cannot interrupt a synchronous loop. The watchdog runs on its own
//! thread and terminates V8 execution through the thread-safe isolate handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use deno_core::v8;

/// Timer that terminates isolate execution when it elapses.
pub(crate) struct Watchdog {
    cancel_tx: Option<mpsc::Sender<()>>,
    fired: Arc<AtomicBool>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl Watchdog {
    /// Start the timer.
    pub fn arm(isolate_handle: v8::IsolateHandle, limit: Duration) -> Self {
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();

        let spawned = thread::Builder::new()
            .name("napa-watchdog".to_string())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(limit) {
                    fired_clone.store(true, Ordering::SeqCst);
                    isolate_handle.terminate_execution();
                }
            });

        let thread_handle = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!("[watchdog] Failed to spawn timer thread, limit not enforced: {}", e);
                None
            }
        };

        Self {
            cancel_tx: Some(cancel_tx),
            fired,
            thread_handle,
        }
    }

    /// Stop the timer. Returns whether it fired.
    ///
    /// Once this returns, the watchdog will not touch the isolate again.
    pub fn disarm(mut self) -> bool {
        self.stop();
        self.fired.load(Ordering::SeqCst)
    }

    fn stop(&mut self) {
        // Dropping the sender wakes the timer thread with `Disconnected`.
        self.cancel_tx.take();
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
