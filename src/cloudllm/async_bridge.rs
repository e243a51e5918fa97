//! Dedicated-thread bridge between synchronous callers and the async
//! orchestration core.
//!
//! Grounded on `shandu/runtime/async_runner.py`'s `AsyncRunner`: a single
//! background OS thread owns a current-thread `tokio` runtime. `run` submits
//! a future to it and blocks the caller until the result comes back;
//! `stream` submits a run and hands back a blocking iterator of [`RunEvent`]s
//! as they're produced. Unlike the Python original's lazily-initialized
//! process-wide singleton, callers construct their own [`AsyncBridge`]
//! explicitly — no hidden globals inside this crate (see `SPEC_FULL.md` §9).

use std::future::Future;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use tokio::runtime::Runtime;

use crate::cloudllm::contracts::RunEvent;
use crate::cloudllm::research_error::BridgeError;

type BoxedTask = Box<dyn FnOnce(&Runtime) + Send>;

/// A dedicated background thread hosting a single-threaded `tokio` runtime.
pub struct AsyncBridge {
    sender: mpsc::Sender<BoxedTask>,
    handle: Option<JoinHandle<()>>,
}

impl AsyncBridge {
    /// Spawn the background thread and its runtime.
    pub fn start() -> Self {
        let (sender, receiver) = mpsc::channel::<BoxedTask>();
        let handle = thread::Builder::new()
            .name("async-bridge".to_string())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to start async bridge runtime");
                while let Ok(task) = receiver.recv() {
                    task(&runtime);
                }
            })
            .expect("failed to spawn async bridge thread");

        Self {
            sender,
            handle: Some(handle),
        }
    }

    /// Run `future` to completion on the bridge's runtime and block the
    /// calling thread for the result.
    pub fn run<F>(&self, future: F) -> Result<F::Output, BridgeError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::channel();
        let task: BoxedTask = Box::new(move |runtime| {
            let output = runtime.block_on(future);
            let _ = reply_tx.send(output);
        });
        self.sender
            .send(task)
            .map_err(|_| BridgeError::RuntimeUnavailable)?;
        reply_rx.recv().map_err(|_| BridgeError::ResultLost)
    }

    /// Submit `future` to the bridge's runtime without waiting for it to
    /// complete, streaming [`RunEvent`]s back through a blocking iterator as
    /// they are emitted. `spawn_run` is handed a sink closure that the caller
    /// invokes (from within `future`) to forward each event.
    pub fn stream<F, Fut>(&self, spawn_run: F) -> mpsc::Receiver<RunEvent>
    where
        F: FnOnce(Box<dyn Fn(RunEvent) + Send>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (event_tx, event_rx) = mpsc::channel::<RunEvent>();
        let sink_tx = event_tx.clone();
        let task: BoxedTask = Box::new(move |runtime| {
            let future = spawn_run(Box::new(move |event| {
                let _ = sink_tx.send(event);
            }));
            runtime.block_on(future);
            drop(event_tx);
        });
        let _ = self.sender.send(task);
        event_rx
    }

    /// Stop the background runtime and join its thread.
    pub fn shutdown(mut self) {
        drop(self.sender);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AsyncBridge {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_blocks_for_the_future_result() {
        let bridge = AsyncBridge::start();
        let result = bridge.run(async { 1 + 1 }).expect("bridge run failed");
        assert_eq!(result, 2);
        bridge.shutdown();
    }

    /// Two successive `run` calls are driven by the same background thread
    /// (and so the same current-thread runtime), not a fresh one per call.
    #[test]
    fn successive_run_calls_reuse_the_same_background_thread() {
        let bridge = AsyncBridge::start();
        let first = bridge
            .run(async { thread::current().id() })
            .expect("bridge run failed");
        let second = bridge
            .run(async { thread::current().id() })
            .expect("bridge run failed");
        assert_eq!(first, second);
        bridge.shutdown();
    }

    #[test]
    fn run_after_shutdown_reports_runtime_unavailable() {
        let bridge = AsyncBridge::start();
        bridge.shutdown();
        // `shutdown` consumes the bridge, so the only way to exercise the
        // "runtime unavailable" path is against a sender whose receiver
        // thread has already exited.
        let unreachable_bridge = AsyncBridge::start();
        let sender = unreachable_bridge.sender.clone();
        unreachable_bridge.shutdown();
        let result = sender.send(Box::new(|_runtime: &Runtime| {}));
        assert!(result.is_err(), "sending to a shut-down bridge should fail");
    }
}
