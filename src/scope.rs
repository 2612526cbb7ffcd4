//! Concurrency scope shared by everything a single client runs in the background.
//!
//! The scope owns a tokio runtime. Dispatched work is tracked in a [`JoinSet`] so shutdown can wait
//! for it, but tasks are independent: a failed or panicked task is logged and does not affect its
//! siblings or the scope.
use std::{
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard,
    },
};

use tokio::{
    runtime::{Handle, Runtime},
    sync::oneshot,
    task::{JoinError, JoinSet},
};

use crate::{Error, LifecycleError, Result};

pub(crate) struct Scope {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    tasks: Mutex<JoinSet<()>>,
    closed: AtomicBool,
}

impl Scope {
    const WORKER_THREADS: usize = 2;

    pub(crate) fn new() -> Result<Scope> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(Scope::WORKER_THREADS)
            .thread_name("gatekit-worker")
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();

        Ok(Scope {
            runtime: Mutex::new(Some(runtime)),
            handle,
            tasks: Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Run `task` in the background. Errors are logged and swallowed at this boundary.
    pub(crate) fn dispatch<F>(&self, what: &'static str, task: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.spawn(move || {
            if let Err(err) = task() {
                log::warn!(target: "gatekit", "failed to {what}: {err}");
            }
        });
    }

    /// Run the blocking `task` in the background and return a future resolving to its result.
    ///
    /// The future never panics: a panicking task resolves to [`Error::TaskPanicked`], and if the
    /// scope is closed before the task completes, it resolves to [`LifecycleError::ShutDown`].
    pub(crate) fn submit<T, F>(&self, task: F) -> impl Future<Output = Result<T>> + Send + 'static
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        self.spawn(move || {
            let result = std::panic::catch_unwind(AssertUnwindSafe(task)).unwrap_or_else(|_| {
                log::warn!(target: "gatekit", "background task panicked");
                Err(Error::TaskPanicked)
            });
            // Receiver may have been dropped if the caller is no longer interested.
            let _ = sender.send(result);
        });
        async move {
            // The sender is only dropped unsent if the task never ran or was aborted, which
            // happens only when the scope is closed or the client is gone.
            receiver
                .await
                .unwrap_or(Err(Error::Lifecycle(LifecycleError::ShutDown)))
        }
    }

    /// Block until every tracked task (including ones spawned while draining) has finished.
    ///
    /// Must not be called from an async execution context.
    pub(crate) fn drain(&self) {
        loop {
            let mut batch = std::mem::take(&mut *self.tasks());
            if batch.is_empty() {
                return;
            }
            log::debug!(target: "gatekit", "waiting for {} background tasks", batch.len());
            self.handle.block_on(async {
                while let Some(result) = batch.join_next().await {
                    report(result);
                }
            });
        }
    }

    /// Cancel everything still running and tear down the runtime, waiting for it to stop.
    ///
    /// Must not be called from an async execution context.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.tasks().abort_all();

        let runtime = self
            .runtime
            .lock()
            .expect("thread holding runtime lock should not panic")
            .take();
        drop(runtime);
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn spawn(&self, task: impl FnOnce() + Send + 'static) {
        if self.closed.load(Ordering::SeqCst) {
            log::debug!(target: "gatekit", "scope is closed, dropping background task");
            return;
        }

        let mut tasks = self.tasks();
        // Reap finished tasks so the set does not grow without bound.
        while let Some(result) = tasks.try_join_next() {
            report(result);
        }
        tasks.spawn_blocking_on(task, &self.handle);
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks
            .lock()
            .expect("thread holding tasks lock should not panic")
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        // Dropping a runtime blocks, which is not allowed if the client is dropped from inside an
        // async context.
        if let Ok(mut runtime) = self.runtime.lock() {
            if let Some(runtime) = runtime.take() {
                runtime.shutdown_background();
            }
        }
    }
}

fn report(result: std::result::Result<(), JoinError>) {
    match result {
        Err(err) if err.is_panic() => {
            log::warn!(target: "gatekit", "background task panicked");
        }
        _ => {}
    }
}
