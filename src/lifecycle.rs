//! Client lifecycle: `Created → Initializing → Ready → ShuttingDown → Shutdown`.
use std::sync::Mutex;

use crate::poller::PollingTask;

/// Lifecycle state of a [`Client`](crate::Client).
///
/// `Shutdown` is terminal: every operation after it fails with [`LifecycleError::ShutDown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// The client was constructed but `initialize()` has not been called yet.
    Created,
    /// The first `initialize()` call is downloading rules.
    Initializing,
    /// Rules were fetched (or the fetch failed) and the polling task is running.
    Ready,
    /// `shutdown()` is stopping the polling task and flushing the logger.
    ShuttingDown,
    /// The client has been shut down.
    Shutdown,
}

impl LifecycleState {
    /// Returns `true` once shutdown has started.
    pub fn is_shut_down(self) -> bool {
        matches!(self, LifecycleState::ShuttingDown | LifecycleState::Shutdown)
    }

    /// Guard for evaluation methods.
    pub(crate) fn ensure_ready(self) -> Result<(), LifecycleError> {
        match self {
            LifecycleState::Ready => Ok(()),
            LifecycleState::Created | LifecycleState::Initializing => {
                Err(LifecycleError::NotInitialized)
            }
            LifecycleState::ShuttingDown | LifecycleState::Shutdown => {
                Err(LifecycleError::ShutDown)
            }
        }
    }

    /// Guard for methods that are allowed before initialization (event logging, initialization
    /// itself).
    pub(crate) fn ensure_not_shut_down(self) -> Result<(), LifecycleError> {
        if self.is_shut_down() {
            Err(LifecycleError::ShutDown)
        } else {
            Ok(())
        }
    }
}

/// An operation was invoked in a lifecycle state that does not permit it.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    /// `initialize()` has not completed yet.
    #[error("client is not initialized, call `initialize()` first")]
    NotInitialized,
    /// `shutdown()` has been called.
    #[error("client has been shut down")]
    ShutDown,
}

/// Owns the lifecycle state together with the polling task handle, so that state transitions and
/// starting/stopping the poller can never interleave.
pub(crate) struct Lifecycle {
    slot: Mutex<Slot>,
}

struct Slot {
    state: LifecycleState,
    poller: Option<PollingTask>,
    /// Start-once guard. Stays `true` after shutdown takes the handle away.
    poller_started: bool,
}

impl Lifecycle {
    pub(crate) fn new() -> Lifecycle {
        Lifecycle {
            slot: Mutex::new(Slot {
                state: LifecycleState::Created,
                poller: None,
                poller_started: false,
            }),
        }
    }

    pub(crate) fn state(&self) -> LifecycleState {
        self.lock().state
    }

    /// `Created → Initializing`. Re-entrant calls in `Initializing` or `Ready` keep their state.
    pub(crate) fn begin_initialize(&self) -> Result<(), LifecycleError> {
        let mut slot = self.lock();
        slot.state.ensure_not_shut_down()?;
        if slot.state == LifecycleState::Created {
            slot.state = LifecycleState::Initializing;
            log::debug!(target: "gatekit", "client is initializing");
        }
        Ok(())
    }

    /// Run `install` unless shutdown has begun. Holding the lock while installing guarantees that
    /// no snapshot lands after teardown started.
    pub(crate) fn install_unless_shut_down(
        &self,
        install: impl FnOnce(),
    ) -> Result<(), LifecycleError> {
        let slot = self.lock();
        slot.state.ensure_not_shut_down()?;
        install();
        Ok(())
    }

    /// Start the polling task if it was never started and move to `Ready`.
    ///
    /// Returns `true` if `start_poller` was called.
    pub(crate) fn finish_initialize(
        &self,
        start_poller: impl FnOnce() -> PollingTask,
    ) -> Result<bool, LifecycleError> {
        let mut slot = self.lock();
        slot.state.ensure_not_shut_down()?;

        let started = if slot.poller_started {
            false
        } else {
            slot.poller = Some(start_poller());
            slot.poller_started = true;
            true
        };

        if slot.state != LifecycleState::Ready {
            slot.state = LifecycleState::Ready;
            log::debug!(target: "gatekit", "client is ready");
        }
        Ok(started)
    }

    /// `* → ShuttingDown`, handing the polling task (if any) to the caller to stop.
    pub(crate) fn begin_shutdown(&self) -> Result<Option<PollingTask>, LifecycleError> {
        let mut slot = self.lock();
        slot.state.ensure_not_shut_down()?;
        slot.state = LifecycleState::ShuttingDown;
        log::debug!(target: "gatekit", "client is shutting down");
        Ok(slot.poller.take())
    }

    pub(crate) fn finish_shutdown(&self) {
        self.lock().state = LifecycleState::Shutdown;
        log::debug!(target: "gatekit", "client has shut down");
    }

    #[cfg(test)]
    pub(crate) fn has_poller(&self) -> bool {
        self.lock().poller.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slot> {
        self.slot
            .lock()
            .expect("thread holding lifecycle lock should not panic")
    }
}
