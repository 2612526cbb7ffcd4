//! A background task that keeps the evaluator's rules up-to-date.
//!
//! The task consumes [`RuleSource::subscribe_updates`](crate::RuleSource::subscribe_updates) and
//! installs every non-empty entry into the [`Evaluator`]. It runs until stopped by
//! [`PollingTask::shutdown`].
use std::sync::Arc;

use futures::{stream::BoxStream, StreamExt};
use tokio::{runtime::Handle, sync::oneshot, task::JoinHandle};

use crate::{Error, Evaluator, Result, RuleSnapshot};

pub(crate) struct PollingTask {
    /// Used to send a stop command to the polling task. Dropping it stops the task as well.
    stop_sender: oneshot::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl PollingTask {
    pub(crate) fn start(
        handle: &Handle,
        updates: BoxStream<'static, Option<RuleSnapshot>>,
        evaluator: Arc<dyn Evaluator>,
    ) -> PollingTask {
        let (stop_sender, stop_receiver) = oneshot::channel();
        let join_handle = handle.spawn(poll_updates(updates, evaluator, stop_receiver));
        log::debug!(target: "gatekit", "started polling task");

        PollingTask {
            stop_sender,
            join_handle,
        }
    }

    /// Stop the polling task and block waiting for it to exit.
    ///
    /// Must not be called from an async execution context.
    pub(crate) fn shutdown(self, handle: &Handle) -> Result<()> {
        // Error means the task has already exited.
        let _ = self.stop_sender.send(());

        match handle.block_on(self.join_handle) {
            Ok(()) => Ok(()),
            Err(err) if err.is_panic() => Err(Error::PollerPanicked),
            Err(_) => {
                // Cancelled along with the runtime. It is not running either way.
                log::debug!(target: "gatekit", "polling task was cancelled");
                Ok(())
            }
        }
    }
}

async fn poll_updates(
    mut updates: BoxStream<'static, Option<RuleSnapshot>>,
    evaluator: Arc<dyn Evaluator>,
    mut stop_receiver: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            // Check the stop command first so no snapshot is installed after shutdown was
            // requested.
            biased;

            _ = &mut stop_receiver => {
                log::debug!(target: "gatekit", "polling task received stop command");
                return;
            }
            update = updates.next() => match update {
                Some(Some(snapshot)) => {
                    log::debug!(target: "gatekit", version = snapshot.time; "installing updated rules");
                    evaluator.set_rules(snapshot);
                }
                Some(None) => {
                    log::trace!(target: "gatekit", "no rule updates");
                }
                None => {
                    log::debug!(target: "gatekit", "rule update stream ended");
                    return;
                }
            },
        }
    }
}
