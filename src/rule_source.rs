use futures::stream::BoxStream;

use crate::{Decision, Result, RuleSnapshot, User};

/// Where rules come from, and the authority gates and configs are deferred to when they cannot be
/// evaluated locally.
///
/// The default implementation is [`HttpRuleSource`](crate::HttpRuleSource).
pub trait RuleSource: Send + Sync {
    /// Download the full rule set. `Ok(None)` means the server has nothing new.
    ///
    /// Called by every [`Client::initialize`](crate::Client::initialize). Failures are logged and
    /// otherwise ignored: the client can run off an empty rule set.
    fn fetch_initial(&self) -> Result<Option<RuleSnapshot>>;

    /// An endless stream of rule updates. `None` entries mean "no update" and are skipped.
    ///
    /// Called at most once per client, when the polling task starts.
    fn subscribe_updates(&self) -> BoxStream<'static, Option<RuleSnapshot>>;

    /// Evaluate a gate on the server. Blocks until the server responds.
    fn remote_evaluate_gate(&self, user: &User, gate_name: &str) -> Result<Decision>;

    /// Evaluate a config on the server. Blocks until the server responds.
    fn remote_evaluate_config(&self, user: &User, config_name: &str) -> Result<Decision>;
}
