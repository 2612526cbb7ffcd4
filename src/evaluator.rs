//! Local evaluation of gates and configs against the current [`RuleSnapshot`].
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::{snapshot::CompiledSnapshot, RuleSnapshot, User};

/// Holds the current rules and evaluates gates and configs against them.
///
/// Implementations must replace rules atomically: a concurrent evaluation observes either the
/// previous snapshot or the new one, never a mix of both.
pub trait Evaluator: Send + Sync {
    /// Replace the current rules.
    fn set_rules(&self, snapshot: RuleSnapshot);

    /// Evaluate the gate for `user`.
    fn evaluate_gate(&self, user: &User, gate_name: &str) -> Evaluation;

    /// Evaluate the config (or experiment) for `user`.
    fn evaluate_config(&self, user: &User, config_name: &str) -> Evaluation;
}

/// Outcome of local evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// The evaluator decided locally.
    Decided(Decision),
    /// The evaluator cannot decide locally; the server has to be asked.
    FetchFromServer,
}

/// A decided gate or config value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// Gate value. For configs, whether the user passed the matched rule.
    pub value: bool,
    /// Config value. `null` for gates.
    #[serde(default)]
    pub json_value: serde_json::Value,
    /// The rule that produced the decision.
    #[serde(rename = "ruleID", default)]
    pub rule_id: Option<String>,
}

impl Decision {
    /// Create a new decision.
    pub fn new(value: bool, json_value: serde_json::Value, rule_id: impl Into<String>) -> Decision {
        Decision {
            value,
            json_value,
            rule_id: Some(rule_id.into()),
        }
    }
}

/// `SpecStore` provides a thread-safe (`Sync`) storage for the current snapshot that allows
/// concurrent access for readers and writers.
///
/// The snapshot itself is immutable and is only ever replaced completely.
#[derive(Default)]
pub(crate) struct SpecStore {
    snapshot: RwLock<Option<Arc<CompiledSnapshot>>>,
}

impl SpecStore {
    pub(crate) fn get(&self) -> Option<Arc<CompiledSnapshot>> {
        // Err() is possible only if the lock is poisoned (writer panicked while holding the lock),
        // which should never happen.
        self.snapshot
            .read()
            .expect("thread holding rules lock should not panic")
            .clone()
    }

    pub(crate) fn set(&self, snapshot: CompiledSnapshot) {
        // Constructing new value before requesting the lock to minimize lock span.
        let snapshot = Some(Arc::new(snapshot));

        *self
            .snapshot
            .write()
            .expect("thread holding rules lock should not panic") = snapshot;
    }
}

/// The default [`Evaluator`].
///
/// Gates and configs that are missing from the snapshot, or that use conditions this SDK cannot
/// evaluate, are deferred to the server.
#[derive(Default)]
pub struct LocalEvaluator {
    store: SpecStore,
}

impl LocalEvaluator {
    /// Create an evaluator without any rules.
    pub fn new() -> LocalEvaluator {
        LocalEvaluator::default()
    }

    /// Version of the installed snapshot, if any.
    pub fn rules_version(&self) -> Option<i64> {
        self.store.get().map(|snapshot| snapshot.time)
    }

    fn evaluate(
        &self,
        user: &User,
        name: &str,
        select: impl FnOnce(&CompiledSnapshot) -> Option<&crate::Spec>,
    ) -> Evaluation {
        // Hold on to the same snapshot for the whole evaluation.
        let Some(snapshot) = self.store.get() else {
            log::trace!(target: "gatekit", name; "no rules installed yet");
            return Evaluation::FetchFromServer;
        };
        let Some(spec) = select(&snapshot) else {
            log::trace!(target: "gatekit", name; "unknown gate or config");
            return Evaluation::FetchFromServer;
        };

        match spec.eval(user) {
            Ok(decision) => Evaluation::Decided(decision),
            Err(_) => {
                log::trace!(target: "gatekit", name; "rules require server evaluation");
                Evaluation::FetchFromServer
            }
        }
    }
}

impl Evaluator for LocalEvaluator {
    fn set_rules(&self, snapshot: RuleSnapshot) {
        self.store.set(snapshot.compile());
    }

    fn evaluate_gate(&self, user: &User, gate_name: &str) -> Evaluation {
        self.evaluate(user, gate_name, |snapshot| snapshot.gates.get(gate_name))
    }

    fn evaluate_config(&self, user: &User, config_name: &str) -> Evaluation {
        self.evaluate(user, config_name, |snapshot| {
            snapshot.configs.get(config_name)
        })
    }
}
