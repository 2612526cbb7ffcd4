//! Rule definitions as served by the rules endpoint.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A complete set of gate and config definitions at a point in time.
///
/// Snapshots are installed into an [`Evaluator`](crate::Evaluator) as a whole and are never
/// modified afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSnapshot {
    /// Version of the snapshot (server timestamp of the last change, in milliseconds).
    #[serde(default)]
    pub time: i64,
    /// Feature gate definitions.
    #[serde(default)]
    pub feature_gates: Vec<TryParse<Spec>>,
    /// Dynamic config and experiment definitions.
    #[serde(default)]
    pub dynamic_configs: Vec<TryParse<Spec>>,
}

/// `TryParse` allows a single definition to fail parsing without failing the whole snapshot.
///
/// If the server starts sending a format this SDK does not understand for one gate, the rest of
/// the gates are still usable and the unparsed one is evaluated remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TryParse<T> {
    /// Successfully parsed.
    Parsed(T),
    /// Parsing failed.
    ParseFailed(serde_json::Value),
}

impl<T> From<T> for TryParse<T> {
    fn from(value: T) -> TryParse<T> {
        TryParse::Parsed(value)
    }
}

impl<'a, T> From<&'a TryParse<T>> for Option<&'a T> {
    fn from(value: &TryParse<T>) -> Option<&T> {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}

/// Definition of a single gate or config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Spec {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub salt: String,
    /// Value returned when no rule passes. Ignored for gates.
    #[serde(default)]
    pub default_value: serde_json::Value,
    /// Which identifier rules bucket on. Defaults to `userID`.
    #[serde(default)]
    pub id_type: Option<String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

fn default_enabled() -> bool {
    true
}

/// A targeting rule. All conditions must match for the rule to apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Rule {
    pub id: String,
    /// Salt for bucketing. Falls back to `id`.
    #[serde(default)]
    pub salt: Option<String>,
    /// Share of matching users that pass the rule, in percents (`0.0..=100.0`).
    pub pass_percentage: f64,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub return_value: serde_json::Value,
    #[serde(default)]
    pub id_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    #[serde(default)]
    pub operator: Option<Operator>,
    /// User field the condition applies to, for `user_field` conditions.
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub target_value: serde_json::Value,
}

/// What a condition inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    /// Matches everyone.
    Public,
    /// Matches on a user field or custom attribute.
    UserField,
    /// Matches on the environment tier.
    Environment,
    /// Condition types that can only be evaluated by the server.
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum Operator {
    Any,
    None,
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    VersionGt,
    VersionGte,
    VersionLt,
    VersionLte,
    StrContainsAny,
    StrMatches,
    /// Operators that can only be evaluated by the server.
    #[serde(other)]
    Unsupported,
}

/// Snapshot indexed by name, ready for evaluation.
#[derive(Debug, Default)]
pub(crate) struct CompiledSnapshot {
    pub(crate) time: i64,
    pub(crate) gates: HashMap<String, Spec>,
    pub(crate) configs: HashMap<String, Spec>,
}

impl RuleSnapshot {
    pub(crate) fn compile(self) -> CompiledSnapshot {
        CompiledSnapshot {
            time: self.time,
            gates: index(self.feature_gates),
            configs: index(self.dynamic_configs),
        }
    }
}

fn index(specs: Vec<TryParse<Spec>>) -> HashMap<String, Spec> {
    specs
        .into_iter()
        .filter_map(|spec| match spec {
            TryParse::Parsed(spec) => Some((spec.name.clone(), spec)),
            TryParse::ParseFailed(value) => {
                log::warn!(target: "gatekit",
                           name:serde = value.get("name");
                           "failed to parse rule definition, it will be evaluated remotely");
                None
            }
        })
        .collect()
}
