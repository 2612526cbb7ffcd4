use regex::Regex;
use semver::Version;

use crate::{
    sharder::{Md5Sharder, Sharder},
    snapshot::{Condition, ConditionKind, Operator, Rule, Spec},
    AttributeValue, Decision, User,
};

/// Marker for definitions that cannot be evaluated locally and must be deferred to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Unsupported;

const TOTAL_SHARDS: u64 = 10_000;

impl Spec {
    pub(crate) fn eval(&self, user: &User) -> Result<Decision, Unsupported> {
        if !self.enabled {
            return Ok(Decision::new(false, self.default_value.clone(), "disabled"));
        }

        for rule in &self.rules {
            if !rule.matches(user)? {
                continue;
            }

            let pass = self.passes(rule, user);
            let json_value = if pass {
                rule.return_value.clone()
            } else {
                self.default_value.clone()
            };
            return Ok(Decision::new(pass, json_value, rule.id.clone()));
        }

        Ok(Decision::new(false, self.default_value.clone(), "default"))
    }

    fn passes(&self, rule: &Rule, user: &User) -> bool {
        if rule.pass_percentage >= 100.0 {
            return true;
        }
        if rule.pass_percentage <= 0.0 {
            return false;
        }

        let unit_id = user.unit_id(rule.id_type.as_deref().or(self.id_type.as_deref()));
        let rule_salt = rule.salt.as_deref().unwrap_or(&rule.id);
        let shard = Md5Sharder.get_shard(
            format!("{}.{}.{}", self.salt, rule_salt, unit_id),
            TOTAL_SHARDS,
        );

        (shard as f64) < rule.pass_percentage * (TOTAL_SHARDS as f64 / 100.0)
    }
}

impl Rule {
    /// Conditions are checked in order. An unsupported condition is reported even if a later one
    /// would not match, but not if an earlier one already failed.
    fn matches(&self, user: &User) -> Result<bool, Unsupported> {
        for condition in &self.conditions {
            if !condition.eval(user)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Condition {
    fn eval(&self, user: &User) -> Result<bool, Unsupported> {
        let value = match self.kind {
            ConditionKind::Public => return Ok(true),
            ConditionKind::UserField => user.field(self.field.as_deref().ok_or(Unsupported)?),
            ConditionKind::Environment => user.environment.clone().map(AttributeValue::String),
            ConditionKind::Unsupported => return Err(Unsupported),
        };

        self.operator
            .ok_or(Unsupported)?
            .eval(value.as_ref(), &self.target_value)
    }
}

impl Operator {
    /// Apply the operator. Missing or mistyped values do not match.
    fn eval(
        self,
        value: Option<&AttributeValue>,
        target: &serde_json::Value,
    ) -> Result<bool, Unsupported> {
        if self == Operator::Unsupported {
            return Err(Unsupported);
        }
        Ok(self.try_eval(value, target).unwrap_or(false))
    }

    fn try_eval(self, value: Option<&AttributeValue>, target: &serde_json::Value) -> Option<bool> {
        let value = value.filter(|it| **it != AttributeValue::Null)?;

        match self {
            Operator::Any | Operator::None => {
                let value = to_string(value)?;
                let found = targets(target)
                    .filter_map(json_to_string)
                    .any(|target| target.eq_ignore_ascii_case(&value));
                Some(found == (self == Operator::Any))
            }

            Operator::Eq | Operator::Neq => {
                let equal = match (value, target) {
                    (AttributeValue::Number(n), serde_json::Value::Number(t)) => {
                        Some(*n) == t.as_f64()
                    }
                    (AttributeValue::Boolean(b), serde_json::Value::Bool(t)) => b == t,
                    _ => to_string(value)? == json_to_string(target)?,
                };
                Some(equal == (self == Operator::Eq))
            }

            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
                let value = to_number(value)?;
                let target = match target {
                    serde_json::Value::Number(n) => n.as_f64()?,
                    serde_json::Value::String(s) => s.parse().ok()?,
                    _ => return None,
                };
                Some(match self {
                    Operator::Gt => value > target,
                    Operator::Gte => value >= target,
                    Operator::Lt => value < target,
                    _ => value <= target,
                })
            }

            Operator::VersionGt
            | Operator::VersionGte
            | Operator::VersionLt
            | Operator::VersionLte => {
                let value = Version::parse(&to_string(value)?).ok()?;
                let target = Version::parse(target.as_str()?).ok()?;
                Some(match self {
                    Operator::VersionGt => value > target,
                    Operator::VersionGte => value >= target,
                    Operator::VersionLt => value < target,
                    _ => value <= target,
                })
            }

            Operator::StrContainsAny => {
                let value = to_string(value)?.to_lowercase();
                Some(
                    targets(target)
                        .filter_map(json_to_string)
                        .any(|target| value.contains(&target.to_lowercase())),
                )
            }

            Operator::StrMatches => {
                let value = to_string(value)?;
                let regex = Regex::new(target.as_str()?).ok()?;
                Some(regex.is_match(&value))
            }

            Operator::Unsupported => None,
        }
    }
}

/// A target value is either a list or a single value.
fn targets(target: &serde_json::Value) -> impl Iterator<Item = &serde_json::Value> {
    match target {
        serde_json::Value::Array(values) => values.iter().collect::<Vec<_>>().into_iter(),
        value => vec![value].into_iter(),
    }
}

fn to_string(value: &AttributeValue) -> Option<String> {
    match value {
        AttributeValue::String(s) => Some(s.clone()),
        AttributeValue::Number(n) => Some(n.to_string()),
        AttributeValue::Boolean(b) => Some(b.to_string()),
        AttributeValue::Null => None,
    }
}

fn to_number(value: &AttributeValue) -> Option<f64> {
    match value {
        AttributeValue::Number(n) => Some(*n),
        AttributeValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn json_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(match n.as_f64() {
            Some(f) => f.to_string(),
            None => n.to_string(),
        }),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::Unsupported;
    use crate::{
        snapshot::{Condition, ConditionKind, Operator, Rule, Spec},
        AttributeValue, User,
    };

    fn eval(operator: Operator, value: impl Into<AttributeValue>, target: serde_json::Value) -> bool {
        operator.eval(Some(&value.into()), &target).unwrap()
    }

    fn field_condition(field: &str, operator: Operator, target: serde_json::Value) -> Condition {
        Condition {
            kind: ConditionKind::UserField,
            operator: Some(operator),
            field: Some(field.to_owned()),
            target_value: target,
        }
    }

    fn spec(rules: Vec<Rule>) -> Spec {
        Spec {
            name: "spec".to_owned(),
            enabled: true,
            salt: "salt".to_owned(),
            default_value: json!({ "variant": "control" }),
            id_type: None,
            rules,
        }
    }

    fn rule(id: &str, pass_percentage: f64, conditions: Vec<Condition>) -> Rule {
        Rule {
            id: id.to_owned(),
            salt: None,
            pass_percentage,
            conditions,
            return_value: json!({ "variant": "treatment" }),
            id_type: None,
        }
    }

    #[test]
    fn any_is_case_insensitive() {
        assert!(eval(Operator::Any, "US", json!(["us", "ca"])));
        assert!(!eval(Operator::Any, "de", json!(["us", "ca"])));
        assert!(eval(Operator::Any, 42.0, json!([42, 43])));
    }

    #[test]
    fn none_fails_when_value_is_missing() {
        assert!(eval(Operator::None, "de", json!(["us", "ca"])));
        assert!(!eval(Operator::None, "us", json!(["us", "ca"])));
        assert!(!Operator::None.eval(None, &json!(["us"])).unwrap());
    }

    #[test]
    fn eq_compares_numbers_numerically() {
        assert!(eval(Operator::Eq, 3.0, json!(3)));
        assert!(eval(Operator::Eq, "abc", json!("abc")));
        assert!(eval(Operator::Neq, "abc", json!("abd")));
        assert!(eval(Operator::Eq, true, json!(true)));
    }

    #[test]
    fn numeric_comparisons() {
        assert!(eval(Operator::Gt, 10.0, json!(5)));
        assert!(eval(Operator::Gte, "5", json!(5)));
        assert!(eval(Operator::Lt, 1.0, json!("2")));
        assert!(!eval(Operator::Lte, "abc", json!(2)));
    }

    #[test]
    fn version_comparisons() {
        assert!(eval(Operator::VersionGt, "1.10.0", json!("1.9.0")));
        assert!(eval(Operator::VersionLte, "1.9.0", json!("1.9.0")));
        assert!(!eval(Operator::VersionGte, "not-a-version", json!("1.0.0")));
    }

    #[test]
    fn string_operators() {
        assert!(eval(
            Operator::StrContainsAny,
            "User@Example.com",
            json!(["@example.com"])
        ));
        assert!(eval(Operator::StrMatches, "test@example.com", json!("^test.*")));
        assert!(!eval(Operator::StrMatches, "test@example.com", json!("[invalid")));
    }

    #[test]
    fn unsupported_operator_defers_to_server() {
        assert_eq!(
            Operator::Unsupported.eval(Some(&"x".into()), &json!("x")),
            Err(Unsupported)
        );
    }

    #[test]
    fn disabled_spec_returns_default() {
        let mut spec = spec(vec![rule("r", 100.0, vec![])]);
        spec.enabled = false;

        let decision = spec.eval(&User::with_user_id("u")).unwrap();

        assert!(!decision.value);
        assert_eq!(decision.json_value, json!({ "variant": "control" }));
        assert_eq!(decision.rule_id.as_deref(), Some("disabled"));
    }

    #[test]
    fn first_matching_rule_wins() {
        let spec = spec(vec![
            rule(
                "employees",
                100.0,
                vec![field_condition(
                    "email",
                    Operator::StrContainsAny,
                    json!(["@company.com"]),
                )],
            ),
            rule("everyone", 0.0, vec![]),
        ]);

        let employee = spec
            .eval(&User::with_user_id("a").email("a@company.com"))
            .unwrap();
        assert!(employee.value);
        assert_eq!(employee.rule_id.as_deref(), Some("employees"));
        assert_eq!(employee.json_value, json!({ "variant": "treatment" }));

        let outsider = spec
            .eval(&User::with_user_id("b").email("b@gmail.com"))
            .unwrap();
        assert!(!outsider.value);
        assert_eq!(outsider.rule_id.as_deref(), Some("everyone"));
        assert_eq!(outsider.json_value, json!({ "variant": "control" }));
    }

    #[test]
    fn no_matching_rule_returns_default() {
        let spec = spec(vec![rule(
            "us_only",
            100.0,
            vec![field_condition("country", Operator::Any, json!(["US"]))],
        )]);

        let decision = spec.eval(&User::with_user_id("a").country("DE")).unwrap();

        assert!(!decision.value);
        assert_eq!(decision.rule_id.as_deref(), Some("default"));
    }

    #[test]
    fn environment_condition_matches_tier() {
        let spec = spec(vec![rule(
            "staging",
            100.0,
            vec![Condition {
                kind: ConditionKind::Environment,
                operator: Some(Operator::Any),
                field: Some("tier".to_owned()),
                target_value: json!(["staging"]),
            }],
        )]);

        assert!(spec.eval(&User::default().environment("staging")).unwrap().value);
        assert!(!spec.eval(&User::default().environment("production")).unwrap().value);
    }

    #[test]
    fn unsupported_condition_defers_whole_spec() {
        let spec = spec(vec![rule(
            "ip",
            100.0,
            vec![Condition {
                kind: ConditionKind::Unsupported,
                operator: Some(Operator::Any),
                field: None,
                target_value: json!(null),
            }],
        )]);

        assert_eq!(spec.eval(&User::with_user_id("a")), Err(Unsupported));
    }

    #[test]
    fn partial_rollout_is_stable_per_user() {
        let spec = spec(vec![rule("half", 50.0, vec![])]);

        let passed = (0..1000)
            .filter(|i| {
                let user = User::with_user_id(format!("user-{i}"));
                let first = spec.eval(&user).unwrap().value;
                assert_eq!(first, spec.eval(&user).unwrap().value);
                first
            })
            .count();

        assert!((400..=600).contains(&passed), "{passed}");
    }
}
