use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Evaluated value of a dynamic config or experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicConfig {
    /// Config name.
    pub name: String,
    /// Config parameters. Usually a JSON object.
    pub value: serde_json::Value,
    /// The rule that produced the value. Empty if unknown.
    #[serde(rename = "ruleID")]
    pub rule_id: String,
}

impl DynamicConfig {
    pub(crate) fn new(
        name: impl Into<String>,
        value: serde_json::Value,
        rule_id: Option<String>,
    ) -> DynamicConfig {
        DynamicConfig {
            name: name.into(),
            value,
            rule_id: rule_id.unwrap_or_default(),
        }
    }

    /// Get a parameter, returning `None` if it is missing or has a different type.
    ///
    /// ```
    /// # fn test(config: gatekit::DynamicConfig) {
    /// let price: f64 = config.get("price").unwrap_or(9.99);
    /// # }
    /// ```
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.value
            .get(key)
            .and_then(|value| T::deserialize(value).ok())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::DynamicConfig;

    #[test]
    fn typed_parameter_access() {
        let config = DynamicConfig::new(
            "pricing",
            json!({ "price": 12.5, "currency": "EUR", "tiers": [1, 2] }),
            None,
        );

        assert_eq!(config.get::<f64>("price"), Some(12.5));
        assert_eq!(config.get::<String>("currency").as_deref(), Some("EUR"));
        assert_eq!(config.get::<Vec<u32>>("tiers"), Some(vec![1, 2]));
        assert_eq!(config.get::<String>("price"), None);
        assert_eq!(config.get::<bool>("missing"), None);
        assert_eq!(config.rule_id, "");
    }
}
