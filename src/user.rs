use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Custom user attributes.
pub type Attributes = HashMap<String, AttributeValue>;

/// Value of a custom user attribute.
#[derive(Debug, Serialize, Deserialize, PartialEq, PartialOrd, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string value.
    String(String),
    /// A numeric value.
    Number(f64),
    /// A boolean value.
    Boolean(bool),
    /// Explicit null.
    Null,
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

/// The subject gates and configs are evaluated for.
///
/// ```
/// # use gatekit::User;
/// let user = User::with_user_id("user-1")
///     .email("user@example.com")
///     .custom("plan", "pro")
///     .environment("staging");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Primary key. Empty for anonymous users.
    #[serde(rename = "userID", default)]
    pub user_id: String,
    /// User email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// IP address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Two-letter country code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// Version of the application the user is running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    /// Secondary identifiers that rules may bucket on instead of `user_id`.
    #[serde(rename = "customIDs", default, skip_serializing_if = "HashMap::is_empty")]
    pub custom_ids: HashMap<String, String>,
    /// Custom attributes rules can match on.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom: Attributes,
    /// Environment tier (e.g., `"production"`, `"staging"`). Filled in from
    /// [`ClientConfig::environment`](crate::ClientConfig::environment) when left empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

impl User {
    /// Create a user with the given primary key.
    pub fn with_user_id(user_id: impl Into<String>) -> User {
        User {
            user_id: user_id.into(),
            ..User::default()
        }
    }

    /// Set [`User::email`].
    pub fn email(mut self, email: impl Into<String>) -> User {
        self.email = Some(email.into());
        self
    }

    /// Set [`User::ip`].
    pub fn ip(mut self, ip: impl Into<String>) -> User {
        self.ip = Some(ip.into());
        self
    }

    /// Set [`User::country`].
    pub fn country(mut self, country: impl Into<String>) -> User {
        self.country = Some(country.into());
        self
    }

    /// Set [`User::app_version`].
    pub fn app_version(mut self, app_version: impl Into<String>) -> User {
        self.app_version = Some(app_version.into());
        self
    }

    /// Add a secondary identifier.
    pub fn custom_id(mut self, id_type: impl Into<String>, id: impl Into<String>) -> User {
        self.custom_ids.insert(id_type.into(), id.into());
        self
    }

    /// Add a custom attribute.
    pub fn custom(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> User {
        self.custom.insert(key.into(), value.into());
        self
    }

    /// Set an explicit environment tier.
    pub fn environment(mut self, tier: impl Into<String>) -> User {
        self.environment = Some(tier.into());
        self
    }

    /// Unit identifier for the given id type. `None` or `"userID"` selects the primary key.
    pub(crate) fn unit_id(&self, id_type: Option<&str>) -> &str {
        match id_type {
            None => &self.user_id,
            Some(id_type) if id_type.eq_ignore_ascii_case("userid") => &self.user_id,
            Some(id_type) => self
                .custom_ids
                .get(id_type)
                .or_else(|| {
                    self.custom_ids
                        .iter()
                        .find(|(key, _)| key.eq_ignore_ascii_case(id_type))
                        .map(|(_, value)| value)
                })
                .map(String::as_str)
                .unwrap_or(""),
        }
    }

    /// Look up a user field by the name rules refer to it with. Custom attributes are consulted
    /// when the name is not a built-in field.
    pub(crate) fn field(&self, name: &str) -> Option<AttributeValue> {
        let builtin = match name.to_ascii_lowercase().as_str() {
            "userid" | "user_id" => Some(&self.user_id).filter(|it| !it.is_empty()),
            "email" => self.email.as_ref(),
            "ip" | "ipaddress" | "ip_address" => self.ip.as_ref(),
            "country" => self.country.as_ref(),
            "appversion" | "app_version" => self.app_version.as_ref(),
            _ => None,
        };
        if let Some(value) = builtin {
            return Some(AttributeValue::String(value.clone()));
        }

        self.custom.get(name).cloned().or_else(|| {
            self.custom
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.clone())
        })
    }
}

/// Apply client-wide defaults to a caller-supplied user.
///
/// A missing user becomes an anonymous user with an empty primary key. `environment` is applied
/// only if it is non-empty and the user did not specify an environment. The caller's value is
/// never modified.
pub(crate) fn normalize(user: Option<&User>, environment: Option<&str>) -> User {
    let mut user = user.cloned().unwrap_or_default();

    if let Some(environment) = environment.filter(|it| !it.is_empty()) {
        if user.environment.is_none() {
            user.environment = Some(environment.to_owned());
        }
    }

    user
}

#[cfg(test)]
mod tests {
    use super::{normalize, AttributeValue, User};

    #[test]
    fn missing_user_becomes_anonymous() {
        let user = normalize(None, None);

        assert_eq!(user.user_id, "");
        assert_eq!(user, User::default());
    }

    #[test]
    fn fills_in_configured_environment() {
        let user = User::with_user_id("a");

        let normalized = normalize(Some(&user), Some("staging"));

        assert_eq!(normalized.environment.as_deref(), Some("staging"));
        // Caller's user is left untouched.
        assert_eq!(user.environment, None);
    }

    #[test]
    fn keeps_explicit_environment() {
        let user = User::with_user_id("a").environment("prod");

        let normalized = normalize(Some(&user), Some("staging"));

        assert_eq!(normalized.environment.as_deref(), Some("prod"));
    }

    #[test]
    fn empty_configured_environment_is_ignored() {
        let normalized = normalize(Some(&User::with_user_id("a")), Some(""));

        assert_eq!(normalized.environment, None);
    }

    #[test]
    fn anonymous_user_gets_environment() {
        let normalized = normalize(None, Some("staging"));

        assert_eq!(normalized.user_id, "");
        assert_eq!(normalized.environment.as_deref(), Some("staging"));
    }

    #[test]
    fn field_lookup_prefers_builtin_fields() {
        let user = User::with_user_id("u")
            .email("u@example.com")
            .custom("Plan", "pro")
            .custom("age", 42.0);

        assert_eq!(user.field("email"), Some("u@example.com".into()));
        assert_eq!(user.field("userID"), Some("u".into()));
        assert_eq!(user.field("plan"), Some("pro".into()));
        assert_eq!(user.field("age"), Some(AttributeValue::Number(42.0)));
        assert_eq!(user.field("country"), None);
    }

    #[test]
    fn unit_id_uses_custom_ids() {
        let user = User::with_user_id("u").custom_id("companyID", "c-1");

        assert_eq!(user.unit_id(None), "u");
        assert_eq!(user.unit_id(Some("userID")), "u");
        assert_eq!(user.unit_id(Some("companyid")), "c-1");
        assert_eq!(user.unit_id(Some("teamID")), "");
    }

    #[test]
    fn serializes_with_wire_names() {
        let user = User::with_user_id("u").app_version("1.2.3");

        let json = serde_json::to_value(&user).unwrap();

        assert_eq!(
            json,
            serde_json::json!({ "userID": "u", "appVersion": "1.2.3" })
        );
    }
}
