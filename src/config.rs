use std::{sync::Arc, time::Duration};

use regex::Regex;

use crate::{
    exposure_logger::BatchingLogger, Client, Error, Evaluator, ExposureLogger, Result, RuleSource,
};

/// Configuration for [`Client`].
///
/// # Examples
/// ```no_run
/// # use gatekit::{ClientConfig, LoggedEvent};
/// let client = ClientConfig::from_secret_key("secret-abc123")
///     .environment("staging")
///     .exposure_logger(|event: LoggedEvent| {
///         println!("{:?}", event);
///     })
///     .to_client()
///     .unwrap();
/// ```
pub struct ClientConfig {
    pub(crate) secret_key: String,
    pub(crate) base_url: String,
    pub(crate) environment: Option<String>,
    pub(crate) poll_interval: Duration,
    pub(crate) poll_jitter: Duration,
    pub(crate) event_batch_size: usize,
    pub(crate) exposure_logger: Option<Arc<dyn ExposureLogger>>,
    pub(crate) rule_source: Option<Arc<dyn RuleSource>>,
    pub(crate) evaluator: Option<Arc<dyn Evaluator>>,
}

impl ClientConfig {
    /// Default base URL for API calls.
    pub const DEFAULT_BASE_URL: &'static str = "https://api.gatekit.dev/v1";

    /// Create a default configuration using the specified server secret key.
    ///
    /// The key is validated when the client is created.
    ///
    /// ```
    /// # use gatekit::ClientConfig;
    /// ClientConfig::from_secret_key("secret-abc123");
    /// ```
    pub fn from_secret_key(secret_key: impl Into<String>) -> Self {
        ClientConfig {
            secret_key: secret_key.into(),
            base_url: ClientConfig::DEFAULT_BASE_URL.to_owned(),
            environment: None,
            poll_interval: crate::HttpRuleSource::DEFAULT_POLL_INTERVAL,
            poll_jitter: crate::HttpRuleSource::DEFAULT_POLL_JITTER,
            event_batch_size: BatchingLogger::<crate::HttpEventSink>::DEFAULT_BATCH_SIZE,
            exposure_logger: None,
            rule_source: None,
            evaluator: None,
        }
    }

    /// Environment tier applied to every user that doesn't specify one.
    pub fn environment(mut self, tier: impl Into<String>) -> Self {
        self.environment = Some(tier.into());
        self
    }

    /// Override base URL for API calls. Clients should use the default setting in most cases.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Interval between polls for rule updates. Only used by the default rule source.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Jitter applied to the poll interval. Only used by the default rule source.
    pub fn poll_jitter(mut self, jitter: Duration) -> Self {
        self.poll_jitter = jitter;
        self
    }

    /// Number of events the default logger sends per request.
    pub fn event_batch_size(mut self, batch_size: usize) -> Self {
        self.event_batch_size = batch_size;
        self
    }

    /// Set the logger receiving exposures and custom events. Defaults to batching events to the
    /// server.
    pub fn exposure_logger(mut self, logger: impl ExposureLogger + 'static) -> Self {
        self.exposure_logger = Some(Arc::new(logger));
        self
    }

    /// Replace the source of rules and remote evaluations. Defaults to
    /// [`HttpRuleSource`](crate::HttpRuleSource).
    pub fn rule_source(mut self, rule_source: impl RuleSource + 'static) -> Self {
        self.rule_source = Some(Arc::new(rule_source));
        self
    }

    /// Replace the local evaluator. Defaults to [`LocalEvaluator`](crate::LocalEvaluator).
    pub fn evaluator(mut self, evaluator: impl Evaluator + 'static) -> Self {
        self.evaluator = Some(Arc::new(evaluator));
        self
    }

    /// Create a new [`Client`] using this configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidSecretKey`] if the secret key is malformed.
    /// - [`Error::InvalidBaseUrl`] if the base URL cannot be parsed.
    pub fn to_client(self) -> Result<Client> {
        Client::new(self)
    }

    pub(crate) fn validate_secret_key(&self) -> Result<()> {
        let pattern = Regex::new(r"^secret-[A-Za-z0-9_-]+$")
            .expect("secret key pattern should be a valid regex");
        if pattern.is_match(&self.secret_key) {
            Ok(())
        } else {
            Err(Error::InvalidSecretKey)
        }
    }
}
