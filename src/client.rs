use std::{collections::HashMap, future::Future, sync::Arc};

use chrono::Utc;

use crate::{
    exposure_logger::BatchingLogger,
    http::{HttpEventSink, HttpRuleSource, Transport},
    lifecycle::Lifecycle,
    poller::PollingTask,
    scope::Scope,
    user::normalize,
    ClientConfig, Decision, DynamicConfig, Evaluation, Evaluator, Event, EventValue, Exposure,
    ExposureKind, ExposureLogger, LifecycleState, LocalEvaluator, Result, RuleSource, User,
};

/// A feature gate and dynamic config client.
///
/// In order to create a client instance, first create [`ClientConfig`]. The client must be
/// initialized with [`Client::initialize`] before gates and configs can be evaluated, and should be
/// shut down with [`Client::shutdown`] to deliver the remaining events.
///
/// Every blocking method has an `_async` counterpart returning a future. The future is driven by
/// the client's own background workers, so it can be awaited from any executor. Blocking methods
/// must not be called from an async context.
///
/// # Examples
/// ```no_run
/// # use gatekit::{ClientConfig, User};
/// let client = ClientConfig::from_secret_key("secret-abc123").to_client().unwrap();
/// client.initialize().unwrap();
///
/// let user = User::with_user_id("user-1").country("NZ");
/// if client.check_gate(Some(&user), "new_checkout").unwrap_or(false) {
///     // ...
/// }
///
/// client.shutdown().unwrap();
/// ```
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    lifecycle: Lifecycle,
    scope: Scope,
    environment: Option<String>,
    rule_source: Arc<dyn RuleSource>,
    evaluator: Arc<dyn Evaluator>,
    exposure_logger: Arc<dyn ExposureLogger>,
}

impl Client {
    /// Create a new `Client` using the specified configuration.
    ///
    /// The client does not talk to the server until [`Client::initialize`] is called.
    pub fn new(config: ClientConfig) -> Result<Client> {
        config.validate_secret_key()?;

        let ClientConfig {
            secret_key,
            base_url,
            environment,
            poll_interval,
            poll_jitter,
            event_batch_size,
            exposure_logger,
            rule_source,
            evaluator,
        } = config;

        // The HTTP transport is only needed by the default collaborators and is shared between
        // them.
        let mut transport: Option<Arc<Transport>> = None;
        let mut shared_transport = || -> Result<Arc<Transport>> {
            if let Some(transport) = &transport {
                return Ok(transport.clone());
            }
            let created = Arc::new(Transport::new(&secret_key, &base_url)?);
            transport = Some(created.clone());
            Ok(created)
        };

        let rule_source: Arc<dyn RuleSource> = match rule_source {
            Some(rule_source) => rule_source,
            None => Arc::new(
                HttpRuleSource::with_transport(shared_transport()?)
                    .poll_interval(poll_interval)
                    .poll_jitter(poll_jitter),
            ),
        };
        let exposure_logger: Arc<dyn ExposureLogger> = match exposure_logger {
            Some(exposure_logger) => exposure_logger,
            None => Arc::new(BatchingLogger::new(
                HttpEventSink::with_transport(shared_transport()?),
                event_batch_size,
            )),
        };
        let evaluator: Arc<dyn Evaluator> = match evaluator {
            Some(evaluator) => evaluator,
            None => Arc::new(LocalEvaluator::new()),
        };

        Ok(Client {
            inner: Arc::new(Inner {
                lifecycle: Lifecycle::new(),
                scope: Scope::new()?,
                environment: environment.filter(|it| !it.is_empty()),
                rule_source,
                evaluator,
                exposure_logger,
            }),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.inner.lifecycle.state()
    }

    /// Download the initial rules and start polling for updates.
    ///
    /// A failed download is logged and does not fail initialization: the client becomes ready and
    /// evaluates remotely until rules arrive. Calling `initialize` again re-fetches rules but never
    /// starts a second polling task.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::ShutDown`](crate::LifecycleError::ShutDown) if the client was shut down.
    pub fn initialize(&self) -> Result<()> {
        self.inner.initialize()
    }

    /// Non-blocking version of [`Client::initialize`].
    pub fn initialize_async(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        let inner = self.inner.clone();
        self.inner.scope.submit(move || inner.initialize())
    }

    /// Check the value of a feature gate for `user`. A missing user is evaluated as an anonymous
    /// user.
    ///
    /// Locally decided values are recorded as exposures in the background. Gates that cannot be
    /// decided locally are evaluated by the server and returned as is.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError`](crate::LifecycleError) if the client is not ready.
    /// - Any error of the remote evaluation, unmodified.
    pub fn check_gate(&self, user: Option<&User>, gate_name: &str) -> Result<bool> {
        self.inner.check_gate(user, gate_name)
    }

    /// Non-blocking version of [`Client::check_gate`].
    pub fn check_gate_async(
        &self,
        user: Option<&User>,
        gate_name: &str,
    ) -> impl Future<Output = Result<bool>> + Send + 'static {
        let inner = self.inner.clone();
        let user = user.cloned();
        let gate_name = gate_name.to_owned();
        self.inner
            .scope
            .submit(move || inner.check_gate(user.as_ref(), &gate_name))
    }

    /// Get the value of a dynamic config for `user`. Routing and errors are the same as for
    /// [`Client::check_gate`].
    pub fn get_config(&self, user: Option<&User>, config_name: &str) -> Result<DynamicConfig> {
        self.inner.get_config(user, config_name)
    }

    /// Non-blocking version of [`Client::get_config`].
    pub fn get_config_async(
        &self,
        user: Option<&User>,
        config_name: &str,
    ) -> impl Future<Output = Result<DynamicConfig>> + Send + 'static {
        let inner = self.inner.clone();
        let user = user.cloned();
        let config_name = config_name.to_owned();
        self.inner
            .scope
            .submit(move || inner.get_config(user.as_ref(), &config_name))
    }

    /// Get the parameters of an experiment for `user`. Experiments are evaluated exactly like
    /// dynamic configs.
    pub fn get_experiment(
        &self,
        user: Option<&User>,
        experiment_name: &str,
    ) -> Result<DynamicConfig> {
        self.get_config(user, experiment_name)
    }

    /// Non-blocking version of [`Client::get_experiment`].
    pub fn get_experiment_async(
        &self,
        user: Option<&User>,
        experiment_name: &str,
    ) -> impl Future<Output = Result<DynamicConfig>> + Send + 'static {
        self.get_config_async(user, experiment_name)
    }

    /// Record a custom event. Delivery happens in the background.
    ///
    /// Events can be logged before the client is initialized.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::ShutDown`](crate::LifecycleError::ShutDown) once shutdown has started.
    pub fn log_event(
        &self,
        user: Option<&User>,
        event_name: &str,
        value: Option<EventValue>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<()> {
        self.inner.log_event(user, event_name, value, metadata)
    }

    /// Non-blocking version of [`Client::log_event`].
    pub fn log_event_async(
        &self,
        user: Option<&User>,
        event_name: &str,
        value: Option<EventValue>,
        metadata: Option<HashMap<String, String>>,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let inner = self.inner.clone();
        let user = user.cloned();
        let event_name = event_name.to_owned();
        self.inner.scope.submit(move || {
            inner.log_event(user.as_ref(), &event_name, value, metadata)
        })
    }

    /// Stop polling for updates and flush the exposure logger.
    ///
    /// Background log deliveries that are still in flight are not waited for; use
    /// [`Client::shutdown_sync`] for that.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::ShutDown`](crate::LifecycleError::ShutDown) if shutdown was already
    ///   called.
    /// - [`Error::PollerPanicked`](crate::Error::PollerPanicked) if the polling task crashed.
    pub fn shutdown(&self) -> Result<()> {
        self.inner.shutdown(false)
    }

    /// Non-blocking version of [`Client::shutdown`].
    pub fn shutdown_async(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        let inner = self.inner.clone();
        self.inner.scope.submit(move || inner.shutdown(false))
    }

    /// Shut down, waiting for every background task (including pending log deliveries) to
    /// finish before flushing the logger, then stop the background workers.
    ///
    /// Pending `_async` futures resolve with
    /// [`LifecycleError::ShutDown`](crate::LifecycleError::ShutDown) afterwards.
    pub fn shutdown_sync(&self) -> Result<()> {
        let result = self.inner.shutdown(true);
        // Even if shutdown already happened, make sure nothing is left running.
        self.inner.scope.drain();
        self.inner.scope.close();
        result
    }
}

impl Inner {
    fn initialize(&self) -> Result<()> {
        self.lifecycle.begin_initialize()?;

        log::debug!(target: "gatekit", "fetching initial rules");
        match self.rule_source.fetch_initial() {
            Ok(Some(snapshot)) => {
                log::debug!(target: "gatekit", version = snapshot.time; "installing initial rules");
                self.lifecycle
                    .install_unless_shut_down(|| self.evaluator.set_rules(snapshot))?;
            }
            Ok(None) => {
                log::debug!(target: "gatekit", "no initial rules received");
            }
            Err(err) => {
                log::warn!(target: "gatekit", "failed to fetch initial rules, evaluating remotely until rules are available: {err}");
            }
        }

        let started = self.lifecycle.finish_initialize(|| {
            PollingTask::start(
                self.scope.handle(),
                self.rule_source.subscribe_updates(),
                self.evaluator.clone(),
            )
        })?;
        if !started {
            log::debug!(target: "gatekit", "polling task is already running");
        }

        Ok(())
    }

    fn check_gate(&self, user: Option<&User>, gate_name: &str) -> Result<bool> {
        self.lifecycle.state().ensure_ready()?;
        let user = normalize(user, self.environment.as_deref());

        match self.evaluator.evaluate_gate(&user, gate_name) {
            Evaluation::Decided(Decision {
                value, rule_id, ..
            }) => {
                log::trace!(target: "gatekit", gate_name, user:serde, value; "evaluated gate locally");
                self.dispatch_exposure(ExposureKind::Gate, gate_name, user, value.into(), rule_id);
                Ok(value)
            }
            Evaluation::FetchFromServer => {
                log::debug!(target: "gatekit", gate_name; "evaluating gate remotely");
                let decision = self.rule_source.remote_evaluate_gate(&user, gate_name)?;
                Ok(decision.value)
            }
        }
    }

    fn get_config(&self, user: Option<&User>, config_name: &str) -> Result<DynamicConfig> {
        self.lifecycle.state().ensure_ready()?;
        let user = normalize(user, self.environment.as_deref());

        match self.evaluator.evaluate_config(&user, config_name) {
            Evaluation::Decided(decision) => {
                log::trace!(target: "gatekit", config_name, user:serde; "evaluated config locally");
                let config = DynamicConfig::new(
                    config_name,
                    decision.json_value.clone(),
                    decision.rule_id.clone(),
                );
                self.dispatch_exposure(
                    ExposureKind::Config,
                    config_name,
                    user,
                    decision.json_value,
                    decision.rule_id,
                );
                Ok(config)
            }
            Evaluation::FetchFromServer => {
                log::debug!(target: "gatekit", config_name; "evaluating config remotely");
                let decision = self.rule_source.remote_evaluate_config(&user, config_name)?;
                Ok(DynamicConfig::new(
                    config_name,
                    decision.json_value,
                    decision.rule_id,
                ))
            }
        }
    }

    fn log_event(
        &self,
        user: Option<&User>,
        event_name: &str,
        value: Option<EventValue>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<()> {
        self.lifecycle.state().ensure_not_shut_down()?;

        let event = Event {
            event_name: event_name.to_owned(),
            value,
            metadata,
            user: normalize(user, self.environment.as_deref()),
            time: Utc::now(),
        };
        let logger = self.exposure_logger.clone();
        self.scope
            .dispatch("log event", move || logger.log_event(event));
        Ok(())
    }

    fn dispatch_exposure(
        &self,
        kind: ExposureKind,
        name: &str,
        user: User,
        value: serde_json::Value,
        rule_id: Option<String>,
    ) {
        let exposure = Exposure {
            kind,
            name: name.to_owned(),
            user,
            value,
            rule_id: rule_id.unwrap_or_default(),
            time: Utc::now(),
        };
        let logger = self.exposure_logger.clone();
        self.scope
            .dispatch("log exposure", move || logger.log_exposure(exposure));
    }

    /// `drain` waits for in-flight background tasks before flushing the logger.
    fn shutdown(&self, drain: bool) -> Result<()> {
        let poller = self.lifecycle.begin_shutdown()?;

        let mut result = Ok(());
        if let Some(poller) = poller {
            if let Err(err) = poller.shutdown(self.scope.handle()) {
                log::warn!(target: "gatekit", "failed to stop polling task: {err}");
                result = Err(err);
            }
        }

        if drain {
            self.scope.drain();
        }
        if let Err(err) = self.exposure_logger.flush() {
            log::warn!(target: "gatekit", "failed to flush events: {err}");
        }

        self.lifecycle.finish_shutdown();
        result
    }
}
