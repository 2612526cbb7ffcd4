//! Server-side SDK for gatekit, a feature gate and dynamic config service.
//!
//! # Overview
//!
//! The SDK revolves around a [`Client`] that decides feature gate and dynamic config values for
//! [`User`]s. Rules are downloaded from the server on [`Client::initialize`] and kept up-to-date by
//! a background polling task, so most decisions are made locally by an [`Evaluator`]. Gates and
//! configs that cannot be decided locally are transparently evaluated by the server.
//!
//! Every locally decided value is recorded as an [`Exposure`] through an [`ExposureLogger`]. The
//! default logger batches exposures and custom events and delivers them to the server. Logging
//! happens in the background and never slows down or fails an evaluation.
//!
//! # Lifecycle
//!
//! A client moves through [`LifecycleState`]s: it has to be initialized before gates can be checked
//! and every call fails once it has been shut down. Call [`Client::shutdown`] (or
//! [`Client::shutdown_sync`] to also wait for in-flight deliveries) before exiting, otherwise
//! buffered events are lost.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum.
//!
//! In production, it is recommended to fall back to a default value on any error, as feature gate
//! evaluation should not be critical enough to cause system crashes. However, the returned errors
//! are valuable for debugging and usually indicate that developer's attention is needed.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages under
//! the `gatekit` target. Consider integrating a `log`-compatible logger implementation for better
//! visibility into SDK operations.
//!
//! # Examples
//!
//! Examples can be found in the `demos` directory of the crate repository.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod client;
mod config;
mod dynamic_config;
mod error;
mod evaluator;
mod exposure_logger;
mod http;
mod lifecycle;
mod poller;
mod rule_source;
mod rules;
mod scope;
mod sharder;
mod snapshot;
mod user;

#[cfg(test)]
mod test_support;

pub use client::Client;
pub use config::ClientConfig;
pub use dynamic_config::DynamicConfig;
pub use error::{Error, Result};
pub use evaluator::{Decision, Evaluation, Evaluator, LocalEvaluator};
pub use exposure_logger::{
    BatchingLogger, Event, EventSink, EventValue, Exposure, ExposureKind, ExposureLogger,
    LoggedEvent, NoopExposureLogger,
};
pub use http::{HttpEventSink, HttpRuleSource};
pub use lifecycle::{LifecycleError, LifecycleState};
pub use rule_source::RuleSource;
pub use snapshot::{Condition, ConditionKind, Operator, Rule, RuleSnapshot, Spec, TryParse};
pub use user::{AttributeValue, Attributes, User};
