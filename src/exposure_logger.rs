//! Exposure and custom event recording.
use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use chrono::{DateTime, Utc};
use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::{Result, User};

/// What kind of value an exposure was recorded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExposureKind {
    /// A feature gate.
    Gate,
    /// A dynamic config or experiment.
    Config,
}

/// A record that `user` was shown the decided value of a gate or config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exposure {
    /// Whether a gate or a config was evaluated.
    pub kind: ExposureKind,
    /// Gate or config name.
    pub name: String,
    /// The normalized user the value was decided for.
    pub user: User,
    /// The decided value: a boolean for gates, JSON for configs.
    pub value: serde_json::Value,
    /// The rule that produced the value. Empty if unknown.
    #[serde(rename = "ruleID")]
    pub rule_id: String,
    /// When the value was decided.
    pub time: DateTime<Utc>,
}

/// Value attached to a custom event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From)]
#[serde(untagged)]
pub enum EventValue {
    /// A string value.
    String(String),
    /// A numeric value.
    Number(f64),
}

impl From<&str> for EventValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i64> for EventValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

/// A custom event logged with [`Client::log_event`](crate::Client::log_event).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Event name.
    pub event_name: String,
    /// Optional value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<EventValue>,
    /// Optional string metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
    /// The normalized user the event is about.
    pub user: User,
    /// When the event was logged.
    pub time: DateTime<Utc>,
}

/// Anything an [`ExposureLogger`] can be asked to record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoggedEvent {
    /// Gate or config exposure.
    Exposure(Exposure),
    /// Custom event.
    Custom(Event),
}

/// Records exposures and custom events.
///
/// Methods are called from background tasks, never on the evaluation path. Returned errors are
/// logged and dropped; they never reach the caller of an evaluation method.
///
/// A closure accepting [`LoggedEvent`] can be used as a logger:
///
/// ```
/// # use gatekit::{ClientConfig, LoggedEvent};
/// let config = ClientConfig::from_secret_key("secret-key").exposure_logger(|event: LoggedEvent| {
///     println!("{:?}", event);
/// });
/// ```
pub trait ExposureLogger: Send + Sync {
    /// Record that a user was exposed to a gate or config value.
    fn log_exposure(&self, exposure: Exposure) -> Result<()>;

    /// Record a custom event.
    fn log_event(&self, event: Event) -> Result<()>;

    /// Deliver everything buffered so far. Called once during shutdown.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// A logger that discards everything.
pub struct NoopExposureLogger;

impl ExposureLogger for NoopExposureLogger {
    fn log_exposure(&self, _exposure: Exposure) -> Result<()> {
        Ok(())
    }

    fn log_event(&self, _event: Event) -> Result<()> {
        Ok(())
    }
}

impl<T: Fn(LoggedEvent) + Send + Sync> ExposureLogger for T {
    fn log_exposure(&self, exposure: Exposure) -> Result<()> {
        self(LoggedEvent::Exposure(exposure));
        Ok(())
    }

    fn log_event(&self, event: Event) -> Result<()> {
        self(LoggedEvent::Custom(event));
        Ok(())
    }
}

/// Destination for batches produced by [`BatchingLogger`].
pub trait EventSink: Send + Sync {
    /// Deliver a batch of events.
    fn deliver(&self, events: Vec<LoggedEvent>) -> Result<()>;
}

impl<T: Fn(Vec<LoggedEvent>) -> Result<()> + Send + Sync> EventSink for T {
    fn deliver(&self, events: Vec<LoggedEvent>) -> Result<()> {
        self(events)
    }
}

/// An [`ExposureLogger`] that queues events and hands them to an [`EventSink`] in batches.
///
/// A batch is delivered as soon as the queue holds `batch_size` events, and everything left is
/// delivered on [`flush`](ExposureLogger::flush). Batches that fail to deliver are dropped.
pub struct BatchingLogger<S> {
    sink: S,
    batch_size: usize,
    queue: Mutex<VecDeque<LoggedEvent>>,
}

impl<S: EventSink> BatchingLogger<S> {
    /// Smallest accepted batch size.
    pub const MIN_BATCH_SIZE: usize = 10;
    /// Largest accepted batch size.
    pub const MAX_BATCH_SIZE: usize = 1_000;
    /// Default batch size.
    pub const DEFAULT_BATCH_SIZE: usize = 100;

    /// Create a logger delivering to `sink`. `batch_size` is clamped to
    /// [`MIN_BATCH_SIZE`](Self::MIN_BATCH_SIZE)..=[`MAX_BATCH_SIZE`](Self::MAX_BATCH_SIZE).
    pub fn new(sink: S, batch_size: usize) -> BatchingLogger<S> {
        BatchingLogger {
            sink,
            batch_size: batch_size.clamp(Self::MIN_BATCH_SIZE, Self::MAX_BATCH_SIZE),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Number of events waiting for delivery.
    pub fn queued_event_count(&self) -> usize {
        self.queue().len()
    }

    fn push(&self, event: LoggedEvent) -> Result<()> {
        let batch = {
            let mut queue = self.queue();
            queue.push_back(event);
            if queue.len() < self.batch_size {
                return Ok(());
            }
            next_batch(&mut queue, self.batch_size)
        };
        self.deliver(batch)
    }

    fn deliver(&self, batch: Vec<LoggedEvent>) -> Result<()> {
        log::debug!(target: "gatekit", "delivering {} events", batch.len());
        self.sink.deliver(batch)
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<LoggedEvent>> {
        self.queue
            .lock()
            .expect("thread holding event queue lock should not panic")
    }
}

fn next_batch(queue: &mut VecDeque<LoggedEvent>, batch_size: usize) -> Vec<LoggedEvent> {
    let len = queue.len().min(batch_size);
    queue.drain(..len).collect()
}

impl<S: EventSink> ExposureLogger for BatchingLogger<S> {
    fn log_exposure(&self, exposure: Exposure) -> Result<()> {
        self.push(LoggedEvent::Exposure(exposure))
    }

    fn log_event(&self, event: Event) -> Result<()> {
        self.push(LoggedEvent::Custom(event))
    }

    fn flush(&self) -> Result<()> {
        let mut result = Ok(());
        loop {
            let batch = next_batch(&mut self.queue(), self.batch_size);
            if batch.is_empty() {
                return result;
            }
            // Keep delivering the remaining batches even if one fails.
            if let Err(err) = self.deliver(batch) {
                result = Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::Utc;

    use super::{
        BatchingLogger, Event, EventValue, Exposure, ExposureKind, ExposureLogger, LoggedEvent,
    };
    use crate::{Error, Result, User};

    fn event(name: &str) -> Event {
        Event {
            event_name: name.to_owned(),
            value: Some(EventValue::from(1.0)),
            metadata: None,
            user: User::with_user_id("u"),
            time: Utc::now(),
        }
    }

    fn recording_sink() -> (
        Arc<Mutex<Vec<Vec<LoggedEvent>>>>,
        impl Fn(Vec<LoggedEvent>) -> Result<()> + Send + Sync,
    ) {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let batches = batches.clone();
            move |events: Vec<LoggedEvent>| -> Result<()> {
                batches.lock().unwrap().push(events);
                Ok(())
            }
        };
        (batches, sink)
    }

    #[test]
    fn batch_size_is_clamped() {
        let (_, sink) = recording_sink();
        let logger = BatchingLogger::new(sink, 1);
        assert_eq!(logger.batch_size, 10);
    }

    #[test]
    fn delivers_full_batches_and_flushes_the_rest() {
        let (batches, sink) = recording_sink();
        let logger = BatchingLogger::new(sink, 10);

        for i in 0..25 {
            logger.log_event(event(&format!("event_{i}"))).unwrap();
        }

        assert_eq!(batches.lock().unwrap().len(), 2);
        assert_eq!(logger.queued_event_count(), 5);

        logger.flush().unwrap();

        let batches = batches.lock().unwrap();
        assert_eq!(
            batches.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![10, 10, 5]
        );
        assert_eq!(logger.queued_event_count(), 0);
    }

    #[test]
    fn failed_delivery_is_reported_and_dropped() {
        let logger = BatchingLogger::new(
            |_events: Vec<LoggedEvent>| -> Result<()> { Err(Error::Telemetry("offline".to_owned())) },
            10,
        );
        logger.log_event(event("a")).unwrap();

        assert!(matches!(logger.flush(), Err(Error::Telemetry(_))));
        assert_eq!(logger.queued_event_count(), 0);
    }

    #[test]
    fn closure_logger_receives_exposures() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let logger = {
            let received = received.clone();
            move |event: LoggedEvent| received.lock().unwrap().push(event)
        };

        logger
            .log_exposure(Exposure {
                kind: ExposureKind::Gate,
                name: "gate".to_owned(),
                user: User::default(),
                value: true.into(),
                rule_id: "rule".to_owned(),
                time: Utc::now(),
            })
            .unwrap();

        assert!(matches!(
            received.lock().unwrap()[0],
            LoggedEvent::Exposure(Exposure {
                kind: ExposureKind::Gate,
                ..
            })
        ));
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_value(LoggedEvent::Custom(event("purchase"))).unwrap();

        assert_eq!(json["type"], "custom");
        assert_eq!(json["eventName"], "purchase");
        assert_eq!(json["value"], 1.0);
        assert_eq!(json["user"]["userID"], "u");
    }
}
