//! Fakes for the client's collaborators.
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use futures::{
    channel::mpsc::{self, UnboundedReceiver, UnboundedSender},
    stream::BoxStream,
    StreamExt,
};

use crate::{
    Decision, Error, Evaluation, Evaluator, Event, Exposure, ExposureLogger, LoggedEvent, Result,
    RuleSnapshot, RuleSource, User,
};

pub(crate) fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("condition was not met in time");
}

/// In-memory rule source. Clones share state.
#[derive(Clone)]
pub(crate) struct FakeRuleSource {
    state: Arc<FakeRuleSourceState>,
}

struct FakeRuleSourceState {
    initial: Mutex<Result<Option<RuleSnapshot>>>,
    remote: Mutex<Result<Decision>>,
    sender: UnboundedSender<Option<RuleSnapshot>>,
    receiver: Mutex<Option<UnboundedReceiver<Option<RuleSnapshot>>>>,
    fetches: AtomicUsize,
    subscriptions: AtomicUsize,
    remote_calls: AtomicUsize,
}

impl FakeRuleSource {
    pub(crate) fn new(initial: Result<Option<RuleSnapshot>>) -> FakeRuleSource {
        let (sender, receiver) = mpsc::unbounded();
        FakeRuleSource {
            state: Arc::new(FakeRuleSourceState {
                initial: Mutex::new(initial),
                remote: Mutex::new(Ok(Decision::new(
                    true,
                    serde_json::json!({ "source": "remote" }),
                    "remote_rule",
                ))),
                sender,
                receiver: Mutex::new(Some(receiver)),
                fetches: AtomicUsize::new(0),
                subscriptions: AtomicUsize::new(0),
                remote_calls: AtomicUsize::new(0),
            }),
        }
    }

    pub(crate) fn set_remote(&self, remote: Result<Decision>) {
        *self.state.remote.lock().unwrap() = remote;
    }

    pub(crate) fn push_update(&self, update: Option<RuleSnapshot>) {
        // Fails only once the polling task has exited.
        let _ = self.state.sender.unbounded_send(update);
    }

    pub(crate) fn fetches(&self) -> usize {
        self.state.fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn subscriptions(&self) -> usize {
        self.state.subscriptions.load(Ordering::SeqCst)
    }

    pub(crate) fn remote_calls(&self) -> usize {
        self.state.remote_calls.load(Ordering::SeqCst)
    }
}

impl RuleSource for FakeRuleSource {
    fn fetch_initial(&self) -> Result<Option<RuleSnapshot>> {
        self.state.fetches.fetch_add(1, Ordering::SeqCst);
        self.state.initial.lock().unwrap().clone()
    }

    fn subscribe_updates(&self) -> BoxStream<'static, Option<RuleSnapshot>> {
        self.state.subscriptions.fetch_add(1, Ordering::SeqCst);
        match self.state.receiver.lock().unwrap().take() {
            Some(receiver) => receiver.boxed(),
            None => futures::stream::pending().boxed(),
        }
    }

    fn remote_evaluate_gate(&self, _user: &User, _gate_name: &str) -> Result<Decision> {
        self.state.remote_calls.fetch_add(1, Ordering::SeqCst);
        self.state.remote.lock().unwrap().clone()
    }

    fn remote_evaluate_config(&self, _user: &User, _config_name: &str) -> Result<Decision> {
        self.state.remote_calls.fetch_add(1, Ordering::SeqCst);
        self.state.remote.lock().unwrap().clone()
    }
}

/// Evaluator returning scripted outcomes and recording installed snapshot versions.
#[derive(Clone, Default)]
pub(crate) struct RecordingEvaluator {
    installed: Arc<Mutex<Vec<i64>>>,
    outcome: Arc<Mutex<Option<Evaluation>>>,
    installing: Arc<AtomicBool>,
    install_delay: Option<Duration>,
    panics: bool,
}

impl RecordingEvaluator {
    pub(crate) fn returning(outcome: Evaluation) -> RecordingEvaluator {
        let evaluator = RecordingEvaluator::default();
        *evaluator.outcome.lock().unwrap() = Some(outcome);
        evaluator
    }

    /// An evaluator that takes `delay` to install each snapshot.
    pub(crate) fn slow(delay: Duration) -> RecordingEvaluator {
        RecordingEvaluator {
            install_delay: Some(delay),
            ..RecordingEvaluator::default()
        }
    }

    /// An evaluator that panics on every evaluation.
    pub(crate) fn panicking() -> RecordingEvaluator {
        RecordingEvaluator {
            panics: true,
            ..RecordingEvaluator::default()
        }
    }

    /// Whether a snapshot install is in progress.
    pub(crate) fn is_installing(&self) -> bool {
        self.installing.load(Ordering::SeqCst)
    }

    pub(crate) fn installed_versions(&self) -> Vec<i64> {
        self.installed.lock().unwrap().clone()
    }

    fn outcome(&self) -> Evaluation {
        if self.panics {
            panic!("evaluator failure");
        }
        self.outcome
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(Evaluation::FetchFromServer)
    }
}

impl Evaluator for RecordingEvaluator {
    fn set_rules(&self, snapshot: RuleSnapshot) {
        self.installing.store(true, Ordering::SeqCst);
        if let Some(delay) = self.install_delay {
            std::thread::sleep(delay);
        }
        self.installed.lock().unwrap().push(snapshot.time);
        self.installing.store(false, Ordering::SeqCst);
    }

    fn evaluate_gate(&self, _user: &User, _gate_name: &str) -> Evaluation {
        self.outcome()
    }

    fn evaluate_config(&self, _user: &User, _config_name: &str) -> Evaluation {
        self.outcome()
    }
}

/// Logger recording everything it receives. Clones share state.
#[derive(Clone, Default)]
pub(crate) struct RecordingLogger {
    events: Arc<Mutex<Vec<LoggedEvent>>>,
    flushes: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
    delay: Option<Duration>,
}

impl RecordingLogger {
    /// A logger that records events but reports every call as failed.
    pub(crate) fn failing() -> RecordingLogger {
        let logger = RecordingLogger::default();
        logger.failing.store(true, Ordering::SeqCst);
        logger
    }

    /// A logger that takes `delay` to record each event.
    pub(crate) fn slow(delay: Duration) -> RecordingLogger {
        RecordingLogger {
            delay: Some(delay),
            ..RecordingLogger::default()
        }
    }

    pub(crate) fn exposures(&self) -> Vec<Exposure> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                LoggedEvent::Exposure(exposure) => Some(exposure.clone()),
                LoggedEvent::Custom(_) => None,
            })
            .collect()
    }

    pub(crate) fn custom_events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                LoggedEvent::Custom(event) => Some(event.clone()),
                LoggedEvent::Exposure(_) => None,
            })
            .collect()
    }

    pub(crate) fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    fn record(&self, event: LoggedEvent) -> Result<()> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.events.lock().unwrap().push(event);
        if self.failing.load(Ordering::SeqCst) {
            Err(Error::Telemetry("logger is failing".to_owned()))
        } else {
            Ok(())
        }
    }
}

impl ExposureLogger for RecordingLogger {
    fn log_exposure(&self, exposure: Exposure) -> Result<()> {
        self.record(LoggedEvent::Exposure(exposure))
    }

    fn log_event(&self, event: Event) -> Result<()> {
        self.record(LoggedEvent::Custom(event))
    }

    fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(Error::Telemetry("logger is failing".to_owned()))
        } else {
            Ok(())
        }
    }
}
