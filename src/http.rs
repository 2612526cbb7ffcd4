//! HTTP implementations of [`RuleSource`] and [`EventSink`].
use std::{
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::{stream::BoxStream, StreamExt};
use rand::{thread_rng, Rng};
use reqwest::{StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    Decision, Error, EventSink, LoggedEvent, Result, RuleSnapshot, RuleSource, User,
};

const DOWNLOAD_CONFIG_SPECS_ENDPOINT: &str = "/download_config_specs";
const CHECK_GATE_ENDPOINT: &str = "/check_gate";
const GET_CONFIG_ENDPOINT: &str = "/get_config";
const LOG_EVENT_ENDPOINT: &str = "/log_event";

const API_KEY_HEADER: &str = "gatekit-api-key";
const SDK_VERSION_HEADER: &str = "gatekit-sdk-version";

/// Shared HTTP client for all endpoints.
pub(crate) struct Transport {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
    base_url: String,
    secret_key: String,
    /// If we receive a 401 Unauthorized error during a request, it means the secret key is not
    /// valid. We cache this error so we don't issue additional requests to the server.
    unauthorized: AtomicBool,
}

impl Transport {
    pub(crate) fn new(secret_key: &str, base_url: &str) -> Result<Transport> {
        // Validate early so a bad URL fails client construction, not the first request.
        Url::parse(base_url).map_err(Error::InvalidBaseUrl)?;

        Ok(Transport {
            client: reqwest::blocking::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            secret_key: secret_key.to_owned(),
            unauthorized: AtomicBool::new(false),
        })
    }

    fn post(
        &self,
        endpoint: &str,
        body: &impl Serialize,
    ) -> Result<reqwest::blocking::Response> {
        if self.unauthorized.load(Ordering::Relaxed) {
            return Err(Error::Unauthorized);
        }

        let url = Url::parse(&format!("{}{}", self.base_url, endpoint))
            .map_err(Error::InvalidBaseUrl)?;

        log::debug!(target: "gatekit", endpoint; "sending request");
        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.secret_key)
            .header(SDK_VERSION_HEADER, env!("CARGO_PKG_VERSION"))
            .json(body)
            .send()?;

        response.error_for_status().map_err(|err| {
            if err.status() == Some(StatusCode::UNAUTHORIZED) {
                log::warn!(target: "gatekit", "client is not authorized. Check your secret key");
                self.unauthorized.store(true, Ordering::Relaxed);
                Error::Unauthorized
            } else {
                log::warn!(target: "gatekit", endpoint; "received non-200 response: {:?}", err);
                Error::from(err)
            }
        })
    }

    fn post_json<R: DeserializeOwned>(&self, endpoint: &str, body: &impl Serialize) -> Result<R> {
        Ok(self.post(endpoint, body)?.json()?)
    }
}

/// Downloads rules from the server, polls for updates, and evaluates gates and configs remotely.
pub struct HttpRuleSource {
    transport: Arc<Transport>,
    /// Version of the last downloaded snapshot. The server only sends rules newer than that.
    since_time: Arc<AtomicI64>,
    poll_interval: Duration,
    poll_jitter: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadConfigSpecsResponse {
    #[serde(default)]
    has_updates: bool,
    #[serde(flatten)]
    snapshot: RuleSnapshot,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DownloadConfigSpecsRequest {
    since_time: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckGateRequest<'a> {
    user: &'a User,
    gate_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GetConfigRequest<'a> {
    user: &'a User,
    config_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct RemoteEvaluationResponse {
    #[serde(default)]
    value: serde_json::Value,
    #[serde(rename = "ruleID", default)]
    rule_id: Option<String>,
    #[serde(default)]
    passed: bool,
}

impl HttpRuleSource {
    /// Default value for [`HttpRuleSource::poll_interval`].
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
    /// Default value for [`HttpRuleSource::poll_jitter`].
    pub const DEFAULT_POLL_JITTER: Duration = Duration::from_secs(1);

    /// Create a rule source talking to `base_url`.
    pub fn new(secret_key: &str, base_url: &str) -> Result<HttpRuleSource> {
        Ok(HttpRuleSource::with_transport(Arc::new(Transport::new(
            secret_key, base_url,
        )?)))
    }

    pub(crate) fn with_transport(transport: Arc<Transport>) -> HttpRuleSource {
        HttpRuleSource {
            transport,
            since_time: Arc::new(AtomicI64::new(0)),
            poll_interval: HttpRuleSource::DEFAULT_POLL_INTERVAL,
            poll_jitter: HttpRuleSource::DEFAULT_POLL_JITTER,
        }
    }

    /// Interval to wait between requests for updated rules.
    pub fn poll_interval(mut self, interval: Duration) -> HttpRuleSource {
        self.poll_interval = interval;
        self
    }

    /// Random amount subtracted from each poll interval. This helps to avoid multiple server
    /// instances synchronizing and producing spiky network load.
    pub fn poll_jitter(mut self, jitter: Duration) -> HttpRuleSource {
        self.poll_jitter = jitter;
        self
    }
}

/// Request for rules. A `full` download asks for everything regardless of what was downloaded
/// before.
fn download_request(since_time: &AtomicI64, full: bool) -> DownloadConfigSpecsRequest {
    DownloadConfigSpecsRequest {
        since_time: if full {
            0
        } else {
            since_time.load(Ordering::SeqCst)
        },
    }
}

fn download(
    transport: &Transport,
    since_time: &AtomicI64,
    full: bool,
) -> Result<Option<RuleSnapshot>> {
    let response: DownloadConfigSpecsResponse = transport.post_json(
        DOWNLOAD_CONFIG_SPECS_ENDPOINT,
        &download_request(since_time, full),
    )?;

    if !response.has_updates {
        log::debug!(target: "gatekit", "rules are up-to-date");
        return Ok(None);
    }

    log::debug!(target: "gatekit", version = response.snapshot.time; "downloaded rules");
    since_time.store(response.snapshot.time, Ordering::SeqCst);
    Ok(Some(response.snapshot))
}

impl RuleSource for HttpRuleSource {
    fn fetch_initial(&self) -> Result<Option<RuleSnapshot>> {
        download(&self.transport, &self.since_time, true)
    }

    fn subscribe_updates(&self) -> BoxStream<'static, Option<RuleSnapshot>> {
        let transport = self.transport.clone();
        let since_time = self.since_time.clone();
        let (interval, jitter_amount) = (self.poll_interval, self.poll_jitter);

        futures::stream::unfold((), move |()| {
            let transport = transport.clone();
            let since_time = since_time.clone();
            async move {
                tokio::time::sleep(jitter(interval, jitter_amount)).await;

                // The transport is blocking, keep it off the async workers.
                let update = tokio::task::spawn_blocking(move || {
                    download(&transport, &since_time, false)
                })
                .await;
                let update = match update {
                    Ok(Ok(update)) => update,
                    Ok(Err(err)) => {
                        log::warn!(target: "gatekit", "error while fetching rule updates: {err}");
                        None
                    }
                    Err(err) => {
                        log::warn!(target: "gatekit", "rule update fetch did not complete: {err}");
                        None
                    }
                };
                Some((update, ()))
            }
        })
        .boxed()
    }

    fn remote_evaluate_gate(&self, user: &User, gate_name: &str) -> Result<Decision> {
        let response: RemoteEvaluationResponse = self
            .transport
            .post_json(CHECK_GATE_ENDPOINT, &CheckGateRequest { user, gate_name })?;

        let value = response.value.as_bool().ok_or_else(|| {
            Error::RemoteEvaluation(format!(
                "expected boolean value for gate {gate_name:?}, got {}",
                response.value
            ))
        })?;

        Ok(Decision {
            value,
            json_value: serde_json::Value::Null,
            rule_id: response.rule_id,
        })
    }

    fn remote_evaluate_config(&self, user: &User, config_name: &str) -> Result<Decision> {
        let response: RemoteEvaluationResponse = self
            .transport
            .post_json(GET_CONFIG_ENDPOINT, &GetConfigRequest { user, config_name })?;

        Ok(Decision {
            value: response.passed,
            json_value: response.value,
            rule_id: response.rule_id,
        })
    }
}

/// Delivers event batches to the server.
pub struct HttpEventSink {
    transport: Arc<Transport>,
}

#[derive(Serialize)]
struct LogEventRequest<'a> {
    events: &'a [LoggedEvent],
}

impl HttpEventSink {
    /// Create a sink talking to `base_url`.
    pub fn new(secret_key: &str, base_url: &str) -> Result<HttpEventSink> {
        Ok(HttpEventSink::with_transport(Arc::new(Transport::new(
            secret_key, base_url,
        )?)))
    }

    pub(crate) fn with_transport(transport: Arc<Transport>) -> HttpEventSink {
        HttpEventSink { transport }
    }
}

impl EventSink for HttpEventSink {
    fn deliver(&self, events: Vec<LoggedEvent>) -> Result<()> {
        self.transport
            .post(LOG_EVENT_ENDPOINT, &LogEventRequest { events: &events })
            .map(|_| ())
            .map_err(|err| Error::Telemetry(err.to_string()))
    }
}

/// Apply randomized `jitter` to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}
