//! # Departures API Fetching
//!
//! This module fetches weather and upcoming departures for one station and
//! turns them into a [`DepartureSnapshot`].
//!
//! ## Data Source
//!
//! `GET <base_url>/departures/<station>?limit=<n>&key=<api key>` returns:
//!
//! ```json
//! {
//!   "time": "19:10:30",
//!   "weather": { "temperature": "20^", "description": "Clear" },
//!   "stationName": "Castel Franco",
//!   "departures": [
//!     { "type": "REG", "destination": "Bologna C.le", "departureTime": "19:42", "delay": "+5'" }
//!   ]
//! }
//! ```
//!
//! Every field is optional. `^` in the temperature stands for the degree sign.
//!
//! ## Error Handling
//!
//! A failed fetch never blanks the sign. The departures and station from the
//! last good response stay in place and only the weather slot shows a short
//! reason ([`FetchError::placeholder`]). After a failure the next fetch comes
//! after the shorter retry interval instead of the full fetch interval.

use crate::clock::ClockTime;
use crate::connectivity::Link;
use crate::{DepartureRecord, DepartureSnapshot, LOADING_TEXT};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while fetching departures.
///
/// None of them are fatal: each one maps to a placeholder for the weather
/// slot and the previous departures are kept.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Network link is down, no request was attempted
    #[error("network link is down")]
    LinkDown,

    /// API host name did not resolve
    #[error("name resolution failed: {0}")]
    NameResolution(String),

    /// Body was not the JSON document we expect
    #[error("malformed response: {0}")]
    MalformedResponse(#[from] serde_json::Error),

    /// Server answered with something other than 200
    #[error("HTTP status {0}")]
    HttpStatus(u16),

    /// Connect, TLS, timeout or read failure
    #[error("transport failure: {0}")]
    Transport(String),
}

impl FetchError {
    /// Short text shown in place of the weather.
    pub fn placeholder(&self) -> String {
        match self {
            FetchError::LinkDown => "WiFi Error".to_string(),
            FetchError::NameResolution(_) => "DNS Error".to_string(),
            FetchError::MalformedResponse(_) => "JSON Error".to_string(),
            FetchError::HttpStatus(code) => format!("HTTP Error {code}"),
            FetchError::Transport(_) => "Connection Failed".to_string(),
        }
    }
}

/// Errors building the HTTP source at startup.
#[derive(Error, Debug)]
pub enum SourceSetupError {
    #[error("invalid API URL {0}: {1}")]
    InvalidUrl(String, String),

    #[error("HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("async runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    time: Option<Value>,
    weather: Option<ApiWeather>,
    station_name: Option<Value>,
    departures: Option<Vec<ApiDeparture>>,
}

#[derive(Deserialize)]
struct ApiWeather {
    temperature: Option<Value>,
    description: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiDeparture {
    #[serde(rename = "type")]
    kind: Option<Value>,
    destination: Option<Value>,
    departure_time: Option<Value>,
    delay: Option<Value>,
}

/// Render a JSON leaf as display text. Strings are taken verbatim, numbers
/// and booleans in their JSON form, null or missing as empty.
fn text_of(value: &Option<Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Fields of one successful response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiUpdate {
    /// `None` when the response carried no weather object
    pub weather_text: Option<String>,
    /// `None` when absent or empty
    pub station_name: Option<String>,
    pub departures: Vec<DepartureRecord>,
    /// Server wall time, when present and well formed
    pub time: Option<ClockTime>,
}

/// Parse a response body.
///
/// ```
/// use train_sign_lib::departures::parse_response;
///
/// let update = parse_response(r#"{"weather":{"temperature":"20^","description":"Clear"}}"#).unwrap();
/// assert_eq!(update.weather_text.as_deref(), Some("20° - Clear"));
/// assert!(update.departures.is_empty());
/// ```
pub fn parse_response(body: &str) -> Result<ApiUpdate, FetchError> {
    let response: ApiResponse = serde_json::from_str(body)?;

    let weather_text = response.weather.map(|w| {
        let temperature = text_of(&w.temperature).replace('^', "°");
        format!("{} - {}", temperature, text_of(&w.description))
    });

    let station_name = Some(text_of(&response.station_name)).filter(|s| !s.trim().is_empty());

    let departures = response
        .departures
        .unwrap_or_default()
        .iter()
        .map(|d| {
            DepartureRecord::new(
                &text_of(&d.kind),
                &text_of(&d.destination),
                &text_of(&d.departure_time),
                &text_of(&d.delay),
            )
        })
        .collect();

    let time = match &response.time {
        None | Some(Value::Null) => None,
        Some(raw) => {
            let raw = text_of(&Some(raw.clone()));
            let parsed = ClockTime::parse(&raw);
            if parsed.is_none() {
                tracing::warn!("ignoring unparseable server time {:?}", raw);
            }
            parsed
        }
    };

    Ok(ApiUpdate {
        weather_text,
        station_name,
        departures,
        time,
    })
}

/// Where response bodies come from. The HTTP implementation is
/// [`HttpDepartureSource`]; tests substitute canned bodies.
pub trait DepartureSource {
    /// Fetch one raw response body. Only 200 responses are returned as `Ok`.
    fn fetch_body(&mut self) -> Result<String, FetchError>;
}

/// Departures API over HTTPS, blocking with a hard timeout.
pub struct HttpDepartureSource {
    runtime: tokio::runtime::Runtime,
    client: reqwest::Client,
    url: Url,
    limit: u32,
    key: String,
}

impl HttpDepartureSource {
    pub fn new(
        base_url: &str,
        station_code: &str,
        key: &str,
        limit: u32,
        timeout: Duration,
    ) -> Result<Self, SourceSetupError> {
        let raw = format!("{}/departures/{}", base_url.trim_end_matches('/'), station_code);
        let url = Url::parse(&raw).map_err(|e| SourceSetupError::InvalidUrl(raw.clone(), e.to_string()))?;
        if url.host_str().is_none() {
            return Err(SourceSetupError::InvalidUrl(raw, "missing host".to_string()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(Self {
            runtime,
            client,
            url,
            limit,
            key: key.to_string(),
        })
    }

    /// Request URL without the query string (the key stays out of logs).
    pub fn url(&self) -> &Url {
        &self.url
    }

    fn resolve_host(&self) -> Result<(), FetchError> {
        let host = self.url.host_str().unwrap_or_default();
        let port = self.url.port_or_known_default().unwrap_or(443);
        let mut addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| FetchError::NameResolution(format!("{host}: {e}")))?;
        match addrs.next() {
            Some(_) => Ok(()),
            None => Err(FetchError::NameResolution(format!("{host}: no addresses"))),
        }
    }
}

impl DepartureSource for HttpDepartureSource {
    fn fetch_body(&mut self) -> Result<String, FetchError> {
        self.resolve_host()?;

        let request = self
            .client
            .get(self.url.clone())
            .query(&[("limit", self.limit.to_string()), ("key", self.key.clone())]);

        self.runtime.block_on(async move {
            let response = request
                .send()
                .await
                .map_err(|e| FetchError::Transport(e.to_string()))?;

            let status = response.status();
            if status != StatusCode::OK {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            response
                .text()
                .await
                .map_err(|e| FetchError::Transport(e.to_string()))
        })
    }
}

/// Upper bound of the default retry interval.
const DEFAULT_RETRY: Duration = Duration::from_secs(30);

/// Owner of the current snapshot and the fetch schedule.
pub struct Fetcher<S> {
    source: S,
    snapshot: Arc<DepartureSnapshot>,
    last_good_weather: String,
    interval_ms: u64,
    retry_ms: u64,
    last_fetch_ms: Option<u64>,
    last_failed: bool,
}

impl<S: DepartureSource> Fetcher<S> {
    /// Fetch every `interval`. Failed fetches are retried after 30 s, or
    /// after `interval` if that is shorter.
    pub fn new(source: S, interval: Duration) -> Self {
        Self {
            source,
            snapshot: Arc::new(DepartureSnapshot::default()),
            last_good_weather: LOADING_TEXT.to_string(),
            interval_ms: interval.as_millis() as u64,
            retry_ms: interval.min(DEFAULT_RETRY).as_millis() as u64,
            last_fetch_ms: None,
            last_failed: false,
        }
    }

    /// Retry failed fetches after `retry`, capped at the fetch interval.
    pub fn with_retry(mut self, retry: Duration) -> Self {
        self.retry_ms = (retry.as_millis() as u64).min(self.interval_ms);
        self
    }

    #[cfg(test)]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The latest snapshot. Cheap to clone, never mutated in place.
    pub fn snapshot(&self) -> &Arc<DepartureSnapshot> {
        &self.snapshot
    }

    /// True before the first fetch and once the interval has passed. The
    /// retry interval applies after a failure.
    pub fn is_due(&self, now_ms: u64) -> bool {
        let wait = if self.last_failed {
            self.retry_ms
        } else {
            self.interval_ms
        };
        match self.last_fetch_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= wait,
        }
    }

    /// Fetch and install a new snapshot.
    ///
    /// On success returns the server time, if any, for clock sync. On failure
    /// the snapshot is replaced by a copy whose only change is the weather
    /// placeholder, and the error is returned for logging.
    pub fn fetch<L: Link>(&mut self, link: &L, now_ms: u64) -> Result<Option<ClockTime>, FetchError> {
        self.last_fetch_ms = Some(now_ms);

        let result = self.try_fetch(link);
        self.last_failed = result.is_err();
        match result {
            Ok(update) => {
                if let Some(weather) = update.weather_text {
                    self.last_good_weather = weather;
                }
                let station_name = update
                    .station_name
                    .or_else(|| self.snapshot.station_name.clone());

                tracing::info!(
                    "fetched {} departures for {}",
                    update.departures.len(),
                    station_name.as_deref().unwrap_or("unnamed station")
                );

                self.snapshot = Arc::new(DepartureSnapshot {
                    weather_text: self.last_good_weather.clone(),
                    station_name,
                    departures: update.departures,
                });
                Ok(update.time)
            }
            Err(error) => {
                tracing::warn!("departure fetch failed: {}", error);
                let mut snapshot = DepartureSnapshot::clone(&self.snapshot);
                snapshot.weather_text = error.placeholder();
                self.snapshot = Arc::new(snapshot);
                Err(error)
            }
        }
    }

    fn try_fetch<L: Link>(&mut self, link: &L) -> Result<ApiUpdate, FetchError> {
        if !link.is_connected() {
            return Err(FetchError::LinkDown);
        }
        let body = self.source.fetch_body()?;
        tracing::debug!("payload received: {} bytes", body.len());
        parse_response(&body)
    }
}
