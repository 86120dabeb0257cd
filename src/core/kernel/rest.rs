use crate::core::config::{ConfigError, ConnectorConfig};
use crate::core::errors::ExchangeError;
use crate::core::kernel::backoff::BackoffPolicy;
use crate::core::kernel::rate_limit::RateLimiter;
use crate::core::kernel::signer::{canonical_query, Signer};
use crate::core::types::VenueValue;
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::RetryIf;
use tracing::{debug, info, instrument, trace, warn};

/// REST client trait for making venue requests
///
/// `execute` is the single entry point; the verb helpers are conveniences.
#[async_trait]
pub trait RestClient: Send + Sync {
    /// Issue a request, retrying transport failures.
    ///
    /// # Arguments
    /// * `method` - HTTP method
    /// * `endpoint` - API endpoint path
    /// * `params` - JSON object; query string for GET/DELETE, body otherwise
    /// * `signed` - whether to attach authentication headers
    ///
    /// # Returns
    /// The normalized response envelope, a venue `ApiError`, or
    /// `TransientRequestFailure` once every attempt failed in transit.
    async fn execute(
        &self,
        method: Method,
        endpoint: &str,
        params: &Value,
        signed: bool,
    ) -> Result<VenueValue, ExchangeError>;

    async fn get(
        &self,
        endpoint: &str,
        params: &Value,
        signed: bool,
    ) -> Result<VenueValue, ExchangeError> {
        self.execute(Method::GET, endpoint, params, signed).await
    }

    async fn post(
        &self,
        endpoint: &str,
        body: &Value,
        signed: bool,
    ) -> Result<VenueValue, ExchangeError> {
        self.execute(Method::POST, endpoint, body, signed).await
    }
}

/// A fully built HTTP request, ready for the wire
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// The wire underneath `RestExecutor`; swapped out in tests
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ExchangeError>;
}

/// `HttpTransport` backed by a pooled reqwest client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| {
                ExchangeError::ConfigError(ConfigError::InvalidConfiguration(format!(
                    "Failed to build HTTP client: {}",
                    e
                )))
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ExchangeError> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .timeout(request.timeout);

        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(HttpResponse { status, body })
    }
}

/// Configuration for the REST executor
#[derive(Clone, Debug)]
pub struct RestClientConfig {
    /// Base URL for the API
    pub base_url: String,
    /// Exchange name for logging and tracing
    pub exchange_name: String,
    /// Per-attempt request timeout
    pub timeout: Duration,
    /// Attempts per call, first try included
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub user_agent: String,
}

impl RestClientConfig {
    pub fn new(base_url: String, exchange_name: String) -> Self {
        Self {
            base_url,
            exchange_name,
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            user_agent: "venuelink/0.1".to_string(),
        }
    }

    pub fn from_connector(config: &ConnectorConfig) -> Self {
        Self {
            base_url: config.rest_base_url.clone(),
            exchange_name: config.exchange_name.clone(),
            timeout: config.request_timeout,
            max_attempts: config.max_attempts,
            initial_backoff: config.rest_initial_backoff,
            max_backoff: config.rest_max_backoff,
            user_agent: config.user_agent.clone(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }
}

/// Builder for `RestExecutor`
pub struct RestClientBuilder {
    config: RestClientConfig,
    signer: Option<Arc<dyn Signer>>,
    rate_limiter: Option<RateLimiter>,
    transport: Option<Arc<dyn HttpTransport>>,
}

impl RestClientBuilder {
    pub fn new(config: RestClientConfig) -> Self {
        Self {
            config,
            signer: None,
            rate_limiter: None,
            transport: None,
        }
    }

    /// Set the signer for authenticated requests
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Share a process-wide limiter; otherwise one allowing 120 calls/minute is created
    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<RestExecutor, ExchangeError> {
        if self.config.max_attempts == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "max_attempts must be at least 1".to_string(),
            )
            .into());
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&self.config.user_agent)?),
        };

        Ok(RestExecutor {
            transport,
            signer: self.signer,
            rate_limiter: self
                .rate_limiter
                .unwrap_or_else(|| RateLimiter::new(120, Duration::from_secs(60))),
            clock_offset_ms: Arc::new(AtomicI64::new(0)),
            stats: Arc::new(RestStats::default()),
            config: self.config,
        })
    }
}

/// Cumulative counters for one executor
#[derive(Debug, Default)]
pub struct RestStats {
    requests: AtomicU64,
    retries: AtomicU64,
    venue_errors: AtomicU64,
}

impl RestStats {
    /// Attempts put on the wire
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Backoff sleeps taken before re-attempting
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn venue_errors(&self) -> u64 {
        self.venue_errors.load(Ordering::Relaxed)
    }
}

/// Signed/public REST execution with rate limiting, retries and response classification
#[derive(Clone)]
pub struct RestExecutor {
    transport: Arc<dyn HttpTransport>,
    signer: Option<Arc<dyn Signer>>,
    rate_limiter: RateLimiter,
    clock_offset_ms: Arc<AtomicI64>,
    stats: Arc<RestStats>,
    config: RestClientConfig,
}

impl std::fmt::Debug for RestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestExecutor")
            .field("config", &self.config)
            .field("has_signer", &self.signer.is_some())
            .finish_non_exhaustive()
    }
}

impl RestExecutor {
    pub fn stats(&self) -> &RestStats {
        &self.stats
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Offset applied to local time when stamping signed requests
    pub fn clock_offset_ms(&self) -> i64 {
        self.clock_offset_ms.load(Ordering::Relaxed)
    }

    /// Current venue time in milliseconds: local clock plus the last synced offset
    pub fn timestamp_ms(&self) -> u64 {
        let local = chrono::Utc::now().timestamp_millis();
        (local + self.clock_offset_ms()).max(0) as u64
    }

    /// Align signing timestamps with the venue clock.
    ///
    /// Reads the envelope's top-level `time` (milliseconds) from `endpoint`
    /// and stores its distance from the local midpoint of the round trip.
    #[instrument(skip(self), fields(exchange = %self.config.exchange_name))]
    pub async fn sync_server_time(&self, endpoint: &str) -> Result<i64, ExchangeError> {
        let sent = chrono::Utc::now().timestamp_millis();
        let response = self
            .execute(Method::GET, endpoint, &Value::Null, false)
            .await?;
        let received = chrono::Utc::now().timestamp_millis();

        let server_ms = response.get("time").and_then(|t| t.as_i64()).ok_or_else(|| {
            ExchangeError::DeserializationError("Server time response has no `time` field".to_string())
        })?;

        let offset = server_ms - (sent + received) / 2;
        self.clock_offset_ms.store(offset, Ordering::Relaxed);
        info!(offset_ms = offset, "Synchronized clock with venue");
        Ok(offset)
    }

    fn build_url(&self, endpoint: &str, query: &str) -> String {
        if query.is_empty() {
            format!("{}{}", self.config.base_url, endpoint)
        } else {
            format!("{}{}?{}", self.config.base_url, endpoint, query)
        }
    }

    fn retry_strategy(&self) -> impl Iterator<Item = Duration> + Send + '_ {
        let retries = self.config.max_attempts.saturating_sub(1) as usize;
        BackoffPolicy::new(self.config.initial_backoff, self.config.max_backoff)
            .take(retries)
            .inspect(move |delay| {
                self.stats.retries.fetch_add(1, Ordering::Relaxed);
                warn!(
                    exchange = %self.config.exchange_name,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying request after transient failure"
                );
            })
    }

    /// One trip over the wire
    async fn attempt(
        &self,
        method: &Method,
        endpoint: &str,
        query: &str,
        body: Option<&str>,
        signed: bool,
        attempts: &AtomicU32,
    ) -> Result<VenueValue, ExchangeError> {
        let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
        self.rate_limiter.acquire_for(endpoint).await;

        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        match (&self.signer, signed) {
            (Some(signer), true) => {
                let payload = body.unwrap_or(query);
                headers.extend(signer.sign_request(method.as_str(), payload, self.timestamp_ms())?);
            }
            (Some(signer), false) => headers.extend(signer.request_headers(self.timestamp_ms())),
            (None, true) => return Err(ConfigError::MissingCredentials.into()),
            (None, false) => {}
        }

        let request = HttpRequest {
            method: method.clone(),
            url: self.build_url(endpoint, query),
            headers,
            body: body.map(str::to_string),
            timeout: self.config.timeout,
        };

        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        debug!(attempt, url = %request.url, "Sending request");
        let response = self.transport.send(request).await.map_err(|e| {
            debug!(attempt, error = %e, "Transport failure");
            e
        })?;

        self.classify(response)
    }

    /// Map an HTTP response to a normalized payload or a classified error
    fn classify(&self, response: HttpResponse) -> Result<VenueValue, ExchangeError> {
        trace!(status = response.status, body = %response.body, "Response received");

        let status = response.status;
        if status == 429 || (500..600).contains(&status) {
            return Err(ExchangeError::HttpStatus {
                status,
                body: response.body,
            });
        }

        let parsed: Result<Value, _> = serde_json::from_str(&response.body);

        if !(200..300).contains(&status) {
            if let Ok(value) = &parsed {
                self.venue_error(value)?;
            }
            return Err(ExchangeError::HttpStatus {
                status,
                body: response.body,
            });
        }

        let value = parsed.map_err(|e| {
            ExchangeError::DeserializationError(format!("Failed to parse JSON response: {}", e))
        })?;
        self.venue_error(&value)?;

        Ok(VenueValue::from_json(value))
    }

    /// `Err(ApiError)` when the envelope carries a non-zero venue status code
    fn venue_error(&self, value: &Value) -> Result<(), ExchangeError> {
        let Some(code) = value.get("retCode").and_then(Value::as_i64) else {
            return Ok(());
        };
        if code == 0 {
            return Ok(());
        }

        self.stats.venue_errors.fetch_add(1, Ordering::Relaxed);
        let message = value
            .get("retMsg")
            .and_then(Value::as_str)
            .unwrap_or("unknown venue error")
            .to_string();
        warn!(
            exchange = %self.config.exchange_name,
            code,
            reason = %message,
            "Venue rejected request"
        );
        Err(ExchangeError::ApiError { code, message })
    }
}

#[async_trait]
impl RestClient for RestExecutor {
    #[instrument(skip(self, params), fields(exchange = %self.config.exchange_name, method = %method, endpoint = %endpoint))]
    async fn execute(
        &self,
        method: Method,
        endpoint: &str,
        params: &Value,
        signed: bool,
    ) -> Result<VenueValue, ExchangeError> {
        if signed && self.signer.is_none() {
            return Err(ConfigError::MissingCredentials.into());
        }

        let (query, body) = if method == Method::GET || method == Method::DELETE {
            (canonical_query(params), None)
        } else {
            let body = if params.is_null() {
                "{}".to_string()
            } else {
                serde_json::to_string(params).map_err(|e| {
                    ExchangeError::SerializationError(format!(
                        "Failed to serialize request body: {}",
                        e
                    ))
                })?
            };
            (String::new(), Some(body))
        };

        let attempts = AtomicU32::new(0);
        let result = RetryIf::spawn(
            self.retry_strategy(),
            || self.attempt(&method, endpoint, &query, body.as_deref(), signed, &attempts),
            |e: &ExchangeError| e.is_transient(),
        )
        .await;

        result.map_err(|e| {
            if e.is_transient() {
                let attempts = attempts.load(Ordering::Relaxed);
                warn!(attempts, error = %e, "Retries exhausted");
                ExchangeError::TransientRequestFailure {
                    attempts,
                    last_error: e.to_string(),
                }
            } else {
                e
            }
        })
    }
}
