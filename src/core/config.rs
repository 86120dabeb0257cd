use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;
use std::time::Duration;

/// API credentials for one venue account.
///
/// Immutable once built. `Debug` and `Serialize` never print the key or secret.
#[derive(Clone)]
pub struct Credentials {
    api_key: Secret<String>,
    secret_key: Secret<String>,
}

impl Credentials {
    pub fn new(api_key: String, secret_key: String) -> Self {
        Self {
            api_key: Secret::new(api_key),
            secret_key: Secret::new(secret_key),
        }
    }

    /// Empty credentials, usable for public endpoints and channels only
    pub fn empty() -> Self {
        Self::new(String::new(), String::new())
    }

    pub fn is_present(&self) -> bool {
        !self.api_key.expose_secret().is_empty() && !self.secret_key.expose_secret().is_empty()
    }

    /// Get API key (use carefully - exposes secret)
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Get secret key (use carefully - exposes secret)
    pub fn secret_key(&self) -> &str {
        self.secret_key.expose_secret()
    }

    /// Fails with a configuration error when either half is missing
    pub fn require(&self) -> Result<&Self, ConfigError> {
        if self.is_present() {
            Ok(self)
        } else {
            Err(ConfigError::MissingCredentials)
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub credentials: Credentials,
    pub testnet: bool,
    pub base_url: Option<String>,
}

// Custom Serialize implementation - never expose secrets in serialization
impl Serialize for ExchangeConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("ExchangeConfig", 4)?;
        state.serialize_field("api_key", "[REDACTED]")?;
        state.serialize_field("secret_key", "[REDACTED]")?;
        state.serialize_field("testnet", &self.testnet)?;
        state.serialize_field("base_url", &self.base_url)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for ExchangeConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct ExchangeConfigHelper {
            api_key: String,
            secret_key: String,
            #[serde(default)]
            testnet: bool,
            base_url: Option<String>,
        }

        let helper = ExchangeConfigHelper::deserialize(deserializer)?;
        Ok(Self {
            credentials: Credentials::new(helper.api_key, helper.secret_key),
            testnet: helper.testnet,
            base_url: helper.base_url,
        })
    }
}

impl ExchangeConfig {
    /// Create a new configuration with API credentials
    #[must_use]
    pub fn new(api_key: String, secret_key: String) -> Self {
        Self {
            credentials: Credentials::new(api_key, secret_key),
            testnet: false,
            base_url: None,
        }
    }

    /// Create configuration from environment variables
    ///
    /// Expected environment variables:
    /// - `{EXCHANGE}_API_KEY` (e.g., `BYBIT_API_KEY`)
    /// - `{EXCHANGE}_SECRET_KEY` (e.g., `BYBIT_SECRET_KEY`)
    /// - `{EXCHANGE}_TESTNET` (optional, defaults to false)
    /// - `{EXCHANGE}_BASE_URL` (optional)
    pub fn from_env(exchange_prefix: &str) -> Result<Self, ConfigError> {
        let prefix = exchange_prefix.to_uppercase();
        let api_key_var = format!("{}_API_KEY", prefix);
        let secret_key_var = format!("{}_SECRET_KEY", prefix);

        let api_key = env::var(&api_key_var)
            .map_err(|_| ConfigError::MissingEnvironmentVariable(api_key_var))?;
        let secret_key = env::var(&secret_key_var)
            .map_err(|_| ConfigError::MissingEnvironmentVariable(secret_key_var))?;

        let testnet = env::var(format!("{}_TESTNET", prefix))
            .map(|v| v.parse::<bool>().unwrap_or(false))
            .unwrap_or(false);
        let base_url = env::var(format!("{}_BASE_URL", prefix)).ok();

        Ok(Self {
            credentials: Credentials::new(api_key, secret_key),
            testnet,
            base_url,
        })
    }

    /// Create configuration from a .env file and environment variables
    ///
    /// A missing .env file is not an error; system variables are used instead.
    ///
    /// **Security Warning**: Never commit .env files to version control!
    #[cfg(feature = "env-file")]
    pub fn from_env_file(exchange_prefix: &str) -> Result<Self, ConfigError> {
        Self::from_env_file_with_path(exchange_prefix, ".env")
    }

    #[cfg(feature = "env-file")]
    pub fn from_env_file_with_path(
        exchange_prefix: &str,
        env_file_path: &str,
    ) -> Result<Self, ConfigError> {
        match dotenv::from_path(env_file_path) {
            Ok(()) => {}
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file '{}': {}",
                    env_file_path, e
                )));
            }
        }

        Self::from_env(exchange_prefix)
    }

    /// Configuration for market data only; no credentials
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            credentials: Credentials::empty(),
            testnet: false,
            base_url: None,
        }
    }

    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.credentials.is_present()
    }

    #[must_use]
    pub const fn testnet(mut self, testnet: bool) -> Self {
        self.testnet = testnet;
        self
    }

    #[must_use]
    pub fn base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }
}

/// Tunables for the connectivity core.
///
/// Defaults follow the Bybit V5 mainnet endpoints and limits.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub exchange_name: String,
    pub rest_base_url: String,
    pub ws_public_url: String,
    pub ws_private_url: String,
    pub request_timeout: Duration,
    pub max_attempts: u32,
    pub rest_initial_backoff: Duration,
    pub rest_max_backoff: Duration,
    pub ws_initial_backoff: Duration,
    pub ws_max_backoff: Duration,
    pub rate_limit_calls: usize,
    pub rate_limit_period: Duration,
    pub heartbeat_interval: Duration,
    pub pong_timeout: Duration,
    pub connect_timeout: Duration,
    pub auth_timeout: Duration,
    pub stop_timeout: Duration,
    pub recv_window_ms: u64,
    pub auth_expiry_ms: u64,
    pub user_agent: String,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            exchange_name: "bybit".to_string(),
            rest_base_url: "https://api.bybit.com".to_string(),
            ws_public_url: "wss://stream.bybit.com/v5/public/linear".to_string(),
            ws_private_url: "wss://stream.bybit.com/v5/private".to_string(),
            request_timeout: Duration::from_secs(30),
            max_attempts: 3,
            rest_initial_backoff: Duration::from_secs(1),
            rest_max_backoff: Duration::from_secs(30),
            ws_initial_backoff: Duration::from_secs(5),
            ws_max_backoff: Duration::from_secs(60),
            rate_limit_calls: 120,
            rate_limit_period: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(5),
            recv_window_ms: 5000,
            auth_expiry_ms: 30_000,
            user_agent: "venuelink/0.1".to_string(),
        }
    }
}

impl ConnectorConfig {
    /// Bybit testnet endpoints, otherwise identical to the defaults
    pub fn testnet() -> Self {
        Self {
            rest_base_url: "https://api-testnet.bybit.com".to_string(),
            ws_public_url: "wss://stream-testnet.bybit.com/v5/public/linear".to_string(),
            ws_private_url: "wss://stream-testnet.bybit.com/v5/private".to_string(),
            ..Self::default()
        }
    }

    /// Derive endpoints from an `ExchangeConfig` (testnet flag and base URL override)
    pub fn for_exchange(config: &ExchangeConfig) -> Self {
        let mut connector = if config.testnet {
            Self::testnet()
        } else {
            Self::default()
        };
        if let Some(base_url) = &config.base_url {
            connector.rest_base_url.clone_from(base_url);
        }
        connector
    }

    pub fn with_rest_base_url(mut self, url: impl Into<String>) -> Self {
        self.rest_base_url = url.into();
        self
    }

    pub fn with_ws_urls(mut self, public: impl Into<String>, private: impl Into<String>) -> Self {
        self.ws_public_url = public.into();
        self.ws_private_url = private.into();
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_rest_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.rest_initial_backoff = initial;
        self.rest_max_backoff = max;
        self
    }

    pub fn with_ws_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.ws_initial_backoff = initial;
        self.ws_max_backoff = max;
        self
    }

    pub fn with_rate_limit(mut self, calls: usize, period: Duration) -> Self {
        self.rate_limit_calls = calls;
        self.rate_limit_period = period;
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration, pong_timeout: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.pong_timeout = pong_timeout;
        self
    }

    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    pub fn with_recv_window(mut self, recv_window_ms: u64) -> Self {
        self.recv_window_ms = recv_window_ms;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::InvalidConfiguration(msg.to_string()));

        if self.rest_base_url.is_empty() {
            return invalid("REST base URL is empty");
        }
        if !self.ws_public_url.starts_with("ws") || !self.ws_private_url.starts_with("ws") {
            return invalid("WebSocket URLs must use ws:// or wss://");
        }
        if self.max_attempts == 0 {
            return invalid("max_attempts must be at least 1");
        }
        if self.rest_initial_backoff > self.rest_max_backoff
            || self.ws_initial_backoff > self.ws_max_backoff
        {
            return invalid("initial backoff exceeds max backoff");
        }
        if self.rate_limit_calls == 0 || self.rate_limit_period.is_zero() {
            return invalid("rate limit must allow at least one call per non-empty period");
        }
        if self.heartbeat_interval.is_zero() || self.pong_timeout.is_zero() {
            return invalid("heartbeat interval and pong timeout must be non-zero");
        }
        if self.recv_window_ms == 0 {
            return invalid("receive window must be non-zero");
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvironmentVariable(String),

    #[error("Missing API credentials")]
    MissingCredentials,

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_are_redacted() {
        let config = ExchangeConfig::new("my_key".to_string(), "my_secret".to_string());
        let debug = format!("{:?}", config);
        assert!(!debug.contains("my_key"));
        assert!(!debug.contains("my_secret"));

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("my_secret"));
        assert!(json.contains("[REDACTED]"));
    }

    #[test]
    fn test_read_only_has_no_credentials() {
        let config = ExchangeConfig::read_only();
        assert!(!config.has_credentials());
        assert!(matches!(
            config.credentials.require(),
            Err(ConfigError::MissingCredentials)
        ));
    }

    #[test]
    fn test_from_env_missing_variable() {
        let err = ExchangeConfig::from_env("VENUELINK_ABSENT_PREFIX").unwrap_err();
        assert!(
            matches!(err, ConfigError::MissingEnvironmentVariable(var) if var == "VENUELINK_ABSENT_PREFIX_API_KEY")
        );
    }

    #[test]
    fn test_connector_for_testnet() {
        let exchange = ExchangeConfig::read_only().testnet(true);
        let connector = ConnectorConfig::for_exchange(&exchange);
        assert!(connector.rest_base_url.contains("testnet"));
        assert!(connector.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let config = ConnectorConfig::default()
            .with_rest_backoff(Duration::from_secs(10), Duration::from_secs(1));
        assert!(config.validate().is_err());

        let config = ConnectorConfig::default().with_max_attempts(0);
        assert!(config.validate().is_err());
    }
}
