use crate::core::config::{ConnectorConfig, ExchangeConfig};
use crate::core::errors::ExchangeError;
use crate::core::kernel::{
    HmacSigner, HttpTransport, RateLimiter, RestClientBuilder, RestClientConfig, Signer,
    TungsteniteConnector, WsConnector,
};
use crate::core::session::StreamSession;
use crate::exchanges::bybit::codec::BybitCodec;
use crate::exchanges::bybit::connector::BybitConnector;
use crate::exchanges::bybit::rest::{ORDER_CANCEL_ENDPOINT, ORDER_CREATE_ENDPOINT};
use std::sync::Arc;
use std::time::Duration;

/// Order placement and cancellation each get their own window
pub const ORDER_CALLS_PER_SECOND: usize = 10;

/// Create a Bybit connector with the default transports
pub fn build_connector(config: ExchangeConfig) -> Result<BybitConnector, ExchangeError> {
    BybitBuilder::new(config).build()
}

/// Process-wide limiter: the configured default window plus the order buckets
pub fn default_rate_limiter(config: &ConnectorConfig) -> RateLimiter {
    let second = Duration::from_secs(1);
    RateLimiter::new(config.rate_limit_calls, config.rate_limit_period)
        .with_endpoint_limit(ORDER_CREATE_ENDPOINT, ORDER_CALLS_PER_SECOND, second)
        .with_endpoint_limit(ORDER_CANCEL_ENDPOINT, ORDER_CALLS_PER_SECOND, second)
}

pub struct BybitBuilder<K: WsConnector = TungsteniteConnector> {
    exchange: ExchangeConfig,
    connector_config: ConnectorConfig,
    http_transport: Option<Arc<dyn HttpTransport>>,
    rate_limiter: Option<RateLimiter>,
    ws_connector: K,
}

impl BybitBuilder<TungsteniteConnector> {
    pub fn new(exchange: ExchangeConfig) -> Self {
        let connector_config = ConnectorConfig::for_exchange(&exchange);
        Self {
            exchange,
            connector_config,
            http_transport: None,
            rate_limiter: None,
            ws_connector: TungsteniteConnector,
        }
    }
}

impl<K: WsConnector> BybitBuilder<K> {
    pub fn with_connector_config(mut self, config: ConnectorConfig) -> Self {
        self.connector_config = config;
        self
    }

    pub fn with_http_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.http_transport = Some(transport);
        self
    }

    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    pub fn with_ws_connector<W: WsConnector>(self, ws_connector: W) -> BybitBuilder<W> {
        BybitBuilder {
            exchange: self.exchange,
            connector_config: self.connector_config,
            http_transport: self.http_transport,
            rate_limiter: self.rate_limiter,
            ws_connector,
        }
    }

    pub fn build(self) -> Result<BybitConnector<K>, ExchangeError> {
        let config = self.connector_config;
        config.validate()?;

        let signer: Option<Arc<dyn Signer>> = if self.exchange.has_credentials() {
            Some(Arc::new(HmacSigner::new(
                self.exchange.credentials.clone(),
                config.recv_window_ms,
            )))
        } else {
            None
        };

        let rate_limiter = self
            .rate_limiter
            .unwrap_or_else(|| default_rate_limiter(&config));
        let mut rest = RestClientBuilder::new(RestClientConfig::from_connector(&config))
            .with_rate_limiter(rate_limiter);
        if let Some(signer) = &signer {
            rest = rest.with_signer(signer.clone());
        }
        if let Some(transport) = self.http_transport {
            rest = rest.with_transport(transport);
        }

        let streams = StreamSession::new(config.clone(), self.ws_connector, BybitCodec, signer);
        Ok(BybitConnector::new(config, rest.build()?, streams))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Channel;

    #[test]
    fn test_read_only_connector_has_no_private_channel() {
        let connector = BybitBuilder::new(ExchangeConfig::read_only()).build().unwrap();
        assert!(connector.subscribe(Channel::Private, "order"));

        let err = connector.streams().start_channel(Channel::Private).unwrap_err();
        assert!(matches!(err, ExchangeError::ConfigError(_)));
    }

    #[test]
    fn test_testnet_endpoints_follow_exchange_config() {
        let connector = BybitBuilder::new(ExchangeConfig::read_only().testnet(true))
            .build()
            .unwrap();
        assert_eq!(connector.config().rest_base_url, "https://api-testnet.bybit.com");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = BybitBuilder::new(ExchangeConfig::read_only())
            .with_connector_config(ConnectorConfig::default().with_max_attempts(0))
            .build();
        assert!(matches!(result, Err(ExchangeError::ConfigError(_))));
    }
}
