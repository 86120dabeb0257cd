use crate::core::config::ConnectorConfig;
use crate::core::errors::ExchangeError;
use crate::core::kernel::{MessageHandler, RestExecutor, TungsteniteConnector, WsConnector};
use crate::core::session::StreamSession;
use crate::core::types::{Channel, ConnectionStats, SessionState, VenueValue};
use crate::exchanges::bybit::codec::BybitCodec;
use crate::exchanges::bybit::rest::{BybitRestClient, SERVER_TIME_ENDPOINT};
use crate::exchanges::bybit::types::{BybitCategory, BybitOrderRequest};
use tracing::instrument;

/// Bybit V5 account connection: signed REST plus public and private streams.
///
/// REST calls and both channels share one set of credentials; every REST
/// call goes through the same rate limiter.
pub struct BybitConnector<K: WsConnector = TungsteniteConnector> {
    config: ConnectorConfig,
    rest: BybitRestClient<RestExecutor>,
    streams: StreamSession<K, BybitCodec>,
}

impl<K: WsConnector> BybitConnector<K> {
    pub fn new(
        config: ConnectorConfig,
        rest: RestExecutor,
        streams: StreamSession<K, BybitCodec>,
    ) -> Self {
        Self {
            config,
            rest: BybitRestClient::new(rest),
            streams,
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn rest(&self) -> &BybitRestClient<RestExecutor> {
        &self.rest
    }

    pub fn executor(&self) -> &RestExecutor {
        self.rest.inner()
    }

    pub fn streams(&self) -> &StreamSession<K, BybitCodec> {
        &self.streams
    }

    /// Align request timestamps with the venue clock; returns the offset in ms
    #[instrument(skip(self))]
    pub async fn sync_time(&self) -> Result<i64, ExchangeError> {
        self.executor().sync_server_time(SERVER_TIME_ENDPOINT).await
    }

    pub async fn server_time(&self) -> Result<VenueValue, ExchangeError> {
        self.rest.server_time().await
    }

    pub async fn get_tickers(
        &self,
        category: BybitCategory,
        symbol: Option<&str>,
    ) -> Result<VenueValue, ExchangeError> {
        self.rest.get_tickers(category, symbol).await
    }

    pub async fn get_wallet_balance(
        &self,
        account_type: &str,
        coin: Option<&str>,
    ) -> Result<VenueValue, ExchangeError> {
        self.rest.get_wallet_balance(account_type, coin).await
    }

    #[instrument(skip(self, order), fields(symbol = %order.symbol))]
    pub async fn place_order(&self, order: &BybitOrderRequest) -> Result<VenueValue, ExchangeError> {
        self.rest.place_order(order).await
    }

    pub async fn cancel_order(
        &self,
        category: BybitCategory,
        symbol: &str,
        order_id: &str,
    ) -> Result<VenueValue, ExchangeError> {
        self.rest.cancel_order(category, symbol, order_id).await
    }

    pub fn subscribe(&self, channel: Channel, topic: impl Into<String>) -> bool {
        self.streams.subscribe(channel, topic)
    }

    pub fn unsubscribe(&self, channel: Channel, topic: &str) -> bool {
        self.streams.unsubscribe(channel, topic)
    }

    pub fn register_handler(&self, channel: Channel, handler: impl MessageHandler + 'static) {
        self.streams.register_handler(channel, handler);
    }

    pub fn start(&self) -> Result<(), ExchangeError> {
        self.streams.start()
    }

    pub async fn stop(&self) -> Result<(), ExchangeError> {
        self.streams.stop().await
    }

    pub fn state(&self, channel: Channel) -> SessionState {
        self.streams.state(channel)
    }

    pub fn stats(&self, channel: Channel) -> ConnectionStats {
        self.streams.stats(channel)
    }
}
