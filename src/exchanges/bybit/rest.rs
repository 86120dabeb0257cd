use crate::core::errors::ExchangeError;
use crate::core::kernel::RestClient;
use crate::core::types::VenueValue;
use crate::exchanges::bybit::types::{BybitCategory, BybitOrderRequest};
use serde_json::{json, Map, Value};

pub const SERVER_TIME_ENDPOINT: &str = "/v5/market/time";
pub const TICKERS_ENDPOINT: &str = "/v5/market/tickers";
pub const WALLET_BALANCE_ENDPOINT: &str = "/v5/account/wallet-balance";
pub const ORDER_CREATE_ENDPOINT: &str = "/v5/order/create";
pub const ORDER_CANCEL_ENDPOINT: &str = "/v5/order/cancel";

/// Thin typed wrapper around `RestClient` for the Bybit V5 API.
///
/// Every call returns the normalized envelope (`retCode`, `retMsg`,
/// `result`, `time`).
#[derive(Debug, Clone)]
pub struct BybitRestClient<R: RestClient> {
    client: R,
}

impl<R: RestClient> BybitRestClient<R> {
    pub fn new(client: R) -> Self {
        Self { client }
    }

    pub fn inner(&self) -> &R {
        &self.client
    }

    pub async fn server_time(&self) -> Result<VenueValue, ExchangeError> {
        self.client.get(SERVER_TIME_ENDPOINT, &Value::Null, false).await
    }

    /// Tickers for a category, or one symbol within it
    pub async fn get_tickers(
        &self,
        category: BybitCategory,
        symbol: Option<&str>,
    ) -> Result<VenueValue, ExchangeError> {
        let mut params = Map::new();
        params.insert("category".to_string(), json!(category.as_str()));
        if let Some(symbol) = symbol {
            params.insert("symbol".to_string(), json!(symbol));
        }
        self.client
            .get(TICKERS_ENDPOINT, &Value::Object(params), false)
            .await
    }

    /// Wallet balance (requires authentication)
    pub async fn get_wallet_balance(
        &self,
        account_type: &str,
        coin: Option<&str>,
    ) -> Result<VenueValue, ExchangeError> {
        let params = json!({ "accountType": account_type, "coin": coin });
        self.client
            .get(WALLET_BALANCE_ENDPOINT, &params, true)
            .await
    }

    /// Place a new order (requires authentication)
    pub async fn place_order(&self, order: &BybitOrderRequest) -> Result<VenueValue, ExchangeError> {
        let body = serde_json::to_value(order).map_err(|e| {
            ExchangeError::SerializationError(format!("Failed to serialize order: {}", e))
        })?;
        self.client.post(ORDER_CREATE_ENDPOINT, &body, true).await
    }

    /// Cancel an existing order (requires authentication)
    pub async fn cancel_order(
        &self,
        category: BybitCategory,
        symbol: &str,
        order_id: &str,
    ) -> Result<VenueValue, ExchangeError> {
        let body = json!({
            "category": category.as_str(),
            "symbol": symbol,
            "orderId": order_id
        });
        self.client.post(ORDER_CANCEL_ENDPOINT, &body, true).await
    }
}
