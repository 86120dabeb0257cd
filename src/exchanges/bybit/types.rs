use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Product family selected by the `category` parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BybitCategory {
    Spot,
    Linear,
    Inverse,
    Option,
}

impl BybitCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Linear => "linear",
            Self::Inverse => "inverse",
            Self::Option => "option",
        }
    }
}

impl fmt::Display for BybitCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BybitSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BybitOrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BybitTimeInForce {
    GTC,
    IOC,
    FOK,
    PostOnly,
}

/// Body of `POST /v5/order/create`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BybitOrderRequest {
    pub category: BybitCategory,
    pub symbol: String,
    pub side: BybitSide,
    pub order_type: BybitOrderType,
    #[serde(with = "rust_decimal::serde::str")]
    pub qty: Decimal,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::str_option"
    )]
    pub price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<BybitTimeInForce>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduce_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_link_id: Option<String>,
}

impl BybitOrderRequest {
    pub fn market(category: BybitCategory, symbol: impl Into<String>, side: BybitSide, qty: Decimal) -> Self {
        Self {
            category,
            symbol: symbol.into(),
            side,
            order_type: BybitOrderType::Market,
            qty,
            price: None,
            time_in_force: None,
            reduce_only: None,
            order_link_id: None,
        }
    }

    pub fn limit(
        category: BybitCategory,
        symbol: impl Into<String>,
        side: BybitSide,
        qty: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            order_type: BybitOrderType::Limit,
            price: Some(price),
            time_in_force: Some(BybitTimeInForce::GTC),
            ..Self::market(category, symbol, side, qty)
        }
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = Some(true);
        self
    }

    pub fn with_link_id(mut self, link_id: impl Into<String>) -> Self {
        self.order_link_id = Some(link_id.into());
        self
    }
}

/// Stream topic names
pub mod topics {
    pub const ORDER: &str = "order";
    pub const POSITION: &str = "position";
    pub const EXECUTION: &str = "execution";
    pub const WALLET: &str = "wallet";

    pub fn tickers(symbol: &str) -> String {
        format!("tickers.{}", symbol)
    }

    pub fn kline(interval: &str, symbol: &str) -> String {
        format!("kline.{}.{}", interval, symbol)
    }

    pub fn orderbook(depth: u32, symbol: &str) -> String {
        format!("orderbook.{}.{}", depth, symbol)
    }

    pub fn public_trade(symbol: &str) -> String {
        format!("publicTrade.{}", symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_limit_order_serializes_decimals_as_strings() {
        let order = BybitOrderRequest::limit(
            BybitCategory::Linear,
            "BTCUSDT",
            BybitSide::Buy,
            Decimal::new(1, 3),
            Decimal::new(2_715_050, 2),
        )
        .with_link_id("abc-1");

        assert_eq!(
            serde_json::to_value(&order).unwrap(),
            json!({
                "category": "linear",
                "symbol": "BTCUSDT",
                "side": "Buy",
                "orderType": "Limit",
                "qty": "0.001",
                "price": "27150.50",
                "timeInForce": "GTC",
                "orderLinkId": "abc-1"
            })
        );
    }

    #[test]
    fn test_market_order_omits_price() {
        let order = BybitOrderRequest::market(
            BybitCategory::Spot,
            "ETHUSDT",
            BybitSide::Sell,
            Decimal::new(25, 1),
        )
        .reduce_only();
        let value = serde_json::to_value(&order).unwrap();

        assert!(value.get("price").is_none());
        assert_eq!(value["qty"], "2.5");
        assert_eq!(value["reduceOnly"], true);
    }

    #[test]
    fn test_topics() {
        assert_eq!(topics::tickers("BTCUSDT"), "tickers.BTCUSDT");
        assert_eq!(topics::kline("5", "BTCUSDT"), "kline.5.BTCUSDT");
        assert_eq!(topics::orderbook(50, "ETHUSDT"), "orderbook.50.ETHUSDT");
    }
}
