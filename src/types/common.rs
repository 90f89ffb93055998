//! Common domain types for venue calls.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Buy or sell side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    /// Buy order
    Buy,
    /// Sell order
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    /// Execute at the given price or better
    Limit,
    /// Execute immediately at the best available price
    Market,
}

/// How long a limit order stays on the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good till cancelled
    #[serde(rename = "GTC")]
    GoodTillCancelled,
    /// Immediate or cancel
    #[serde(rename = "IOC")]
    ImmediateOrCancel,
    /// Fill or kill
    #[serde(rename = "FOK")]
    FillOrKill,
}

/// Parameters for placing an order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    /// Caller-chosen unique id, used to find the order if the outcome is unknown.
    pub client_oid: String,
    /// Order side.
    pub side: OrderSide,
    /// Trading pair, e.g. `BTC-USDT`.
    pub symbol: String,
    /// Order type.
    #[serde(rename = "type")]
    pub order_type: OrderType,
    /// Limit price.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    /// Base currency amount.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<Decimal>,
    /// Time in force for limit orders.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<TimeInForce>,
}

impl PlaceOrderRequest {
    /// A limit order.
    pub fn limit(
        client_oid: impl Into<String>,
        symbol: impl Into<String>,
        side: OrderSide,
        price: Decimal,
        size: Decimal,
    ) -> Self {
        Self {
            client_oid: client_oid.into(),
            side,
            symbol: symbol.into(),
            order_type: OrderType::Limit,
            price: Some(price),
            size: Some(size),
            time_in_force: None,
        }
    }

    /// A market order.
    pub fn market(
        client_oid: impl Into<String>,
        symbol: impl Into<String>,
        side: OrderSide,
        size: Decimal,
    ) -> Self {
        Self {
            client_oid: client_oid.into(),
            side,
            symbol: symbol.into(),
            order_type: OrderType::Market,
            price: None,
            size: Some(size),
            time_in_force: None,
        }
    }

    /// Set the time in force.
    pub fn time_in_force(mut self, time_in_force: TimeInForce) -> Self {
        self.time_in_force = Some(time_in_force);
        self
    }
}

/// Venue-assigned order id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderId {
    /// The order id.
    pub order_id: String,
}

/// Result of a cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledOrders {
    /// Ids of the cancelled orders.
    #[serde(default)]
    pub cancelled_order_ids: Vec<String>,
}

/// Best bid and ask for a symbol.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    /// Last traded price.
    pub price: Decimal,
    /// Best bid price.
    pub best_bid: Decimal,
    /// Best ask price.
    pub best_ask: Decimal,
    /// Snapshot time in unix milliseconds.
    #[serde(default)]
    pub time: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(value: &str) -> Decimal {
        value.parse().unwrap()
    }

    #[test]
    fn test_place_order_serialization() {
        let request = PlaceOrderRequest::limit("c-1", "BTC-USDT", OrderSide::Buy, dec("42000.5"), dec("0.01"))
            .time_in_force(TimeInForce::ImmediateOrCancel);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["clientOid"], "c-1");
        assert_eq!(json["side"], "buy");
        assert_eq!(json["type"], "limit");
        assert_eq!(json["price"], "42000.5");
        assert_eq!(json["timeInForce"], "IOC");
    }

    #[test]
    fn test_market_order_omits_price() {
        let request = PlaceOrderRequest::market("c-2", "ETH-USDT", OrderSide::Sell, dec("1"));
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("price").is_none());
        assert_eq!(json["type"], "market");
    }

    #[test]
    fn test_ticker_deserialization() {
        let ticker: Ticker =
            serde_json::from_str(r#"{"price":"100.1","bestBid":"100.0","bestAsk":"100.2","time":1}"#).unwrap();
        assert_eq!(ticker.best_ask, dec("100.2"));
    }
}
