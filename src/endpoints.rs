//! Operation descriptors and the venue's operation catalog.
//!
//! An [`Operation`] tells the dispatch routine everything it needs beyond the
//! payload: which route it belongs to, whether it may be repeated, whether it
//! is signed, and whether it draws on the primed order quota.

use serde_json::Value;

use crate::error::VenueError;
use crate::rate_limit::RouteKey;

/// Static description of one venue operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    route: RouteKey,
    idempotent: bool,
    signed: bool,
    quota_governed: bool,
    required: &'static [&'static str],
}

impl Operation {
    /// A read-only operation. Idempotent, unsigned.
    pub const fn query(route: RouteKey) -> Self {
        Self {
            route,
            idempotent: true,
            signed: false,
            quota_governed: false,
            required: &[],
        }
    }

    /// A state-changing operation. Never retried, signed.
    pub const fn mutation(route: RouteKey) -> Self {
        Self {
            route,
            idempotent: false,
            signed: true,
            quota_governed: false,
            required: &[],
        }
    }

    /// Require authentication.
    pub const fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    /// Draw on the primed order quota.
    pub const fn governed(mut self) -> Self {
        self.quota_governed = true;
        self
    }

    /// Parameters that must be present and non-null.
    pub const fn require(mut self, names: &'static [&'static str]) -> Self {
        self.required = names;
        self
    }

    /// The route this operation is admitted on.
    pub fn route(&self) -> &RouteKey {
        &self.route
    }

    /// Whether repeating the operation is harmless.
    pub fn is_idempotent(&self) -> bool {
        self.idempotent
    }

    /// Whether the operation must be signed.
    pub fn is_signed(&self) -> bool {
        self.signed
    }

    /// Whether the operation needs the order quota primed first.
    pub fn is_quota_governed(&self) -> bool {
        self.quota_governed
    }

    /// Required parameter names.
    pub fn required(&self) -> &'static [&'static str] {
        self.required
    }

    /// Check that every required parameter is present.
    pub fn validate(&self, params: Option<&Value>) -> Result<(), VenueError> {
        if self.required.is_empty() {
            return Ok(());
        }
        let Some(Value::Object(map)) = params else {
            return Err(VenueError::Validation(format!(
                "{} requires parameters: {}",
                self.route,
                self.required.join(", ")
            )));
        };
        let missing: Vec<&str> = self
            .required
            .iter()
            .copied()
            .filter(|name| map.get(*name).is_none_or(Value::is_null))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(VenueError::Validation(format!(
                "{} missing required parameters: {}",
                self.route,
                missing.join(", ")
            )))
        }
    }
}

/// Public market data.
pub mod market {
    use super::*;

    pub const SERVER_TIME: Operation = Operation::query(RouteKey::rest("GET", "/api/v1/timestamp"));
    pub const SYMBOLS: Operation = Operation::query(RouteKey::rest("GET", "/api/v1/symbols"));
    pub const TICKER: Operation =
        Operation::query(RouteKey::rest("GET", "/api/v1/market/orderbook/level1")).require(&["symbol"]);
    pub const ORDER_BOOK: Operation =
        Operation::query(RouteKey::rest("GET", "/api/v1/market/orderbook/level2_20")).require(&["symbol"]);
}

/// Authenticated account queries.
pub mod account {
    use super::*;

    pub const ACCOUNTS: Operation = Operation::query(RouteKey::rest("GET", "/api/v1/accounts")).signed();

    /// Returns the account's current order quota as a numeric string.
    pub const ORDER_QUOTA: Operation =
        Operation::query(RouteKey::rest("GET", "/api/v1/trade/quota")).signed();
}

/// Order management. Place and cancel draw on the primed order quota.
pub mod trade {
    use super::*;

    pub const PLACE_ORDER: Operation = Operation::mutation(RouteKey::rest("POST", "/api/v1/orders"))
        .governed()
        .require(&["clientOid", "side", "symbol", "type"]);
    pub const CANCEL_ORDER: Operation =
        Operation::mutation(RouteKey::rest("DELETE", "/api/v1/orders"))
            .governed()
            .require(&["orderId"]);
    pub const ORDER_STATUS: Operation = Operation::query(RouteKey::rest("GET", "/api/v1/orders/status"))
        .signed()
        .require(&["orderId"]);
    pub const OPEN_ORDERS: Operation =
        Operation::query(RouteKey::rest("GET", "/api/v1/orders/active")).signed();
}

/// Order management over the WebSocket trading channel.
pub mod stream {
    use super::*;

    pub const PLACE_ORDER: Operation = Operation::mutation(RouteKey::stream("order.place", "/ws/trade"))
        .governed()
        .require(&["clientOid", "side", "symbol", "type"]);
    pub const CANCEL_ORDER: Operation = Operation::mutation(RouteKey::stream("order.cancel", "/ws/trade"))
        .governed()
        .require(&["orderId"]);
}

/// Every quota-governed route in the catalog.
pub fn governed_routes() -> Vec<RouteKey> {
    [
        &trade::PLACE_ORDER,
        &trade::CANCEL_ORDER,
        &stream::PLACE_ORDER,
        &stream::CANCEL_ORDER,
    ]
    .into_iter()
    .map(|op| op.route().clone())
    .collect()
}
