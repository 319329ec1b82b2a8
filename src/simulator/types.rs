use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type Price = f64;
pub type Quantity = f64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// FIX Side(54) value
    pub fn fix_code(&self) -> &'static str {
        match self {
            Side::Buy => "1",
            Side::Sell => "2",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    /// FIX OrdType(40) value
    pub fn fix_code(&self) -> &'static str {
        match self {
            OrderType::Market => "1",
            OrderType::Limit => "2",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub price: Price,
}

impl Instrument {
    pub fn new(symbol: impl Into<String>, price: Price) -> Self {
        Self {
            symbol: symbol.into(),
            price,
        }
    }
}

/// An order as placed by the client. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub cl_ord_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Quantity,
    /// Present only for limit orders
    pub price: Option<Price>,
    pub transact_time: DateTime<Utc>,
}

impl Order {
    pub fn new_limit(
        cl_ord_id: String,
        symbol: String,
        side: Side,
        price: Price,
        quantity: Quantity,
    ) -> Self {
        Self {
            cl_ord_id,
            symbol,
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            transact_time: Utc::now(),
        }
    }

    pub fn new_market(cl_ord_id: String, symbol: String, side: Side, quantity: Quantity) -> Self {
        Self {
            cl_ord_id,
            symbol,
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            transact_time: Utc::now(),
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.price {
            Some(price) => write!(
                f,
                "{} {} {} of {} at {}",
                self.cl_ord_id, self.side, self.quantity, self.symbol, price
            ),
            None => write!(
                f,
                "{} {} {} of {} at Market",
                self.cl_ord_id, self.side, self.quantity, self.symbol
            ),
        }
    }
}

/// Terminal artifact of an order: always a complete fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub cl_ord_id: Option<String>,
    pub symbol: String,
    pub executed_quantity: Quantity,
    pub executed_price: Price,
    pub notional: f64,
}

impl ExecutionResult {
    pub fn new(
        cl_ord_id: Option<String>,
        symbol: String,
        executed_quantity: Quantity,
        executed_price: Price,
    ) -> Self {
        Self {
            cl_ord_id,
            symbol,
            executed_quantity,
            executed_price,
            notional: executed_price * executed_quantity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_creation() {
        let order = Order::new_limit(
            "abc-000001".to_string(),
            "EUR/USD".to_string(),
            Side::Buy,
            149.5,
            100.0,
        );

        assert_eq!(order.side, Side::Buy);
        assert_eq!(order.order_type, OrderType::Limit);
        assert_eq!(order.price, Some(149.5));
        assert_eq!(order.quantity, 100.0);

        let market = Order::new_market(
            "abc-000002".to_string(),
            "EUR/USD".to_string(),
            Side::Sell,
            10.0,
        );
        assert_eq!(market.price, None);
        assert_eq!(market.to_string(), "abc-000002 SELL 10 of EUR/USD at Market");
    }

    #[test]
    fn test_fix_codes() {
        assert_eq!(Side::Buy.fix_code(), "1");
        assert_eq!(Side::Sell.fix_code(), "2");
        assert_eq!(OrderType::Market.fix_code(), "1");
        assert_eq!(OrderType::Limit.fix_code(), "2");
    }

    #[test]
    fn test_execution_notional() {
        let exec = ExecutionResult::new(None, "EUR/USD".to_string(), 1000.0, 150.0);
        assert_eq!(exec.notional, 150000.0);
    }
}
