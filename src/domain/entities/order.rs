use crate::domain::errors::PlatformError;
use crate::domain::value_objects::price::Price;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Partial,
    Filled,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }
}

/// A resting limit order against a pool.
///
/// `locked_remaining` is the slice of the owner's wallet still held for this
/// order: quote units (`floor(price * amount)`) for buys, base units for
/// sells. Fills debit it; cancellation releases whatever is left.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitOrder {
    pub id: String,
    pub owner: String,
    pub pool_id: String,
    pub side: OrderSide,
    pub price: Price,
    pub amount: u64,
    pub filled: u64,
    pub locked_remaining: u64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl LimitOrder {
    pub fn new(
        id: String,
        owner: String,
        pool_id: String,
        side: OrderSide,
        price: f64,
        amount: u64,
    ) -> Result<Self, PlatformError> {
        let price = Price::positive(price).map_err(PlatformError::BadInput)?;
        if amount == 0 {
            return Err(PlatformError::BadInput("order amount must be positive".to_string()));
        }
        let locked_remaining = match side {
            OrderSide::Buy => (price.value() * amount as f64).floor() as u64,
            OrderSide::Sell => amount,
        };
        if locked_remaining == 0 {
            return Err(PlatformError::BadInput(
                "order notional rounds to zero".to_string(),
            ));
        }
        Ok(Self {
            id,
            owner,
            pool_id,
            side,
            price,
            amount,
            filled: 0,
            locked_remaining,
            status: OrderStatus::Open,
            created_at: Utc::now(),
        })
    }

    pub fn remaining(&self) -> u64 {
        self.amount - self.filled
    }

    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Advance the order by `fill` units and debit `lock_debit` from the
    /// remaining lock. Returns the new status.
    pub fn apply_fill(&mut self, fill: u64, lock_debit: u64) -> OrderStatus {
        debug_assert!(fill <= self.remaining());
        self.filled += fill;
        self.locked_remaining = self.locked_remaining.saturating_sub(lock_debit);
        self.status = if self.remaining() == 0 {
            OrderStatus::Filled
        } else {
            OrderStatus::Partial
        };
        self.status
    }

    /// Cancel the order, returning the lock amount to release.
    pub fn cancel(&mut self) -> Result<u64, PlatformError> {
        if self.status.is_terminal() {
            return Err(PlatformError::BadInput(format!(
                "order {} is already {:?}",
                self.id, self.status
            )));
        }
        self.status = OrderStatus::Cancelled;
        let released = self.locked_remaining;
        self.locked_remaining = 0;
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buy_order() -> LimitOrder {
        LimitOrder::new(
            "ord_1".to_string(),
            "alice".to_string(),
            "CRWN-USDT".to_string(),
            OrderSide::Buy,
            0.125,
            1000,
        )
        .unwrap()
    }

    #[test]
    fn test_buy_lock_is_quote_notional() {
        let order = buy_order();
        // floor(0.125 * 1000) = 125 USDT locked
        assert_eq!(order.locked_remaining, 125);
        assert_eq!(order.status, OrderStatus::Open);
    }

    #[test]
    fn test_sell_lock_is_base_amount() {
        let order = LimitOrder::new(
            "ord_2".to_string(),
            "bob".to_string(),
            "CRWN-USDT".to_string(),
            OrderSide::Sell,
            0.13,
            800,
        )
        .unwrap();
        assert_eq!(order.locked_remaining, 800);
    }

    #[test]
    fn test_rejects_nonpositive_price_and_amount() {
        assert!(LimitOrder::new(
            "x".into(),
            "a".into(),
            "p".into(),
            OrderSide::Buy,
            0.0,
            10
        )
        .is_err());
        assert!(LimitOrder::new(
            "x".into(),
            "a".into(),
            "p".into(),
            OrderSide::Sell,
            1.0,
            0
        )
        .is_err());
    }

    #[test]
    fn test_partial_then_full_fill() {
        let mut order = buy_order();
        assert_eq!(order.apply_fill(400, 50), OrderStatus::Partial);
        assert_eq!(order.remaining(), 600);
        assert_eq!(order.locked_remaining, 75);
        assert_eq!(order.apply_fill(600, 75), OrderStatus::Filled);
        assert_eq!(order.locked_remaining, 0);
        assert!(order.status.is_terminal());
    }

    #[test]
    fn test_cancel_releases_remaining_lock() {
        let mut order = buy_order();
        order.apply_fill(400, 50);
        let released = order.cancel().unwrap();
        assert_eq!(released, 75);
        assert_eq!(order.status, OrderStatus::Cancelled);
        // No transition out of a terminal state.
        assert!(order.cancel().is_err());
    }
}
