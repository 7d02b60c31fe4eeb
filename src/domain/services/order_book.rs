//! In-memory limit order book shared by all pools.
//!
//! Orders are appended once and mutated in place as they fill. Matching is
//! price-time: buys sorted by price descending, sells ascending, each cross
//! filled at the resting sell's price. Every fill yields a settlement
//! instruction so the gateway can move locked balances in the same
//! transaction that persists the fill.

use crate::domain::entities::order::{LimitOrder, OrderSide, OrderStatus};
use crate::domain::entities::pool::Pool;
use crate::domain::errors::PlatformError;

/// Wallet movements owed to one order after a fill.
#[derive(Debug, Clone)]
pub struct FillSettlement {
    pub order_id: String,
    pub owner: String,
    pub side: OrderSide,
    pub fill: u64,
    pub price: f64,
    /// Debited from the owner's locked balance.
    pub lock_debit: u64,
    pub lock_token: String,
    /// Credited to the owner's free balance.
    pub credit: u64,
    pub credit_token: String,
    /// Surplus lock released when the order completed below its limit.
    pub lock_refund: u64,
    pub status_after: OrderStatus,
}

#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    orders: Vec<LimitOrder>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self { orders: Vec::new() }
    }

    pub fn place(&mut self, order: LimitOrder) {
        self.orders.push(order);
    }

    pub fn get(&self, order_id: &str) -> Option<&LimitOrder> {
        self.orders.iter().find(|o| o.id == order_id)
    }

    pub fn open_orders(&self, pool_id: &str) -> Vec<&LimitOrder> {
        self.orders
            .iter()
            .filter(|o| o.pool_id == pool_id && o.is_open())
            .collect()
    }

    pub fn all(&self) -> &[LimitOrder] {
        &self.orders
    }

    /// Cancel an open order owned by `owner`; returns the cancelled order
    /// with the lock amount it released.
    pub fn cancel(&mut self, order_id: &str, owner: &str) -> Result<(LimitOrder, u64), PlatformError> {
        let order = self
            .orders
            .iter_mut()
            .find(|o| o.id == order_id)
            .ok_or_else(|| PlatformError::NotFound(format!("order {}", order_id)))?;
        if order.owner != owner {
            return Err(PlatformError::NotFound(format!("order {}", order_id)));
        }
        let released = order.cancel()?;
        Ok((order.clone(), released))
    }

    /// Match all crossing orders of one pool. O(buys * sells), acceptable
    /// for per-pool open-order counts.
    pub fn match_pool(&mut self, pool: &Pool) -> Vec<FillSettlement> {
        let mut buy_idx: Vec<usize> = Vec::new();
        let mut sell_idx: Vec<usize> = Vec::new();
        for (i, order) in self.orders.iter().enumerate() {
            if order.pool_id != pool.id || !order.is_open() {
                continue;
            }
            match order.side {
                OrderSide::Buy => buy_idx.push(i),
                OrderSide::Sell => sell_idx.push(i),
            }
        }
        buy_idx.sort_by(|&a, &b| {
            self.orders[b]
                .price
                .partial_cmp(&self.orders[a].price)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(self.orders[a].created_at.cmp(&self.orders[b].created_at))
        });
        sell_idx.sort_by(|&a, &b| {
            self.orders[a]
                .price
                .partial_cmp(&self.orders[b].price)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(self.orders[a].created_at.cmp(&self.orders[b].created_at))
        });

        let mut settlements = Vec::new();
        for &bi in &buy_idx {
            for &si in &sell_idx {
                let (buy_price, buy_rem) = {
                    let b = &self.orders[bi];
                    if !b.is_open() {
                        break;
                    }
                    (b.price, b.remaining())
                };
                let (sell_price, sell_rem) = {
                    let s = &self.orders[si];
                    if !s.is_open() {
                        continue;
                    }
                    (s.price, s.remaining())
                };
                if buy_price < sell_price {
                    // Sells are sorted ascending; nothing further crosses.
                    break;
                }

                let fill = buy_rem.min(sell_rem);
                if fill == 0 {
                    continue;
                }
                // Fills execute at the resting sell's price.
                let quote_moved = (fill as f64 * sell_price.value()).floor() as u64;

                settlements
                    .push(self.apply_buy_fill(bi, pool, fill, sell_price.value(), quote_moved));
                settlements
                    .push(self.apply_sell_fill(si, pool, fill, sell_price.value(), quote_moved));

                if !self.orders[bi].is_open() {
                    break;
                }
            }
        }
        settlements
    }

    fn apply_buy_fill(
        &mut self,
        idx: usize,
        pool: &Pool,
        fill: u64,
        price: f64,
        quote_moved: u64,
    ) -> FillSettlement {
        let order = &mut self.orders[idx];
        let lock_debit = quote_moved.min(order.locked_remaining);
        let status_after = order.apply_fill(fill, lock_debit);
        // Executed below the limit price: hand back the unused lock.
        let lock_refund = if status_after == OrderStatus::Filled {
            let surplus = order.locked_remaining;
            order.locked_remaining = 0;
            surplus
        } else {
            0
        };
        FillSettlement {
            order_id: order.id.clone(),
            owner: order.owner.clone(),
            side: OrderSide::Buy,
            fill,
            price,
            lock_debit,
            lock_token: pool.token_b.clone(),
            credit: fill,
            credit_token: pool.token_a.clone(),
            lock_refund,
            status_after,
        }
    }

    fn apply_sell_fill(
        &mut self,
        idx: usize,
        pool: &Pool,
        fill: u64,
        price: f64,
        quote_moved: u64,
    ) -> FillSettlement {
        let order = &mut self.orders[idx];
        let status_after = order.apply_fill(fill, fill);
        FillSettlement {
            order_id: order.id.clone(),
            owner: order.owner.clone(),
            side: OrderSide::Sell,
            fill,
            price,
            lock_debit: fill,
            lock_token: pool.token_a.clone(),
            credit: quote_moved,
            credit_token: pool.token_b.clone(),
            lock_refund: 0,
            status_after,
        }
    }
}
