//! Constant-product liquidity pool.
//!
//! Reserves are integer token units; the product `k = reserve_a * reserve_b`
//! is tracked in u128 so swap math never overflows. Swap fees stay inside
//! the pool, so `k` grows with every fee-bearing swap and LP value accretes
//! without a separate fee ledger.

use crate::domain::errors::PlatformError;
use crate::domain::value_objects::price::Price;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

pub const PRICE_HISTORY_CAP: usize = 1000;

/// Swap quality classification on the 3-trit scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trit {
    P,
    O,
    T,
}

impl Trit {
    pub fn from_price_impact(impact: f64) -> Self {
        if impact < 0.01 {
            Trit::P
        } else if impact < 0.05 {
            Trit::O
        } else {
            Trit::T
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Trit::P => "△",
            Trit::O => "○",
            Trit::T => "▽",
        }
    }

    /// Letter form used on swap records.
    pub fn letter(&self) -> &'static str {
        match self {
            Trit::P => "P",
            Trit::O => "O",
            Trit::T => "T",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    pub price: Price,
    pub at: DateTime<Utc>,
}

/// Result of one committed swap.
#[derive(Debug, Clone)]
pub struct SwapOutcome {
    pub token_in: String,
    pub token_out: String,
    pub amount_in: u64,
    pub amount_out: u64,
    pub fee: u64,
    pub price_impact: f64,
    pub slippage: f64,
    pub trit: Trit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub id: String,
    pub token_a: String,
    pub token_b: String,
    pub reserve_a: u64,
    pub reserve_b: u64,
    pub fee_bps: u32,
    pub total_lp_shares: u64,
    pub lp_holders: HashMap<String, u64>,
    pub volume_24h: u64,
    pub fees_collected: u64,
    pub swap_count: u64,
    pub price_history: VecDeque<PricePoint>,
}

impl Pool {
    pub fn new(token_a: &str, token_b: &str, fee_bps: u32) -> Self {
        Self {
            id: format!("{}-{}", token_a, token_b),
            token_a: token_a.to_string(),
            token_b: token_b.to_string(),
            reserve_a: 0,
            reserve_b: 0,
            fee_bps,
            total_lp_shares: 0,
            lp_holders: HashMap::new(),
            volume_24h: 0,
            fees_collected: 0,
            swap_count: 0,
            price_history: VecDeque::new(),
        }
    }

    pub fn k(&self) -> u128 {
        self.reserve_a as u128 * self.reserve_b as u128
    }

    /// Price of one unit of token A denominated in token B.
    pub fn price_a_in_b(&self) -> Option<f64> {
        if self.reserve_a == 0 {
            None
        } else {
            Some(self.reserve_b as f64 / self.reserve_a as f64)
        }
    }

    pub fn record_price(&mut self, at: DateTime<Utc>) {
        if let Some(price) = self.price_a_in_b() {
            if self.price_history.len() == PRICE_HISTORY_CAP {
                self.price_history.pop_front();
            }
            self.price_history.push_back(PricePoint {
                price: Price(price),
                at,
            });
        }
    }

    /// Deposit liquidity. First deposit mints floor(sqrt(a*b)) shares;
    /// afterwards shares are pro rata against the smaller leg.
    pub fn add_liquidity(
        &mut self,
        provider: &str,
        amount_a: u64,
        amount_b: u64,
    ) -> Result<u64, PlatformError> {
        if amount_a == 0 || amount_b == 0 {
            return Err(PlatformError::BadInput(
                "liquidity amounts must be positive".to_string(),
            ));
        }

        let minted = if self.total_lp_shares == 0 {
            isqrt(amount_a as u128 * amount_b as u128) as u64
        } else {
            let by_a =
                (amount_a as u128 * self.total_lp_shares as u128 / self.reserve_a as u128) as u64;
            let by_b =
                (amount_b as u128 * self.total_lp_shares as u128 / self.reserve_b as u128) as u64;
            by_a.min(by_b)
        };

        if minted == 0 {
            return Err(PlatformError::InsufficientLiquidity(self.id.clone()));
        }

        self.reserve_a += amount_a;
        self.reserve_b += amount_b;
        self.total_lp_shares += minted;
        *self.lp_holders.entry(provider.to_string()).or_insert(0) += minted;
        self.record_price(Utc::now());

        Ok(minted)
    }

    /// Burn `shares` and pay out the pro-rata slice of each reserve.
    pub fn remove_liquidity(
        &mut self,
        provider: &str,
        shares: u64,
    ) -> Result<(u64, u64), PlatformError> {
        let held = self.lp_holders.get(provider).copied().unwrap_or(0);
        if shares == 0 || shares > held {
            return Err(PlatformError::BadInput(format!(
                "cannot burn {} shares, holding {}",
                shares, held
            )));
        }

        let out_a = (shares as u128 * self.reserve_a as u128 / self.total_lp_shares as u128) as u64;
        let out_b = (shares as u128 * self.reserve_b as u128 / self.total_lp_shares as u128) as u64;

        self.reserve_a -= out_a;
        self.reserve_b -= out_b;
        self.total_lp_shares -= shares;
        if held == shares {
            self.lp_holders.remove(provider);
        } else {
            self.lp_holders.insert(provider.to_string(), held - shares);
        }

        Ok((out_a, out_b))
    }

    pub fn other_token(&self, token_in: &str) -> Result<String, PlatformError> {
        if token_in == self.token_a {
            Ok(self.token_b.clone())
        } else if token_in == self.token_b {
            Ok(self.token_a.clone())
        } else {
            Err(PlatformError::BadInput(format!(
                "token {} is not in pool {}",
                token_in, self.id
            )))
        }
    }

    /// Execute a swap of `amount_in` units of `token_in`.
    ///
    /// The output leg is quoted against the fee-reduced input, but the full
    /// input (fee included) is committed to the input reserve. The reserve
    /// product therefore strictly grows on any fee-bearing swap.
    pub fn swap(&mut self, token_in: &str, amount_in: u64) -> Result<SwapOutcome, PlatformError> {
        if amount_in == 0 {
            return Err(PlatformError::BadInput("swap amount must be positive".to_string()));
        }
        let token_out = self.other_token(token_in)?;
        let a_to_b = token_in == self.token_a;

        let (r_in, r_out) = if a_to_b {
            (self.reserve_a, self.reserve_b)
        } else {
            (self.reserve_b, self.reserve_a)
        };
        if r_in == 0 || r_out == 0 {
            return Err(PlatformError::InsufficientLiquidity(self.id.clone()));
        }

        let fee = (amount_in as u128 * self.fee_bps as u128 / 10_000) as u64;
        let after_fee = amount_in - fee;
        let k = r_in as u128 * r_out as u128;
        let new_in = r_in as u128 + after_fee as u128;
        let new_out = (k / new_in) as u64;
        let amount_out = r_out - new_out;
        if amount_out == 0 {
            return Err(PlatformError::ZeroOutput);
        }

        let price_impact =
            1.0 - (new_out as f64 * r_in as f64) / (r_out as f64 * new_in as f64);
        // Shortfall against the pre-swap spot price.
        let expected_at_spot = amount_in as f64 * r_out as f64 / r_in as f64;
        let slippage = if expected_at_spot > 0.0 {
            1.0 - amount_out as f64 / expected_at_spot
        } else {
            0.0
        };

        if a_to_b {
            self.reserve_a += amount_in;
            self.reserve_b = new_out;
        } else {
            self.reserve_b += amount_in;
            self.reserve_a = new_out;
        }
        self.volume_24h += amount_in;
        self.fees_collected += fee;
        self.swap_count += 1;
        self.record_price(Utc::now());

        Ok(SwapOutcome {
            token_in: token_in.to_string(),
            token_out,
            amount_in,
            amount_out,
            fee,
            price_impact,
            slippage,
            trit: Trit::from_price_impact(price_impact),
        })
    }
}

/// Integer square root on u128 (Newton's method).
pub fn isqrt(n: u128) -> u128 {
    if n < 2 {
        return n;
    }
    let mut x = n;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_pool() -> Pool {
        let mut pool = Pool::new("CRWN", "USDT", 30);
        pool.add_liquidity("system", 10_000_000, 1_250_000).unwrap();
        pool
    }

    #[test]
    fn test_isqrt() {
        assert_eq!(isqrt(0), 0);
        assert_eq!(isqrt(1), 1);
        assert_eq!(isqrt(15), 3);
        assert_eq!(isqrt(16), 4);
        assert_eq!(isqrt(12_500_000_000_000), 3_535_533);
    }

    #[test]
    fn test_bootstrap_price() {
        let pool = seeded_pool();
        assert_eq!(pool.reserve_a, 10_000_000);
        assert_eq!(pool.reserve_b, 1_250_000);
        assert_eq!(pool.price_a_in_b(), Some(0.125));
        assert_eq!(pool.total_lp_shares, isqrt(10_000_000u128 * 1_250_000) as u64);
    }

    #[test]
    fn test_swap_matches_closed_form() {
        let mut pool = seeded_pool();
        let k = pool.k();
        let outcome = pool.swap("CRWN", 10_000).unwrap();

        // fee = floor(10_000 * 30 / 10_000) = 30, after_fee = 9_970
        let new_a = 10_000_000u128 + 9_970;
        let expected_out = 1_250_000u64 - (k / new_a) as u64;
        assert_eq!(outcome.fee, 30);
        assert_eq!(outcome.amount_out, expected_out);
        assert_eq!(outcome.token_out, "USDT");
        assert!(outcome.price_impact > 0.0 && outcome.price_impact < 0.01);
        assert_eq!(outcome.trit, Trit::P);
    }

    #[test]
    fn test_k_grows_on_fee_bearing_swap() {
        let mut pool = seeded_pool();
        let k_before = pool.k();
        pool.swap("CRWN", 10_000).unwrap();
        assert!(pool.k() > k_before);
    }

    #[test]
    fn test_round_trip_never_profits() {
        let mut pool = seeded_pool();
        let x = 50_000u64;
        let out = pool.swap("CRWN", x).unwrap().amount_out;
        let back = pool.swap("USDT", out).unwrap().amount_out;
        assert!(back <= x);
    }

    #[test]
    fn test_swap_unknown_token() {
        let mut pool = seeded_pool();
        assert!(matches!(
            pool.swap("DOGE", 1_000),
            Err(PlatformError::BadInput(_))
        ));
    }

    #[test]
    fn test_dust_swap_against_thin_reserve() {
        let mut pool = Pool::new("CRWN", "USDT", 30);
        pool.add_liquidity("system", 1_000_000_000, 2).unwrap();
        // A dust input against a 2-unit reserve takes one unit and is
        // flagged as a heavy-impact trade.
        let outcome = pool.swap("CRWN", 10).unwrap();
        assert_eq!(outcome.amount_out, 1);
        assert_eq!(outcome.trit, Trit::T);
    }

    #[test]
    fn test_swap_rejects_zero_amount() {
        let mut pool = seeded_pool();
        assert!(pool.swap("CRWN", 0).is_err());
    }

    #[test]
    fn test_liquidity_round_trip_loses_at_most_one_unit() {
        let mut pool = seeded_pool();
        let minted = pool.add_liquidity("alice", 1_000_000, 125_000).unwrap();
        let (out_a, out_b) = pool.remove_liquidity("alice", minted).unwrap();
        assert!(out_a >= 1_000_000 - 1 && out_a <= 1_000_000);
        assert!(out_b >= 125_000 - 1 && out_b <= 125_000);
    }

    #[test]
    fn test_lp_share_conservation() {
        let mut pool = seeded_pool();
        pool.add_liquidity("alice", 2_000_000, 250_000).unwrap();
        pool.add_liquidity("bob", 500_000, 62_500).unwrap();
        let held: u64 = pool.lp_holders.values().sum();
        assert_eq!(held, pool.total_lp_shares);

        let bob_shares = pool.lp_holders["bob"];
        pool.remove_liquidity("bob", bob_shares).unwrap();
        let held: u64 = pool.lp_holders.values().sum();
        assert_eq!(held, pool.total_lp_shares);
        assert!(!pool.lp_holders.contains_key("bob"));
    }

    #[test]
    fn test_remove_more_than_held() {
        let mut pool = seeded_pool();
        let minted = pool.add_liquidity("alice", 1_000_000, 125_000).unwrap();
        assert!(pool.remove_liquidity("alice", minted + 1).is_err());
    }

    #[test]
    fn test_price_history_ring_caps() {
        let mut pool = seeded_pool();
        for _ in 0..(PRICE_HISTORY_CAP + 10) {
            pool.record_price(Utc::now());
        }
        assert_eq!(pool.price_history.len(), PRICE_HISTORY_CAP);
    }

    #[test]
    fn test_trit_classification() {
        assert_eq!(Trit::from_price_impact(0.005), Trit::P);
        assert_eq!(Trit::from_price_impact(0.02), Trit::O);
        assert_eq!(Trit::from_price_impact(0.10), Trit::T);
        assert_eq!(Trit::P.symbol(), "△");
    }
}
