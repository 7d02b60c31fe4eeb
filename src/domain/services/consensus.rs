//! Weighted-vote consensus over the strategy set.

use crate::domain::services::indicators::Candle;
use crate::domain::services::risk::{RiskAssessment, RiskFlag};
use crate::domain::services::strategies::{default_strategies, Strategy};
use serde::{Deserialize, Serialize};

const BUY_THRESHOLD: f64 = 0.3;
const SELL_THRESHOLD: f64 = -0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Buy,
    Hold,
    Sell,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Buy => "BUY",
            Decision::Hold => "HOLD",
            Decision::Sell => "SELL",
        }
    }

    pub fn signal_value(&self) -> i8 {
        match self {
            Decision::Buy => 1,
            Decision::Hold => 0,
            Decision::Sell => -1,
        }
    }

    /// Ternary glyph used on the wire.
    pub fn trit(&self) -> &'static str {
        match self {
            Decision::Buy => "△",
            Decision::Hold => "○",
            Decision::Sell => "▽",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyVote {
    pub name: String,
    pub weight: f64,
    pub signal: i8,
    pub confidence: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consensus {
    pub decision: Decision,
    pub score: f64,
    pub confidence: f64,
    pub votes: Vec<StrategyVote>,
    /// Set when the risk gate overrode the voted decision.
    pub forced_by: Option<String>,
}

/// Run every strategy and fold the votes into one decision.
///
/// Strategies with zero confidence are dropped. The score is the
/// confidence-weighted mean signal; the reported confidence is the plain
/// mean over contributing strategies.
pub fn analyze(candles: &[Candle]) -> Consensus {
    analyze_with(&default_strategies(), candles)
}

pub fn analyze_with(strategies: &[Box<dyn Strategy>], candles: &[Candle]) -> Consensus {
    let mut votes = Vec::with_capacity(strategies.len());
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    let mut confidence_sum = 0.0;
    let mut contributors = 0usize;

    for strategy in strategies {
        let signal = strategy.evaluate(candles);
        if signal.confidence > 0.0 {
            weighted_sum += signal.signal as f64 * strategy.weight() * signal.confidence;
            total_weight += strategy.weight() * signal.confidence;
            confidence_sum += signal.confidence;
            contributors += 1;
        }
        votes.push(StrategyVote {
            name: strategy.name().to_string(),
            weight: strategy.weight(),
            signal: signal.signal,
            confidence: signal.confidence,
            reason: signal.reason,
        });
    }

    let score = if total_weight > 0.0 {
        weighted_sum / total_weight
    } else {
        0.0
    };
    let confidence = if contributors > 0 {
        confidence_sum / contributors as f64
    } else {
        0.0
    };

    let decision = if score > BUY_THRESHOLD {
        Decision::Buy
    } else if score < SELL_THRESHOLD {
        Decision::Sell
    } else {
        Decision::Hold
    };

    Consensus {
        decision,
        score,
        confidence,
        votes,
        forced_by: None,
    }
}

/// Apply the risk gate to a voted consensus. A blocked gate demotes any
/// active decision to HOLD; a stop-loss or take-profit trigger promotes the
/// decision to a forced SELL regardless of the vote.
pub fn apply_risk(mut consensus: Consensus, risk: &RiskAssessment) -> Consensus {
    if risk.has(RiskFlag::StopLoss) {
        consensus.decision = Decision::Sell;
        consensus.forced_by = Some("stoploss".to_string());
        return consensus;
    }
    if risk.has(RiskFlag::TakeProfit) {
        consensus.decision = Decision::Sell;
        consensus.forced_by = Some("takeprofit".to_string());
        return consensus;
    }
    if !risk.allowed && consensus.decision != Decision::Hold {
        consensus.decision = Decision::Hold;
        consensus.forced_by = Some("risk_blocked".to_string());
    }
    consensus
}
