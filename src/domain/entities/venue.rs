use crate::domain::errors::PlatformError;
use serde::{Deserialize, Serialize};

/// Supported external venues. Dispatch is always on this enum, never on
/// venue-name substrings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Upbit,
    Binance,
}

impl Venue {
    pub fn name(&self) -> &'static str {
        match self {
            Venue::Upbit => "upbit",
            Venue::Binance => "binance",
        }
    }

    /// Quote currency orders are denominated in on this venue.
    pub fn quote_currency(&self) -> &'static str {
        match self {
            Venue::Upbit => "KRW",
            Venue::Binance => "USDT",
        }
    }

    /// Minimum gap between two requests from one client instance.
    pub fn min_request_gap_ms(&self) -> u64 {
        match self {
            Venue::Upbit => 100,
            Venue::Binance => 50,
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Venue {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "upbit" => Ok(Venue::Upbit),
            "binance" => Ok(Venue::Binance),
            other => Err(PlatformError::BadInput(format!("unknown venue: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_parse_known_venues() {
        assert_eq!(Venue::from_str("upbit").unwrap(), Venue::Upbit);
        assert_eq!(Venue::from_str("Binance").unwrap(), Venue::Binance);
    }

    #[test]
    fn test_parse_unknown_venue() {
        assert!(Venue::from_str("kraken").is_err());
    }

    #[test]
    fn test_quote_currencies() {
        assert_eq!(Venue::Upbit.quote_currency(), "KRW");
        assert_eq!(Venue::Binance.quote_currency(), "USDT");
    }

    #[test]
    fn test_request_gaps() {
        assert_eq!(Venue::Upbit.min_request_gap_ms(), 100);
        assert_eq!(Venue::Binance.min_request_gap_ms(), 50);
    }
}
