use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A listed token. The registry is fixed at startup and immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub symbol: String,
    pub name: String,
    pub total_supply: u64,
    pub decimals: u8,
}

impl Token {
    pub fn new(symbol: &str, name: &str, total_supply: u64) -> Self {
        Self {
            symbol: symbol.to_string(),
            name: name.to_string(),
            total_supply,
            decimals: 9,
        }
    }
}

/// Immutable symbol -> token map built once at boot.
#[derive(Debug, Clone)]
pub struct TokenRegistry {
    tokens: HashMap<String, Token>,
}

impl TokenRegistry {
    pub fn bootstrap() -> Self {
        let listed = vec![
            Token::new("CRWN", "Crown", 1_000_000_000),
            Token::new("USDT", "Tether USD", 500_000_000),
            Token::new("ETH", "Ethereum", 120_000_000),
            Token::new("BTC", "Bitcoin", 21_000_000),
            Token::new("TRIT", "Trit", 3_000_000_000),
            Token::new("KRW", "Korean Won", 1_000_000_000_000),
        ];
        let tokens = listed
            .into_iter()
            .map(|t| (t.symbol.clone(), t))
            .collect();
        Self { tokens }
    }

    pub fn get(&self, symbol: &str) -> Option<&Token> {
        self.tokens.get(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.tokens.contains_key(symbol)
    }

    pub fn all(&self) -> Vec<&Token> {
        let mut tokens: Vec<&Token> = self.tokens.values().collect();
        tokens.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        tokens
    }
}
