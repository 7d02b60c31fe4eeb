use serde::{Deserialize, Serialize};

/// A non-negative price. Serializes as the bare number.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Price(pub f64);

impl Price {
    pub fn new(value: f64) -> Result<Self, String> {
        if !value.is_finite() {
            return Err("Price must be finite".to_string());
        }
        if value < 0.0 {
            return Err("Price must be non-negative".to_string());
        }
        Ok(Price(value))
    }

    /// Strictly positive variant used by limit orders.
    pub fn positive(value: f64) -> Result<Self, String> {
        if !value.is_finite() || value <= 0.0 {
            return Err("Price must be positive".to_string());
        }
        Ok(Price(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_new_valid() {
        let price = Price::new(100.0);
        assert!(price.is_ok());
        assert_eq!(price.unwrap().value(), 100.0);
    }

    #[test]
    fn test_price_new_negative() {
        let price = Price::new(-10.0);
        assert!(price.is_err());
        assert_eq!(price.unwrap_err(), "Price must be non-negative");
    }

    #[test]
    fn test_price_new_zero() {
        let price = Price::new(0.0);
        assert!(price.is_ok());
        assert_eq!(price.unwrap().value(), 0.0);
    }

    #[test]
    fn test_price_positive_rejects_zero() {
        assert!(Price::positive(0.0).is_err());
        assert!(Price::positive(0.125).is_ok());
    }

    #[test]
    fn test_price_rejects_nan() {
        assert!(Price::new(f64::NAN).is_err());
        assert!(Price::new(f64::INFINITY).is_err());
    }

    #[test]
    fn test_price_serializes_as_bare_number() {
        let price = Price::new(0.125).unwrap();
        assert_eq!(serde_json::to_string(&price).unwrap(), "0.125");
        let back: Price = serde_json::from_str("0.125").unwrap();
        assert_eq!(back, price);
    }

    #[test]
    fn test_price_ordering() {
        assert!(Price::new(0.12).unwrap() < Price::new(0.15).unwrap());
    }
}
