use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalize a currency code as it appears in the raw catalog ("usd " -> "USD")
pub fn normalize_currency(code: &str) -> String {
    code.trim().to_uppercase()
}

/// A distinct (date, base currency) combination that needs a rate
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RatePair {
    pub date: NaiveDate,
    pub base_currency: String,
}

impl RatePair {
    pub fn new(date: NaiveDate, base_currency: &str) -> Self {
        Self {
            date,
            base_currency: normalize_currency(base_currency),
        }
    }
}

impl fmt::Display for RatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.base_currency, self.date)
    }
}

/// Key of a persisted quote: (date, base_currency, target_currency)
pub type RateKey = (NaiveDate, String, String);

/// A resolved rate for one pair, as stored in the rate table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateQuote {
    pub date: NaiveDate,
    pub base_currency: String,
    pub target_currency: String,
    pub rate: f64,
}

impl RateQuote {
    pub fn key(&self) -> RateKey {
        (
            self.date,
            self.base_currency.clone(),
            self.target_currency.clone(),
        )
    }
}

/// Why a pair could not be resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnavailableReason {
    /// Currency has no public historical rate, no request was made
    UnsupportedCurrency,
    /// Request could not be completed (connect, timeout, decode)
    Transport(String),
    /// Rate service answered with a non-success status
    Status(u16),
    /// Response had no rate for the target currency
    MissingRate,
    /// Rate was zero, negative or not finite
    InvalidRate,
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableReason::UnsupportedCurrency => write!(f, "unsupported currency"),
            UnavailableReason::Transport(msg) => write!(f, "transport error: {}", msg),
            UnavailableReason::Status(code) => write!(f, "rate service returned {}", code),
            UnavailableReason::MissingRate => write!(f, "no rate in response"),
            UnavailableReason::InvalidRate => write!(f, "invalid rate in response"),
        }
    }
}

/// Outcome of resolving one pair. Never an error: failures are data-quality facts.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Base equals target, rate is 1.0
    Identity,
    Fetched(f64),
    Unavailable(UnavailableReason),
}

impl Resolution {
    pub fn rate(&self) -> Option<f64> {
        match self {
            Resolution::Identity => Some(1.0),
            Resolution::Fetched(rate) => Some(*rate),
            Resolution::Unavailable(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPair {
    pub pair: RatePair,
    pub resolution: Resolution,
}

impl ResolvedPair {
    /// Quote for the rate table, `None` when the pair stayed unresolved
    pub fn to_quote(&self, target_currency: &str) -> Option<RateQuote> {
        self.resolution.rate().map(|rate| RateQuote {
            date: self.pair.date,
            base_currency: self.pair.base_currency.clone(),
            target_currency: target_currency.to_string(),
            rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_normalizes_currency() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let pair = RatePair::new(date, " usd");
        assert_eq!(pair.base_currency, "USD");
        assert_eq!(pair.to_string(), "USD@2024-01-01");
    }

    #[test]
    fn test_unavailable_pair_has_no_quote() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let resolved = ResolvedPair {
            pair: RatePair::new(date, "TWD"),
            resolution: Resolution::Unavailable(UnavailableReason::UnsupportedCurrency),
        };
        assert!(resolved.to_quote("EUR").is_none());
    }

    #[test]
    fn test_identity_quote_is_one() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let resolved = ResolvedPair {
            pair: RatePair::new(date, "EUR"),
            resolution: Resolution::Identity,
        };
        let quote = resolved.to_quote("EUR").unwrap();
        assert_eq!(quote.rate, 1.0);
        assert_eq!(quote.key(), (date, "EUR".to_string(), "EUR".to_string()));
    }
}
