pub mod price_record;
pub mod rate;

pub use price_record::{EnrichedRecord, PriceRecord, PricedTable};
pub use rate::{RateKey, RatePair, RateQuote, Resolution, ResolvedPair, UnavailableReason};
